//! Per-(topic, timeframe) pool bound, independent of tiers.
//!
//! Runs after a new item is admitted, under the same topic lock. The pool size counts
//! visible incumbents only, never the new item.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use saga_common::{AboutEntry, CapacityConfig, ChangeReason, SagaError, TimeframeBounds, Topic};
use saga_oracle::{Oracle, ReplacementAction, ReplacementDecision, ReplacementMode};

use crate::audit::{AuditAction, AuditRecord};
use crate::notify::Notifier;
use crate::traits::GraphStore;

/// Where an executed action came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecidedBy {
    Oracle,
    Fallback,
}

impl DecidedBy {
    fn as_str(&self) -> &'static str {
        match self {
            DecidedBy::Oracle => "oracle",
            DecidedBy::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedAction {
    pub action: ReplacementAction,
    pub article_id: String,
    pub decided_by: DecidedBy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplacementOutcome {
    NoAction,
    Applied { mode: ReplacementMode, actions: Vec<AppliedAction> },
}

pub struct TimeframeReplacementPolicy {
    graph: Arc<dyn GraphStore>,
    oracle: Oracle,
    capacity: CapacityConfig,
    notifier: Notifier,
}

impl TimeframeReplacementPolicy {
    pub fn new(graph: Arc<dyn GraphStore>, oracle: Oracle, capacity: CapacityConfig, notifier: Notifier) -> Self {
        Self { graph, oracle, capacity, notifier }
    }

    pub fn mode_for(size: u32, bounds: TimeframeBounds) -> Option<ReplacementMode> {
        if size < bounds.min {
            None
        } else if size < bounds.max {
            Some(ReplacementMode::CanReplace)
        } else {
            Some(ReplacementMode::MustReplace)
        }
    }

    /// Keep the timeframe pool of `incoming` within bounds. Callers hold the topic lock.
    pub async fn apply(&self, topic: &Topic, incoming: &AboutEntry) -> Result<ReplacementOutcome, SagaError> {
        let timeframe = incoming.edge.timeframe;
        let bounds = TimeframeBounds::for_topic(topic, self.capacity.timeframe_defaults());
        let pool: Vec<AboutEntry> = self
            .graph
            .timeframe_pool(&topic.id, timeframe)
            .await?
            .into_iter()
            .filter(|e| e.article.id != incoming.article.id)
            .collect();
        let size = pool.len() as u32;

        let Some(mode) = Self::mode_for(size, bounds) else {
            info!(topic_id = topic.id.as_str(), %timeframe, size, min = bounds.min, "Pool still growing");
            return self.finish(topic, Vec::new(), ReplacementMode::CanReplace).await;
        };

        info!(topic_id = topic.id.as_str(), %timeframe, size, max = bounds.max, ?mode, "Evaluating replacement");

        let decision = self
            .oracle
            .choose_replacement(topic, timeframe, mode, incoming, &pool)
            .await;

        let plan = match mode {
            ReplacementMode::CanReplace => match decision {
                Ok(ReplacementDecision::Act { action, article_id, rationale }) => {
                    vec![(action, article_id, DecidedBy::Oracle, rationale)]
                }
                Ok(ReplacementDecision::Keep { .. }) => Vec::new(),
                Err(e) => {
                    warn!(topic_id = topic.id.as_str(), error = %e, "Advisory replacement skipped");
                    Vec::new()
                }
            },
            ReplacementMode::MustReplace => {
                let required = (size - bounds.max + 1) as usize;
                let mut plan = Vec::with_capacity(required);
                match decision {
                    Ok(ReplacementDecision::Act { action, article_id, rationale }) if action.evicts() => {
                        plan.push((action, article_id, DecidedBy::Oracle, rationale));
                    }
                    Ok(other) => {
                        warn!(topic_id = topic.id.as_str(), decision = ?other, "No eviction named at capacity, using fallback");
                    }
                    Err(e) => {
                        warn!(topic_id = topic.id.as_str(), error = %e, "Oracle failed at capacity, using fallback");
                    }
                }
                let taken: HashSet<String> = plan.iter().map(|(_, id, _, _)| id.clone()).collect();
                let remaining = required.saturating_sub(plan.len());
                for victim in fallback_order(&pool).into_iter().filter(|e| !taken.contains(&e.article.id)).take(remaining) {
                    plan.push((
                        ReplacementAction::Remove,
                        victim.article.id.clone(),
                        DecidedBy::Fallback,
                        "lowest priority rank, then oldest".to_string(),
                    ));
                }
                plan
            }
        };

        let mut applied = Vec::with_capacity(plan.len());
        for (action, article_id, decided_by, rationale) in plan {
            let Some(entry) = pool.iter().find(|e| e.article.id == article_id) else {
                continue;
            };
            self.execute(topic, entry, action, decided_by, &rationale).await?;
            applied.push(AppliedAction { action, article_id, decided_by });
        }

        self.finish(topic, applied, mode).await
    }

    async fn execute(
        &self,
        topic: &Topic,
        entry: &AboutEntry,
        action: ReplacementAction,
        decided_by: DecidedBy,
        rationale: &str,
    ) -> Result<(), SagaError> {
        let article_id = entry.article.id.as_str();
        let record = match action {
            ReplacementAction::Remove => {
                let orphaned = self.graph.remove_about(article_id, &topic.id).await?;
                AuditRecord::new(AuditAction::AboutRemoved, &topic.id, article_id, decided_by.as_str())
                    .before(&entry.edge)
                    .after(&json!({ "article_deleted": orphaned }))
            }
            ReplacementAction::Hide => {
                self.graph.hide_about(article_id, &topic.id).await?;
                AuditRecord::new(AuditAction::AboutHidden, &topic.id, article_id, decided_by.as_str())
                    .before(&json!({ "hidden": entry.edge.hidden }))
                    .after(&json!({ "hidden": true }))
            }
            ReplacementAction::LowerPriority => {
                let rank = self.graph.lower_priority(article_id, &topic.id).await?;
                AuditRecord::new(AuditAction::PriorityLowered, &topic.id, article_id, decided_by.as_str())
                    .before(&json!({ "priority_rank": entry.edge.priority_rank }))
                    .after(&json!({ "priority_rank": rank }))
            }
        };
        record.rationale(rationale).emit();

        let reason = match action {
            ReplacementAction::Remove => ChangeReason::ArticleReplaced,
            ReplacementAction::Hide => ChangeReason::ArticleHidden,
            ReplacementAction::LowerPriority => ChangeReason::PriorityLowered,
        };
        self.notifier.notify(&topic.id, reason);
        info!(topic_id = topic.id.as_str(), article_id, %action, decided_by = decided_by.as_str(), "Replacement applied");
        Ok(())
    }

    async fn finish(
        &self,
        topic: &Topic,
        applied: Vec<AppliedAction>,
        mode: ReplacementMode,
    ) -> Result<ReplacementOutcome, SagaError> {
        if !applied.is_empty() {
            return Ok(ReplacementOutcome::Applied { mode, actions: applied });
        }
        // Nothing changed, but a topic that never got its analysis still needs one.
        let current = self.graph.get_topic(&topic.id).await?.unwrap_or_else(|| topic.clone());
        if current.analysis.has_missing_field() {
            self.notifier.notify(&topic.id, ChangeReason::AnalysisMissing);
        }
        Ok(ReplacementOutcome::NoAction)
    }
}

/// Eviction order at hard capacity: lowest priority rank, then oldest publication
/// (unknown dates count as oldest), then article id.
pub fn fallback_order(pool: &[AboutEntry]) -> Vec<&AboutEntry> {
    let mut ordered: Vec<&AboutEntry> = pool.iter().collect();
    ordered.sort_by(|a, b| {
        a.edge
            .priority_rank
            .cmp(&b.edge.priority_rank)
            .then_with(|| match (a.article.published_at, b.article.published_at) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => x.cmp(&y),
            })
            .then_with(|| a.article.id.cmp(&b.article.id))
    });
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::seeded_entry;
    use saga_common::Timeframe;

    #[test]
    fn modes_follow_pool_size() {
        let b = TimeframeBounds { min: 5, max: 10 };
        assert_eq!(TimeframeReplacementPolicy::mode_for(4, b), None);
        assert_eq!(TimeframeReplacementPolicy::mode_for(5, b), Some(ReplacementMode::CanReplace));
        assert_eq!(TimeframeReplacementPolicy::mode_for(9, b), Some(ReplacementMode::CanReplace));
        assert_eq!(TimeframeReplacementPolicy::mode_for(10, b), Some(ReplacementMode::MustReplace));
        assert_eq!(TimeframeReplacementPolicy::mode_for(12, b), Some(ReplacementMode::MustReplace));
    }

    #[test]
    fn fallback_prefers_low_rank_then_oldest() {
        let mut low_new = seeded_entry("t", "low_new", Timeframe::Medium, 1, 1);
        low_new.edge.priority_rank = 1;
        let mut low_old = seeded_entry("t", "low_old", Timeframe::Medium, 1, 48);
        low_old.edge.priority_rank = 1;
        let mut high_old = seeded_entry("t", "high_old", Timeframe::Medium, 3, 500);
        high_old.edge.priority_rank = 3;

        let pool = vec![high_old, low_new, low_old];
        let order: Vec<&str> = fallback_order(&pool).iter().map(|e| e.article.id.as_str()).collect();
        assert_eq!(order, vec!["low_old", "low_new", "high_old"]);
    }

    #[test]
    fn fallback_ties_break_on_id() {
        let a = seeded_entry("t", "b", Timeframe::Medium, 2, 10);
        let mut b = seeded_entry("t", "a", Timeframe::Medium, 2, 10);
        b.article.published_at = a.article.published_at;
        let pool = vec![a, b];
        assert_eq!(fallback_order(&pool)[0].article.id, "a");
    }
}
