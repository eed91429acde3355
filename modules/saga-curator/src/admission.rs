//! Tier capacity with cascading demotion.
//!
//! The item being placed and its target tier are loop state. Each round either settles
//! the item (room at the tier) or strictly lowers the tier being contested, so the loop
//! ends within `Tier::TOP + 1` rounds. Tier 0 is unbounded and always settles.
//!
//! Nothing is written until the whole chain has settled. Placements are then applied
//! deepest first: displaced incumbents move down before the new edge is written.

use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use saga_common::{
    AboutEdge, AboutEntry, Article, CapacityConfig, Classification, SagaError, Tier, TierLimit, Topic,
};
use saga_oracle::{Contender, Oracle, OracleError, TierDecision};

use crate::audit::{AuditAction, AuditRecord};
use crate::traits::GraphStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The oracle chose to reject, or answered with something unusable.
    OracleRejected(String),
    OracleUnavailable,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::OracleRejected(r) => write!(f, "rejected: {r}"),
            RejectReason::OracleUnavailable => write!(f, "oracle unavailable"),
        }
    }
}

/// An incumbent moved down to make room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Demotion {
    pub article_id: String,
    pub from: Tier,
    pub to: Tier,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdmitOutcome {
    Admitted { tier: Tier, edge: AboutEdge, demotions: Vec<Demotion> },
    /// The (article, topic) edge already existed; nothing was written.
    AlreadyAdmitted(Tier),
    Rejected(RejectReason),
}

enum Placing {
    New,
    Incumbent { entry: AboutEntry, from: Tier, rationale: String },
}

struct Placement {
    item: Placing,
    tier: Tier,
}

pub struct TierAdmissionController {
    graph: Arc<dyn GraphStore>,
    oracle: Oracle,
    capacity: CapacityConfig,
}

impl TierAdmissionController {
    pub fn new(graph: Arc<dyn GraphStore>, oracle: Oracle, capacity: CapacityConfig) -> Self {
        Self { graph, oracle, capacity }
    }

    /// Place `article` in `topic` at the tier its classification implies, or lower.
    /// Callers must hold the topic lock and must not pass all-zero scores.
    pub async fn admit(
        &self,
        topic: &Topic,
        article: &Article,
        classification: &Classification,
    ) -> Result<AdmitOutcome, SagaError> {
        if let Some(existing) = self.graph.about_edge(&article.id, &topic.id).await? {
            info!(topic_id = topic.id.as_str(), article_id = article.id.as_str(), tier = existing.edge.tier.value(), "Already admitted");
            return Ok(AdmitOutcome::AlreadyAdmitted(existing.edge.tier));
        }

        let timeframe = classification.timeframe;
        let mut placements: Vec<Placement> = Vec::new();
        let mut current = Placing::New;
        let mut tier = classification.tier();
        let mut settled = false;

        for _round in 0..=Tier::TOP.value() {
            let members = self.graph.tier_members(&topic.id, timeframe, tier).await?;
            let max = match self.capacity.tier_limit(tier) {
                TierLimit::Bounded(max) if members.len() as u32 >= max => max,
                _ => {
                    placements.push(Placement { item: current, tier });
                    settled = true;
                    break;
                }
            };

            let contender = match &current {
                Placing::New => Contender {
                    article,
                    scores: classification.scores.capped_at(tier),
                    motivation: &classification.motivation,
                },
                Placing::Incumbent { entry, .. } => Contender {
                    article: &entry.article,
                    scores: entry.edge.scores.capped_at(tier),
                    motivation: &entry.edge.motivation,
                },
            };

            info!(
                topic_id = topic.id.as_str(),
                %timeframe,
                tier = tier.value(),
                count = members.len(),
                max,
                contender = contender.article.id.as_str(),
                "Tier full, consulting oracle"
            );

            let decision = match self
                .oracle
                .resolve_tier_conflict(topic, timeframe, tier, max, &contender, &members)
                .await
            {
                Ok(d) => d,
                Err(OracleError::Invalid(msg)) => {
                    return Err(SagaError::Validation(format!("tier conflict decision for {}: {msg}", topic.id)));
                }
                Err(e) => {
                    warn!(topic_id = topic.id.as_str(), tier = tier.value(), error = %e, "Oracle unavailable for full tier, rejecting");
                    return Ok(AdmitOutcome::Rejected(RejectReason::OracleUnavailable));
                }
            };

            match decision {
                TierDecision::DowngradeNew { rationale } => {
                    // Tier 0 never reaches here: it is unbounded.
                    let Some(lower) = tier.lower() else {
                        placements.push(Placement { item: current, tier });
                        settled = true;
                        break;
                    };
                    info!(topic_id = topic.id.as_str(), from = tier.value(), to = lower.value(), rationale = rationale.as_str(), "Downgrading contender");
                    tier = lower;
                }
                TierDecision::DowngradeExisting { victim_id, new_tier, rationale } => {
                    let Some(victim) = members.into_iter().find(|m| m.article.id == victim_id) else {
                        // resolve() already checked the allow-list; anything else is a store race.
                        return Ok(AdmitOutcome::Rejected(RejectReason::OracleRejected(format!(
                            "victim {victim_id} left tier {tier}"
                        ))));
                    };
                    info!(
                        topic_id = topic.id.as_str(),
                        victim = victim_id.as_str(),
                        from = tier.value(),
                        to = new_tier.value(),
                        "Displacing incumbent"
                    );
                    placements.push(Placement { item: current, tier });
                    current = Placing::Incumbent { entry: victim, from: tier, rationale };
                    tier = new_tier;
                }
                TierDecision::Reject { rationale } => {
                    info!(topic_id = topic.id.as_str(), article_id = article.id.as_str(), tier = tier.value(), rationale = rationale.as_str(), "Admission rejected");
                    return Ok(AdmitOutcome::Rejected(RejectReason::OracleRejected(rationale)));
                }
            }
        }

        if !settled {
            return Err(SagaError::Anyhow(anyhow!("tier admission for {} did not settle", article.id)));
        }

        self.apply(topic, article, classification, placements).await
    }

    async fn apply(
        &self,
        topic: &Topic,
        article: &Article,
        classification: &Classification,
        placements: Vec<Placement>,
    ) -> Result<AdmitOutcome, SagaError> {
        let now = Utc::now();
        let mut demotions = Vec::new();
        let mut admitted: Option<AboutEdge> = None;

        for placement in placements.into_iter().rev() {
            match placement.item {
                Placing::Incumbent { entry, from, rationale } => {
                    let to = placement.tier;
                    let scores = entry.edge.scores.capped_at(to);
                    let reason = format!("displaced from tier {from} by {}: {rationale}", article.id);
                    self.graph
                        .demote_about(&entry.article.id, &topic.id, &scores, to, &reason, now)
                        .await?;

                    AuditRecord::new(AuditAction::AboutDemoted, &topic.id, &entry.article.id, "oracle")
                        .before(&json!({ "tier": from.value(), "scores": entry.edge.scores }))
                        .after(&json!({ "tier": to.value(), "scores": scores }))
                        .rationale(rationale)
                        .emit();

                    demotions.push(Demotion {
                        article_id: entry.article.id,
                        from,
                        to,
                    });
                }
                Placing::New => {
                    let edge = AboutEdge::admitted(&article.id, &topic.id, classification, placement.tier, now);
                    self.graph.write_about(article, &edge).await?;

                    AuditRecord::new(AuditAction::AboutWritten, &topic.id, &article.id, "capacity")
                        .after(&edge)
                        .emit();
                    admitted = Some(edge);
                }
            }
        }

        let edge = admitted.ok_or_else(|| SagaError::Anyhow(anyhow!("admission chain without new item")))?;
        info!(
            topic_id = topic.id.as_str(),
            article_id = article.id.as_str(),
            tier = edge.tier.value(),
            demotions = demotions.len(),
            "Article admitted"
        );
        Ok(AdmitOutcome::Admitted { tier: edge.tier, edge, demotions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{article, classification, seeded_entry, MemoryGraph, ScriptedOracle};
    use saga_common::{OracleConfig, Timeframe};
    use saga_oracle::DecisionKind;

    fn controller(graph: Arc<MemoryGraph>, script: Arc<ScriptedOracle>, tier3: u32) -> TierAdmissionController {
        let mut capacity = CapacityConfig::default();
        capacity.tier_limits.tier3 = tier3;
        TierAdmissionController::new(graph, Oracle::new(script, &OracleConfig::default()), capacity)
    }

    #[tokio::test]
    async fn room_at_tier_admits_without_oracle() {
        let graph = Arc::new(MemoryGraph::new().with_topic(Topic::new("eurusd", "EUR/USD", 1)));
        let script = Arc::new(ScriptedOracle::new());
        let topic = graph.topic("eurusd").unwrap();

        let c = classification(Timeframe::Immediate, [3, 0, 0, 0]);
        let out = controller(graph.clone(), script.clone(), 2)
            .admit(&topic, &article("c", 0), &c)
            .await
            .unwrap();

        assert!(matches!(out, AdmitOutcome::Admitted { tier, .. } if tier == Tier::TOP));
        assert_eq!(script.total_calls(), 0);
    }

    #[tokio::test]
    async fn missing_topic_fails_admission_without_writing() {
        let graph = Arc::new(MemoryGraph::new());
        let script = Arc::new(ScriptedOracle::new());
        let topic = Topic::new("eurusd", "EUR/USD", 1);

        let c = classification(Timeframe::Immediate, [1, 0, 0, 0]);
        let result = controller(graph.clone(), script, 2)
            .admit(&topic, &article("c", 0), &c)
            .await;

        assert!(result.is_err());
        assert!(graph.about_edges("eurusd").is_empty());
        assert!(!graph.has_article("c"));
    }

    #[tokio::test]
    async fn second_admit_is_no_op() {
        let graph = Arc::new(MemoryGraph::new().with_topic(Topic::new("eurusd", "EUR/USD", 1)));
        let script = Arc::new(ScriptedOracle::new());
        let topic = graph.topic("eurusd").unwrap();
        let ctl = controller(graph.clone(), script, 2);
        let c = classification(Timeframe::Immediate, [0, 2, 0, 0]);

        ctl.admit(&topic, &article("c", 0), &c).await.unwrap();
        let before = graph.about_edges("eurusd");
        let again = ctl.admit(&topic, &article("c", 0), &c).await.unwrap();

        assert_eq!(again, AdmitOutcome::AlreadyAdmitted(Tier::new(2).unwrap()));
        assert_eq!(graph.about_edges("eurusd"), before);
    }

    #[tokio::test]
    async fn unavailable_oracle_rejects_when_full() {
        let graph = Arc::new(
            MemoryGraph::new()
                .with_topic(Topic::new("eurusd", "EUR/USD", 1))
                .with_entry(seeded_entry("eurusd", "a", Timeframe::Immediate, 3, 5))
                .with_entry(seeded_entry("eurusd", "b", Timeframe::Immediate, 3, 4)),
        );
        let script = Arc::new(ScriptedOracle::new());
        let topic = graph.topic("eurusd").unwrap();

        let c = classification(Timeframe::Immediate, [3, 0, 0, 0]);
        let out = controller(graph.clone(), script, 2)
            .admit(&topic, &article("c", 0), &c)
            .await
            .unwrap();

        assert_eq!(out, AdmitOutcome::Rejected(RejectReason::OracleUnavailable));
        assert!(!graph.has_article("c"));
    }

    #[tokio::test]
    async fn invalid_decision_after_retry_is_hard_error() {
        let graph = Arc::new(
            MemoryGraph::new()
                .with_topic(Topic::new("eurusd", "EUR/USD", 1))
                .with_entry(seeded_entry("eurusd", "a", Timeframe::Immediate, 3, 5)),
        );
        let script = Arc::new(
            ScriptedOracle::new()
                .always(DecisionKind::TierConflict, serde_json::json!({ "action": "evict_everyone" })),
        );
        let topic = graph.topic("eurusd").unwrap();

        let c = classification(Timeframe::Immediate, [3, 0, 0, 0]);
        let err = controller(graph, script.clone(), 1)
            .admit(&topic, &article("c", 0), &c)
            .await
            .unwrap_err();

        assert!(matches!(err, SagaError::Validation(_)));
        assert_eq!(script.call_count(DecisionKind::TierConflict), 2);
    }
}
