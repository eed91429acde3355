//! Wire formats the oracle answers in, and the typed decisions they resolve to.
//!
//! Wire structs are what backends must produce; a wire value that fails to deserialize
//! is `OracleError::Invalid`. Resolution against an allow-list never errors: an answer
//! naming something outside the allow-list resolves to the conservative variant.

use std::collections::HashSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;

use saga_common::{Classification, ImportanceScores, RelationshipType, Tier, Timeframe};

use crate::error::OracleError;

// --- Classification ---

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClassificationOutput {
    pub timeframe: Timeframe,
    /// 0..=3
    pub risk: i64,
    /// 0..=3
    pub opportunity: i64,
    /// 0..=3
    pub trend: i64,
    /// 0..=3
    pub catalyst: i64,
    pub motivation: String,
    pub implications: String,
}

impl ClassificationOutput {
    pub fn validate(self) -> Result<Classification, OracleError> {
        let scores = ImportanceScores::from_raw(self.risk, self.opportunity, self.trend, self.catalyst)
            .map_err(|e| OracleError::Invalid(e.to_string()))?;
        Ok(Classification {
            timeframe: self.timeframe,
            scores,
            motivation: self.motivation.trim().to_string(),
            implications: self.implications.trim().to_string(),
        })
    }
}

// --- Tier conflict ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TierAction {
    DowngradeNew,
    DowngradeExisting,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TierConflictOutput {
    pub action: TierAction,
    /// Article id of the incumbent to demote, for `downgrade_existing`.
    pub victim_id: Option<String>,
    /// Tier the incumbent moves to, for `downgrade_existing`. Must be below the contested tier.
    pub victim_new_tier: Option<i64>,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierDecision {
    DowngradeNew { rationale: String },
    DowngradeExisting { victim_id: String, new_tier: Tier, rationale: String },
    Reject { rationale: String },
}

impl TierConflictOutput {
    /// Resolve against the incumbents that were shown. A missing or unknown victim, or a
    /// target tier not strictly below `tier`, rejects.
    pub fn resolve(self, tier: Tier, allowed: &HashSet<String>) -> TierDecision {
        match self.action {
            TierAction::DowngradeNew => TierDecision::DowngradeNew { rationale: self.rationale },
            TierAction::Reject => TierDecision::Reject { rationale: self.rationale },
            TierAction::DowngradeExisting => {
                let Some(victim_id) = self.victim_id.filter(|id| allowed.contains(id)) else {
                    warn!(tier = tier.value(), "Oracle named no known victim, rejecting");
                    return TierDecision::Reject {
                        rationale: "victim not among incumbents".to_string(),
                    };
                };
                // No explicit target means one tier down.
                let target = match self.victim_new_tier {
                    Some(t) => u8::try_from(t).ok().and_then(Tier::new),
                    None => tier.lower(),
                };
                match target {
                    Some(new_tier) if new_tier < tier => TierDecision::DowngradeExisting {
                        victim_id,
                        new_tier,
                        rationale: self.rationale,
                    },
                    _ => {
                        warn!(
                            tier = tier.value(),
                            victim_new_tier = ?self.victim_new_tier,
                            "Oracle victim tier not below contested tier, rejecting"
                        );
                        TierDecision::Reject {
                            rationale: "victim tier not below contested tier".to_string(),
                        }
                    }
                }
            }
        }
    }
}

// --- Timeframe replacement ---

/// How much say the oracle has over the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplacementMode {
    /// Pool is within bounds; act only if the new item clearly supersedes one.
    CanReplace,
    /// Pool is at capacity; something must go.
    MustReplace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementActionOutput {
    Remove,
    Hide,
    LowerPriority,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReplacementOutput {
    pub action: ReplacementActionOutput,
    /// Article id the action applies to. Null when action is `none`.
    pub article_id: Option<String>,
    pub rationale: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementAction {
    Remove,
    Hide,
    LowerPriority,
}

impl ReplacementAction {
    /// Whether the action shrinks the visible pool.
    pub fn evicts(&self) -> bool {
        matches!(self, ReplacementAction::Remove | ReplacementAction::Hide)
    }
}

impl std::fmt::Display for ReplacementAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplacementAction::Remove => write!(f, "remove"),
            ReplacementAction::Hide => write!(f, "hide"),
            ReplacementAction::LowerPriority => write!(f, "lower_priority"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplacementDecision {
    Keep { rationale: String },
    Act { action: ReplacementAction, article_id: String, rationale: String },
}

impl ReplacementOutput {
    pub fn resolve(self, allowed: &HashSet<String>) -> ReplacementDecision {
        let action = match self.action {
            ReplacementActionOutput::None => {
                return ReplacementDecision::Keep { rationale: self.rationale };
            }
            ReplacementActionOutput::Remove => ReplacementAction::Remove,
            ReplacementActionOutput::Hide => ReplacementAction::Hide,
            ReplacementActionOutput::LowerPriority => ReplacementAction::LowerPriority,
        };
        match self.article_id.filter(|id| allowed.contains(id)) {
            Some(article_id) => ReplacementDecision::Act { action, article_id, rationale: self.rationale },
            None => {
                warn!(%action, "Oracle replacement target not in pool, ignoring");
                ReplacementDecision::Keep {
                    rationale: "target not in pool".to_string(),
                }
            }
        }
    }
}

// --- Relationship edges ---

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ShortlistOutput {
    /// Topic ids plausibly related to the source topic.
    pub topic_ids: Vec<String>,
}

impl ShortlistOutput {
    /// Keep only known candidates, first occurrence wins.
    pub fn resolve(self, allowed: &HashSet<String>) -> Vec<String> {
        let mut seen = HashSet::new();
        self.topic_ids
            .into_iter()
            .filter(|id| allowed.contains(id) && seen.insert(id.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EdgeProposalOutput {
    /// Null when no edge is worth adding.
    pub rel_type: Option<RelationshipType>,
    pub source_id: Option<String>,
    pub target_id: Option<String>,
    pub motivation: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeProposal {
    pub rel_type: RelationshipType,
    pub source: String,
    pub target: String,
    pub motivation: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalDecision {
    NoProposal,
    Propose(EdgeProposal),
    /// The oracle proposed something outside what it was allowed to.
    Invalid(String),
}

impl EdgeProposalOutput {
    /// Proposals must be outgoing from `source` to a shortlisted topic other than itself.
    pub fn resolve(self, source: &str, allowed_targets: &HashSet<String>) -> ProposalDecision {
        let (rel_type, proposed_source, target) = match (self.rel_type, self.source_id, self.target_id) {
            (None, _, _) => return ProposalDecision::NoProposal,
            (Some(rel_type), Some(s), Some(t)) => (rel_type, s, t),
            (Some(_), _, _) => return ProposalDecision::Invalid("proposal missing endpoint".to_string()),
        };
        if proposed_source != source {
            return ProposalDecision::Invalid(format!("source '{proposed_source}' is not '{source}'"));
        }
        if target == source {
            return ProposalDecision::Invalid("self-referencing edge".to_string());
        }
        if !allowed_targets.contains(&target) {
            return ProposalDecision::Invalid(format!("target '{target}' not in shortlist"));
        }
        ProposalDecision::Propose(EdgeProposal {
            rel_type,
            source: proposed_source,
            target,
            motivation: self.motivation,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WeakestEdgeOutput {
    /// Id of the existing edge to remove, or null to keep all of them.
    pub edge_id: Option<String>,
    pub rationale: String,
}

impl WeakestEdgeOutput {
    pub fn resolve(self, allowed: &HashSet<String>) -> Option<String> {
        match self.edge_id {
            Some(id) if allowed.contains(&id) => Some(id),
            Some(id) => {
                warn!(edge_id = id.as_str(), "Oracle nominated unknown edge, ignoring");
                None
            }
            None => None,
        }
    }
}

// --- Topic capacity ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TopicCapacityAction {
    Add,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TopicCapacityOutput {
    pub action: TopicCapacityAction,
    pub rationale: String,
}
