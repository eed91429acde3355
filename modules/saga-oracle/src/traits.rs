use async_trait::async_trait;

use crate::error::OracleError;

/// Which decision is being asked for. Backends may route on it; scripted oracles key
/// their responses by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionKind {
    Classify,
    TierConflict,
    Replacement,
    Shortlist,
    ProposeEdge,
    WeakestEdge,
    TopicCapacity,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::Classify => "classify",
            DecisionKind::TierConflict => "tier_conflict",
            DecisionKind::Replacement => "replacement",
            DecisionKind::Shortlist => "shortlist",
            DecisionKind::ProposeEdge => "propose_edge",
            DecisionKind::WeakestEdge => "weakest_edge",
            DecisionKind::TopicCapacity => "topic_capacity",
        }
    }
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decision request: rendered prompt text for language-model backends, the JSON
/// schema the answer must follow, and the structured context the prompt was built from.
#[derive(Debug, Clone)]
pub struct OracleRequest {
    pub kind: DecisionKind,
    pub system: String,
    pub prompt: String,
    pub schema: serde_json::Value,
    pub context: serde_json::Value,
}

/// Anything that can answer a decision request: a model call, a rules engine, a human.
/// Returns the raw decision; the `Oracle` adapter owns parsing and validation.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn decide(&self, request: &OracleRequest) -> Result<serde_json::Value, OracleError>;
}
