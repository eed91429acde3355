//! Relationship Edge Capacity Manager.
//!
//! Shortlist candidates, ask for the single strongest new edge, then enforce
//! `max_links_per_type` on the source's outgoing edges of that type. Fails closed:
//! without a valid removal nomination at the cap, nothing is added.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use saga_common::{CapacityConfig, RelationshipEdge, RelationshipType, SagaError, Topic};
use saga_oracle::{EdgeProposal, Oracle, OracleError, ProposalDecision};

use crate::audit::{AuditAction, AuditRecord};
use crate::locks::TopicLocks;
use crate::traits::GraphStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NoCandidates,
    NoProposal,
    InvalidProposal(String),
    Duplicate(String),
    NoRemovalRecommended,
    OracleUnavailable,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoCandidates => write!(f, "no candidates"),
            SkipReason::NoProposal => write!(f, "no proposal"),
            SkipReason::InvalidProposal(r) => write!(f, "invalid proposal: {r}"),
            SkipReason::Duplicate(id) => write!(f, "duplicate edge {id}"),
            SkipReason::NoRemovalRecommended => write!(f, "at capacity, no removal recommended"),
            SkipReason::OracleUnavailable => write!(f, "oracle unavailable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkOutcome {
    Added(RelationshipEdge),
    Replaced { added: RelationshipEdge, removed: RelationshipEdge },
    Skipped(SkipReason),
}

pub struct RelationshipManager {
    graph: Arc<dyn GraphStore>,
    oracle: Oracle,
    capacity: CapacityConfig,
    locks: Arc<TopicLocks>,
}

impl RelationshipManager {
    pub fn new(graph: Arc<dyn GraphStore>, oracle: Oracle, capacity: CapacityConfig, locks: Arc<TopicLocks>) -> Self {
        Self { graph, oracle, capacity, locks }
    }

    /// Propose and apply at most one new outgoing edge for `source_id`.
    pub async fn link(&self, source_id: &str) -> Result<LinkOutcome, SagaError> {
        let _guard = self.locks.lock(source_id).await;

        let source = self
            .graph
            .get_topic(source_id)
            .await?
            .ok_or_else(|| SagaError::TopicNotFound(source_id.to_string()))?;

        let candidates: Vec<Topic> = self
            .graph
            .list_topics()
            .await?
            .into_iter()
            .filter(|t| t.id != source.id)
            .collect();
        if candidates.is_empty() {
            return Ok(LinkOutcome::Skipped(SkipReason::NoCandidates));
        }

        let shortlist_ids = match self.oracle.shortlist(&source, &candidates).await {
            Ok(ids) => ids,
            Err(e) => return skip_or_fail(&source, "shortlist", e),
        };
        let shortlist: Vec<Topic> = shortlist_ids
            .iter()
            .filter_map(|id| candidates.iter().find(|t| &t.id == id).cloned())
            .collect();
        if shortlist.is_empty() {
            info!(source = source.id.as_str(), "Empty shortlist");
            return Ok(LinkOutcome::Skipped(SkipReason::NoCandidates));
        }

        let mut existing = Vec::new();
        for rel_type in RelationshipType::ALL {
            existing.extend(self.graph.relationships_from(&source.id, rel_type).await?);
        }

        let proposal = match self.oracle.propose_edge(&source, &shortlist, &existing).await {
            Ok(ProposalDecision::Propose(p)) => p,
            Ok(ProposalDecision::NoProposal) => return Ok(LinkOutcome::Skipped(SkipReason::NoProposal)),
            Ok(ProposalDecision::Invalid(reason)) => {
                warn!(source = source.id.as_str(), reason = reason.as_str(), "Invalid edge proposal");
                return Ok(LinkOutcome::Skipped(SkipReason::InvalidProposal(reason)));
            }
            Err(e) => return skip_or_fail(&source, "propose_edge", e),
        };

        let edge = RelationshipEdge::new(
            proposal.rel_type,
            &proposal.source,
            &proposal.target,
            proposal.motivation.clone(),
            Utc::now(),
        );
        if self.graph.relationship_exists(edge.rel_type, &edge.id).await? {
            info!(edge_id = edge.id.as_str(), "Relationship already present");
            return Ok(LinkOutcome::Skipped(SkipReason::Duplicate(edge.id)));
        }

        let of_type: Vec<RelationshipEdge> = existing
            .into_iter()
            .filter(|e| e.rel_type == proposal.rel_type)
            .collect();

        if (of_type.len() as u32) < self.capacity.max_links_per_type {
            self.add(&edge).await?;
            return Ok(LinkOutcome::Added(edge));
        }

        self.replace(&source, edge, &proposal, of_type).await
    }

    async fn replace(
        &self,
        source: &Topic,
        edge: RelationshipEdge,
        proposal: &EdgeProposal,
        of_type: Vec<RelationshipEdge>,
    ) -> Result<LinkOutcome, SagaError> {
        info!(
            source = source.id.as_str(),
            rel_type = edge.rel_type.as_str(),
            count = of_type.len(),
            max = self.capacity.max_links_per_type,
            "Relationship type at capacity"
        );

        let weakest = match self.oracle.weakest_edge(source, edge.rel_type, &of_type, proposal).await {
            Ok(Some(id)) => id,
            Ok(None) => return Ok(LinkOutcome::Skipped(SkipReason::NoRemovalRecommended)),
            Err(e) => return skip_or_fail(source, "weakest_edge", e),
        };
        let Some(removed) = of_type.into_iter().find(|e| e.id == weakest) else {
            return Ok(LinkOutcome::Skipped(SkipReason::NoRemovalRecommended));
        };

        self.graph.delete_relationship(removed.rel_type, &removed.id).await?;
        AuditRecord::new(AuditAction::RelationshipRemoved, &source.id, &removed.id, "oracle")
            .before(&removed)
            .rationale(format!("replaced by {}", edge.id))
            .emit();

        self.add(&edge).await?;
        Ok(LinkOutcome::Replaced { added: edge, removed })
    }

    async fn add(&self, edge: &RelationshipEdge) -> Result<(), SagaError> {
        self.graph.upsert_relationship(edge).await?;
        AuditRecord::new(AuditAction::RelationshipAdded, &edge.source, &edge.id, "oracle")
            .after(edge)
            .rationale(edge.motivation.clone())
            .emit();
        info!(edge_id = edge.id.as_str(), source = edge.source.as_str(), target = edge.target.as_str(), "Relationship added");
        Ok(())
    }
}

fn skip_or_fail(source: &Topic, step: &str, e: OracleError) -> Result<LinkOutcome, SagaError> {
    match e {
        OracleError::Invalid(msg) => Err(SagaError::Validation(format!("{step} for {}: {msg}", source.id))),
        e => {
            warn!(source = source.id.as_str(), step, error = %e, "Oracle unavailable, skipping linking");
            Ok(LinkOutcome::Skipped(SkipReason::OracleUnavailable))
        }
    }
}
