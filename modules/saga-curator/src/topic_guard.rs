use std::sync::Arc;

use tracing::{info, warn};

use saga_common::{SagaError, Topic};
use saga_oracle::{Oracle, OracleError, TopicCapacityAction};

use crate::audit::{AuditAction, AuditRecord};
use crate::traits::TopicStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposeOutcome {
    Created,
    AlreadyExists,
    Rejected(String),
}

/// Soft cap on the number of topics. Below `max_topics` new topics are created directly;
/// at the cap the oracle decides. Infrastructure failures fail open.
pub struct TopicGuard {
    store: Arc<dyn TopicStore>,
    oracle: Oracle,
    max_topics: u32,
}

impl TopicGuard {
    pub fn new(store: Arc<dyn TopicStore>, oracle: Oracle, max_topics: u32) -> Self {
        Self { store, oracle, max_topics }
    }

    pub async fn propose_topic(&self, topic: Topic) -> Result<ProposeOutcome, SagaError> {
        if topic.id.trim().is_empty() {
            return Err(SagaError::Validation("topic id must not be empty".to_string()));
        }
        if !(1..=5).contains(&topic.priority) {
            return Err(SagaError::Validation(format!(
                "topic {} priority {} outside 1..=5",
                topic.id, topic.priority
            )));
        }
        if self.store.get_topic(&topic.id).await?.is_some() {
            return Ok(ProposeOutcome::AlreadyExists);
        }

        let count = self.store.count_topics().await?;
        let mut decided_by = "capacity";
        if count >= self.max_topics {
            let existing = self.store.list_topics().await?;
            match self.oracle.topic_capacity(&topic, &existing, self.max_topics).await {
                Ok(TopicCapacityAction::Add) => decided_by = "oracle",
                Ok(TopicCapacityAction::Reject) => {
                    info!(topic_id = topic.id.as_str(), count, max = self.max_topics, "Topic rejected at capacity");
                    return Ok(ProposeOutcome::Rejected(format!(
                        "{count} topics at limit {}",
                        self.max_topics
                    )));
                }
                Err(OracleError::Invalid(msg)) => {
                    return Err(SagaError::Validation(format!("topic capacity decision for {}: {msg}", topic.id)));
                }
                Err(e) => {
                    warn!(topic_id = topic.id.as_str(), error = %e, "Topic capacity check unavailable, creating anyway");
                    decided_by = "fail_open";
                }
            }
        }

        if !self.store.create_topic(&topic).await? {
            return Ok(ProposeOutcome::AlreadyExists);
        }
        AuditRecord::new(AuditAction::TopicCreated, &topic.id, &topic.id, decided_by)
            .after(&topic)
            .emit();
        info!(topic_id = topic.id.as_str(), priority = topic.priority, "Topic created");
        Ok(ProposeOutcome::Created)
    }
}
