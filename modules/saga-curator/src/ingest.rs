use std::sync::Arc;

use tracing::info;

use saga_common::{AboutEntry, Article, SagaError, Tier, Topic};

use crate::admission::{AdmitOutcome, RejectReason, TierAdmissionController};
use crate::classifier::Classifier;
use crate::locks::TopicLocks;
use crate::replacement::{ReplacementOutcome, TimeframeReplacementPolicy};
use crate::traits::GraphStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestSkip {
    /// All four scores were zero.
    ZeroImportance,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Admitted { tier: Tier, replacement: ReplacementOutcome },
    AlreadyAdmitted(Tier),
    Rejected(RejectReason),
    Skipped(IngestSkip),
}

/// One article into one topic: classify, admit at a tier, then keep the timeframe pool
/// bounded. The whole sequence runs under the topic's lock.
pub struct Ingestor {
    graph: Arc<dyn GraphStore>,
    classifier: Classifier,
    admission: TierAdmissionController,
    replacement: TimeframeReplacementPolicy,
    locks: Arc<TopicLocks>,
}

impl Ingestor {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        classifier: Classifier,
        admission: TierAdmissionController,
        replacement: TimeframeReplacementPolicy,
        locks: Arc<TopicLocks>,
    ) -> Self {
        Self { graph, classifier, admission, replacement, locks }
    }

    pub async fn ingest(&self, topic: &Topic, article: Article) -> Result<IngestOutcome, SagaError> {
        let article = article.with_content_id();
        let _guard = self.locks.lock(&topic.id).await;

        // Skip the classifier entirely for articles this topic already holds.
        if let Some(existing) = self.graph.about_edge(&article.id, &topic.id).await? {
            return Ok(IngestOutcome::AlreadyAdmitted(existing.edge.tier));
        }

        let classification = self.classifier.classify(topic, &article).await?;
        if classification.scores.is_zero() {
            info!(topic_id = topic.id.as_str(), article_id = article.id.as_str(), "Zero importance, skipping");
            return Ok(IngestOutcome::Skipped(IngestSkip::ZeroImportance));
        }

        match self.admission.admit(topic, &article, &classification).await? {
            AdmitOutcome::Admitted { tier, edge, .. } => {
                let entry = AboutEntry { article, edge };
                let replacement = self.replacement.apply(topic, &entry).await?;
                Ok(IngestOutcome::Admitted { tier, replacement })
            }
            AdmitOutcome::AlreadyAdmitted(tier) => Ok(IngestOutcome::AlreadyAdmitted(tier)),
            AdmitOutcome::Rejected(reason) => Ok(IngestOutcome::Rejected(reason)),
        }
    }
}
