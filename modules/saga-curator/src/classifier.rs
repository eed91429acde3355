use anyhow::anyhow;
use tracing::warn;

use saga_common::{Article, Classification, SagaError, Topic};
use saga_oracle::{Oracle, OracleError};

/// Maps an article to a per-topic classification through the oracle. The oracle adapter
/// already rejects out-of-range scores and unknown timeframes and retries once; this
/// layer turns what is left into `SagaError`.
#[derive(Clone)]
pub struct Classifier {
    oracle: Oracle,
}

impl Classifier {
    pub fn new(oracle: Oracle) -> Self {
        Self { oracle }
    }

    pub async fn classify(&self, topic: &Topic, article: &Article) -> Result<Classification, SagaError> {
        match self.oracle.classify(topic, article).await {
            Ok(c) => Ok(c),
            Err(OracleError::Invalid(msg)) => {
                warn!(topic_id = topic.id.as_str(), article_id = article.id.as_str(), error = msg.as_str(), "Classification invalid after retry");
                Err(SagaError::Validation(format!("classification of {} for {}: {msg}", article.id, topic.id)))
            }
            Err(e) => Err(SagaError::Anyhow(anyhow!("classifier unavailable: {e}"))),
        }
    }
}
