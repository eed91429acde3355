use thiserror::Error;

#[derive(Error, Debug)]
pub enum SagaError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// The claim write returned no row, or a row for a different topic.
    #[error("Claim failed for topic {0}")]
    ClaimFailed(String),

    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl SagaError {
    /// Errors that abort the whole process rather than a single job.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SagaError::ClaimFailed(_) | SagaError::Config(_))
    }
}
