use std::time::Duration;

use thiserror::Error;

/// Failure modes of one oracle decision. Callers match on these to pick fail-open,
/// fail-closed or fallback behaviour.
#[derive(Debug, Error)]
pub enum OracleError {
    /// Output was malformed or out of range.
    #[error("Invalid oracle output: {0}")]
    Invalid(String),

    /// Network, HTTP or backend failure.
    #[error("Oracle unavailable: {0}")]
    Unavailable(String),

    #[error("Oracle timed out after {0:?}")]
    Timeout(Duration),
}

impl OracleError {
    /// Infrastructure failures, as opposed to bad output.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, OracleError::Unavailable(_) | OracleError::Timeout(_))
    }
}

impl From<reqwest::Error> for OracleError {
    fn from(e: reqwest::Error) -> Self {
        OracleError::Unavailable(e.to_string())
    }
}

impl From<serde_json::Error> for OracleError {
    fn from(e: serde_json::Error) -> Self {
        OracleError::Invalid(e.to_string())
    }
}
