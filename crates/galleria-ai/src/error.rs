use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchError {
    #[error("invalid match input: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimilarityError {
    #[error("vector dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("rank input mismatch: {items} items but {scores} scores")]
    LengthMismatch { items: usize, scores: usize },
}

/// Why an embedding could not be obtained.
///
/// Every variant is an "embedding unavailable" outcome; [`is_timeout`]
/// separates timeouts from provider-side failures.
///
/// [`is_timeout`]: EmbeddingError::is_timeout
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Transport(String),
    #[error("embedding request timed out after {0:?}")]
    RequestTimeout(Duration),
    #[error("embedding server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("embedding provider error: {0}")]
    Provider(String),
    #[error("embedding job {job_id} failed: {reason}")]
    JobFailed { job_id: String, reason: String },
    #[error("embedding job {job_id} still pending after {attempts} polls")]
    PollTimeout { job_id: String, attempts: u32 },
    #[error("malformed embedding response: {0}")]
    Malformed(String),
}

impl EmbeddingError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout(_) | Self::PollTimeout { .. })
    }
}
