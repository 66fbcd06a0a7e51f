use std::time::Duration;

use galleria_ai::SimilarityError;
use thiserror::Error;

use crate::collaborator::CollaboratorError;

/// Why a selection request failed as a whole.
#[derive(Error, Debug)]
pub enum SelectError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("context extraction failed: {0}")]
    Extraction(#[source] CollaboratorError),
    #[error("disambiguation failed: {0}")]
    Disambiguation(#[source] CollaboratorError),
    #[error("selection did not finish within {0:?}")]
    DeadlineExceeded(Duration),
}

impl From<SimilarityError> for SelectError {
    fn from(e: SimilarityError) -> Self {
        Self::InvalidInput(e.to_string())
    }
}
