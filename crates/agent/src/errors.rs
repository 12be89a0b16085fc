use thiserror::Error;

use parley_core::errors::{ApplicationError, DomainError};
use parley_db::repositories::RepositoryError;

use crate::collaborators::CollaboratorError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("persistence failure: {0}")]
    Persistence(#[from] RepositoryError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("delivery failed: {0}")]
    Delivery(#[from] CollaboratorError),
    #[error("template rendering failed: {0}")]
    Template(#[from] tera::Error),
}

impl From<PipelineError> for ApplicationError {
    fn from(value: PipelineError) -> Self {
        match value {
            PipelineError::Persistence(RepositoryError::NotFound(message))
            | PipelineError::NotFound(message) => Self::NotFound(message),
            PipelineError::Persistence(error) => Self::Persistence(error.to_string()),
            PipelineError::Domain(error) => Self::Domain(error),
            PipelineError::Delivery(error) => Self::Integration(error.to_string()),
            PipelineError::Template(error) => Self::Configuration(error.to_string()),
        }
    }
}
