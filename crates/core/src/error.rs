use tern_model::{ErrorKind, ModelProviderError};
use thiserror::Error;

use crate::checkpoint::CheckpointError;

/// Errors that abort an agent run.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model request failed, after retries if the failure was transient.
    #[error("model request failed: {0}")]
    Model(#[from] ModelError),
    /// The conversation state could not be loaded or saved.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// A type-erased error from a model provider.
#[derive(Clone, Debug, Error)]
#[error("{message} ({kind})")]
pub struct ModelError {
    kind: ErrorKind,
    message: String,
}

impl ModelError {
    pub(crate) fn from_provider<E: ModelProviderError>(err: &E) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Returns the kind reported by the provider.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message reported by the provider.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}
