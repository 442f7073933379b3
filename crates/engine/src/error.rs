use stepwise_core::DefinitionError;
use stepwise_storage::StorageError;

use crate::password::HashError;

/// Errors surfaced by the engine to its callers.
///
/// Storage errors are translated at the service boundary: callers never
/// see a raw backend error except wrapped in [`EngineError::Storage`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The resource does not resolve within the caller's scope. The message
    /// never says whether it exists elsewhere.
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// A precondition the caller could have checked.
    #[error("{0}")]
    Validation(String),

    #[error("invalid password")]
    InvalidPassword,

    /// Another request changed the same run first. Safe to retry.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Storage(StorageError),

    #[error(transparent)]
    Hashing(#[from] HashError),
}

impl EngineError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        EngineError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        EngineError::Validation(reason.into())
    }

    /// HTTP-equivalent status for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::NotFound { .. } => 404,
            EngineError::Validation(_) => 400,
            EngineError::InvalidPassword => 401,
            EngineError::Conflict(_) => 409,
            EngineError::Storage(_) | EngineError::Hashing(_) => 500,
        }
    }

    /// Stable machine-readable tag.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "not_found",
            EngineError::Validation(_) => "validation",
            EngineError::InvalidPassword => "invalid_password",
            EngineError::Conflict(_) => "conflict",
            EngineError::Storage(_) => "storage",
            EngineError::Hashing(_) => "hashing",
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::ProcessNotFound { .. } => EngineError::not_found("process"),
            StorageError::StepNotFound { .. } => EngineError::not_found("step"),
            StorageError::FormNotFound { .. } => EngineError::not_found("form"),
            StorageError::ProgressNotFound { .. } => {
                EngineError::not_found("progress for this process and session")
            }
            StorageError::CompletionNotFound { .. } => EngineError::not_found("step completion"),
            StorageError::SubmissionNotFound { .. } => EngineError::not_found("submission"),
            StorageError::ConcurrentConflict { progress_id, .. } => EngineError::Conflict(format!(
                "progress {progress_id} was modified by another request"
            )),
            other => EngineError::Storage(other),
        }
    }
}

impl From<DefinitionError> for EngineError {
    fn from(e: DefinitionError) -> Self {
        EngineError::Validation(e.to_string())
    }
}
