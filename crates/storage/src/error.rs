/// All errors that can be returned by a ProcessStorage implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency control conflict: another transaction updated
    /// the progress record first. The expected version was not found.
    #[error("concurrent conflict on progress {progress_id}: expected version {expected_version}")]
    ConcurrentConflict {
        progress_id: String,
        expected_version: i64,
    },

    #[error("process not found: {key}")]
    ProcessNotFound { key: String },

    #[error("step not found: {step_id}")]
    StepNotFound { step_id: String },

    #[error("form not found: {form_id}")]
    FormNotFound { form_id: String },

    #[error("progress not found: {key}")]
    ProgressNotFound { key: String },

    #[error("step completion not found: {key}")]
    CompletionNotFound { key: String },

    #[error("submission not found: {submission_id}")]
    SubmissionNotFound { submission_id: String },

    /// A uniqueness or referential constraint rejected the write.
    #[error("constraint violation: {detail}")]
    ConstraintViolation { detail: String },

    /// A backend-specific storage error (DB connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::ProcessNotFound { .. }
                | StorageError::StepNotFound { .. }
                | StorageError::FormNotFound { .. }
                | StorageError::ProgressNotFound { .. }
                | StorageError::CompletionNotFound { .. }
                | StorageError::SubmissionNotFound { .. }
        )
    }
}
