//! Error types for the SQLite backend.

use stepwise_storage::StorageError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timestamp format error: {0}")]
    Timestamp(#[from] time::error::Format),

    #[error("failed to acquire database lock: {0}")]
    Lock(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<Error> for StorageError {
    fn from(err: Error) -> Self {
        match err {
            Error::Storage(e) => e,
            Error::Database(rusqlite::Error::SqliteFailure(code, msg))
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StorageError::ConstraintViolation {
                    detail: msg.unwrap_or_else(|| code.to_string()),
                }
            }
            other => StorageError::Backend(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_failures_map_to_constraint_violation() {
        let err = Error::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
            Some("UNIQUE constraint failed: processes.slug".to_string()),
        ));
        match StorageError::from(err) {
            StorageError::ConstraintViolation { detail } => assert!(detail.contains("slug")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn storage_errors_pass_through() {
        let err = Error::Storage(StorageError::StepNotFound {
            step_id: "s".to_string(),
        });
        assert!(matches!(
            StorageError::from(err),
            StorageError::StepNotFound { .. }
        ));
    }
}
