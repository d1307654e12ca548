//! Error types for paideia-storage

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Remote store error: {0}")]
    Remote(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Map a rusqlite error, keeping uniqueness failures as their own kind
    /// so callers can treat them as recoverable.
    pub(crate) fn from_sql(context: &str, e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StorageError::Constraint(format!("{}: {}", context, e))
            }
            _ => StorageError::Internal(format!("{}: {}", context, e)),
        }
    }
}
