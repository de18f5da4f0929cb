// src/error.rs
// Standardized error types for Context DNA

use thiserror::Error;

/// Main error type for the Context DNA library
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("schema version mismatch: found {found}, expected {expected}")]
    SchemaMismatch { found: i64, expected: i64 },

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("session cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("object store failure: {0}")]
    ObjectStoreFailure(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation timed out: {0}")]
    Timeout(&'static str),

    #[error("resync required: stream retains events only after seq {latest_seq}")]
    ResyncRequired { latest_seq: u64 },

    #[error("conflicting concurrent write: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Db(rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using ContextError
pub type Result<T> = std::result::Result<T, ContextError>;

impl From<rusqlite::Error> for ContextError {
    /// Classify SQLite errors into the storage taxonomy.
    ///
    /// Constraint failures surface as `ConstraintViolation`, write
    /// contention as `Conflict`, unreadable/corrupt files as
    /// `StorageUnavailable`. Everything else stays a raw `Db` error.
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ffi::ErrorCode;
        match &err {
            rusqlite::Error::SqliteFailure(e, msg) => match e.code {
                ErrorCode::ConstraintViolation => {
                    ContextError::ConstraintViolation(msg.clone().unwrap_or_else(|| e.to_string()))
                }
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    ContextError::Conflict(msg.clone().unwrap_or_else(|| e.to_string()))
                }
                ErrorCode::CannotOpen | ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt => {
                    ContextError::StorageUnavailable(
                        msg.clone().unwrap_or_else(|| e.to_string()),
                    )
                }
                _ => ContextError::Db(err),
            },
            _ => ContextError::Db(err),
        }
    }
}

impl From<redis::RedisError> for ContextError {
    fn from(err: redis::RedisError) -> Self {
        ContextError::CacheUnavailable(err.to_string())
    }
}

impl From<String> for ContextError {
    fn from(s: String) -> Self {
        ContextError::Other(s)
    }
}

impl From<tokio::task::JoinError> for ContextError {
    fn from(err: tokio::task::JoinError) -> Self {
        ContextError::Other(err.to_string())
    }
}

impl ContextError {
    /// Whether the error is a transient SQLite contention condition worth retrying.
    pub fn is_contention(&self) -> bool {
        matches!(self, ContextError::Conflict(_))
    }
}
