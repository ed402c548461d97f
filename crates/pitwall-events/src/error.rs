//! Error types for event classification and storage.

use pitwall_db::PoolError;
use rusqlite::ErrorCode;

use crate::event::EventKind;

/// Errors raised while deciding what an inbound payload is.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClassifyError {
    /// The payload matches neither event shape.
    #[error("unrecognized payload shape")]
    Unrecognized,

    /// The payload matched a kind's shape but lacks one of its required fields.
    #[error("missing required fields for {0}")]
    MissingFields(EventKind),

    /// A field is present but holds an unusable value.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        /// The offending field name as it appears on the wire.
        field: &'static str,
        /// Why the value was refused.
        reason: String,
    },
}

/// Errors that can occur during event store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store could not be reached (open, checkout, I/O).
    #[error("event store unavailable: {0}")]
    Unavailable(String),

    /// A database operation failed for a reason other than reachability,
    /// including lock contention outlasting the busy timeout.
    #[error("event store database error: {0}")]
    Database(rusqlite::Error),

    /// JSON serialization or deserialization failed.
    #[error("event store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be decoded.
    #[error("event store holds a corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether this error means the store is unreachable rather than broken.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(
                ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::DiskFull
                | ErrorCode::PermissionDenied,
            ) => Self::Unavailable(err.to_string()),
            _ => Self::Database(err),
        }
    }
}

impl From<PoolError> for StoreError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::PoolInit(_) | PoolError::Checkout(_) => Self::Unavailable(err.to_string()),
            // The database opened but its schema could not be migrated.
            PoolError::Migration(_) => Self::Corrupt(err.to_string()),
        }
    }
}
