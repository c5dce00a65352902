//! Error types for WAL operations.

use thiserror::Error;
use uuid::Uuid;

/// Result type for WAL operations.
pub type WalResult<T> = Result<T, WalError>;

/// Errors that can occur while appending to or reading from a WAL.
#[derive(Debug, Error)]
pub enum WalError {
    /// The WAL has been closed; no further operations are permitted.
    #[error("WAL is closed")]
    Closed,

    /// An entry's checksum did not match its recomputed value.
    #[error("checksum mismatch for entry {id}")]
    ChecksumMismatch {
        /// Entry whose checksum failed verification.
        id: Uuid,
    },

    /// No entry exists with the given id.
    #[error("entry {id} not found")]
    NotFound {
        /// The id that was looked up.
        id: Uuid,
    },

    /// Underlying key-value storage failed.
    #[error("storage error: {0}")]
    Kv(#[from] anyhow::Error),

    /// Entry (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `Truncate` was called with a sequence that is not a valid boundary.
    #[error("invalid truncation boundary: {reason}")]
    InvalidTruncation {
        /// Why the boundary was rejected.
        reason: String,
    },
}

impl WalError {
    /// True if retrying the operation unchanged might succeed (i.e. the
    /// failure is not a structural consequence of the entry itself).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Kv(_))
    }
}
