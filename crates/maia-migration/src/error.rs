//! Error types for tenant migration.

use thiserror::Error;

/// Errors raised by the migration executor.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// No migration exists with the given id.
    #[error("migration {id} not found")]
    NotFound { id: String },

    /// The tenant already has a non-terminal migration running.
    #[error("a migration is already in progress for tenant {tenant_id}")]
    AlreadyInProgress { tenant_id: String },

    /// The requested target region is the tenant's current primary.
    #[error("invalid target region: {region} is already primary")]
    InvalidTargetRegion { region: String },

    /// The migration was cancelled before completing.
    #[error("migration {id} was cancelled")]
    Cancelled { id: String },

    /// Underlying storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),

    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The replication layer rejected an operation this migration depended on.
    #[error("replication error: {0}")]
    Replication(#[from] maia_replication::ReplicationError),
}
