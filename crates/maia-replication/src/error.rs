//! The error taxonomy for replication, conflict resolution, the manager,
//! placement cache, and routing.

use thiserror::Error;
use uuid::Uuid;

/// Result type used throughout this crate.
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// Taxonomic error kinds for the replication core (role, availability,
/// integrity, conflict, configuration).
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// Operation requires this node to be leader.
    #[error("operation requires leader role")]
    NotLeader,

    /// Operation requires this node to be follower.
    #[error("operation requires follower role")]
    NotFollower,

    /// No reachable leader is currently known.
    #[error("leader is unavailable")]
    LeaderUnavailable,

    /// The target region has no configured base URL to route to.
    #[error("region unavailable: {region}")]
    RegionUnavailable {
        /// Region that could not be reached or resolved.
        region: String,
    },

    /// A follower has fallen further behind than its configured max lag.
    #[error("replication lag exceeded: {lag} entries behind")]
    ReplicationLagExceeded {
        /// Entries behind the leader's tail.
        lag: u64,
    },

    /// An entry failed checksum verification during apply.
    #[error("checksum mismatch applying entry {id}")]
    ChecksumMismatch {
        /// Entry that failed verification.
        id: Uuid,
    },

    /// An entry was structurally invalid (unparseable payload, etc).
    #[error("invalid WAL entry: {reason}")]
    InvalidEntry {
        /// Why the entry was rejected.
        reason: String,
    },

    /// The configured resolver is `Reject` and a genuine conflict occurred.
    #[error("write conflict on entry {id}")]
    Conflict {
        /// Entry id in conflict.
        id: Uuid,
    },

    /// No placement is on file for this tenant.
    #[error("placement not found for tenant {tenant_id}")]
    PlacementNotFound {
        /// Tenant that has no placement record.
        tenant_id: String,
    },

    /// The tenant has no replicas configured at all.
    #[error("tenant {tenant_id} is not replicated")]
    TenantNotReplicated {
        /// Tenant with no replication configuration.
        tenant_id: String,
    },

    /// A resource was requested that does not exist in the underlying store.
    #[error("resource not found: {kind} {id}")]
    NotFound {
        /// Resource kind (`memory`, `namespace`, ...).
        kind: &'static str,
        /// Resource id.
        id: String,
    },

    /// The underlying WAL reported an error.
    #[error("WAL error: {0}")]
    Wal(#[from] maia_wal::WalError),

    /// A peer HTTP call failed.
    #[error("replication transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReplicationError {
    /// True if the push/pull loop should simply retry on its next tick
    /// rather than treat this as a hard failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LeaderUnavailable
                | Self::RegionUnavailable { .. }
                | Self::ReplicationLagExceeded { .. }
                | Self::Transport(_)
        )
    }

    /// True if this error reflects a stale view of who the leader is.
    pub fn is_leadership_change(&self) -> bool {
        matches!(self, Self::NotLeader | Self::LeaderUnavailable)
    }
}
