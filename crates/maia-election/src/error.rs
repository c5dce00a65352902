//! Error types for election and failover.

use thiserror::Error;

/// Errors raised by the election state machine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ElectionError {
    /// A leader-only or candidate-only operation was attempted from the
    /// wrong role.
    #[error("node is not currently a candidate")]
    NotCandidate,

    /// A quorum of votes was never reached before the election was
    /// superseded.
    #[error("quorum not achieved")]
    QuorumNotAchieved,

    /// A message or request carried a term older than the current one.
    #[error("stale term: message term {message_term} < current term {current_term}")]
    StaleTerm {
        /// Term carried by the rejected message.
        message_term: u64,
        /// This node's current term.
        current_term: u64,
    },

    /// This node already voted for a different candidate this term.
    #[error("already voted for {voted_for} in term {term}")]
    AlreadyVoted {
        /// Candidate previously voted for.
        voted_for: String,
        /// Term the vote was cast in.
        term: u64,
    },

    /// The operation is not valid in the node's current role.
    #[error("invalid state: {reason}")]
    InvalidState {
        /// Why the state transition was rejected.
        reason: String,
    },

    /// Configuration was invalid.
    #[error("invalid election configuration: {0}")]
    Configuration(String),
}

/// Errors raised by the failover supervisor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FailoverError {
    /// A failover was attempted inside the inhibit window following a
    /// previous one.
    #[error("failover inhibited until inhibit window elapses")]
    Inhibited,

    /// A failover is already underway.
    #[error("failover already in progress")]
    InProgress,

    /// There is no known leader to fail over from.
    #[error("no leader information available")]
    NoLeaderInfo,
}

impl ElectionError {
    /// True if the caller should simply retry the surrounding operation
    /// (e.g. after observing a higher term and becoming a follower).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StaleTerm { .. } | Self::QuorumNotAchieved)
    }
}
