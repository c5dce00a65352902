//! **maia-election** — Raft-flavored leader election, simplified: there is
//! no log replication in this protocol, only role/term/vote bookkeeping.
//! The WAL (see `maia-wal`) replicates separately.

mod config;
mod error;
mod state;
mod supervisor;

pub use config::ElectionConfig;
pub use error::{ElectionError, FailoverError};
pub use state::{ElectionState, NodeRole};
pub use supervisor::{FailoverEvent, FailoverSupervisor};

/// Default heartbeat cadence for a leader.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 50;
/// Default lower bound of the randomized election timeout.
pub const DEFAULT_ELECTION_TIMEOUT_MIN_MS: u64 = 150;
/// Default upper bound of the randomized election timeout.
pub const DEFAULT_ELECTION_TIMEOUT_MAX_MS: u64 = 300;
