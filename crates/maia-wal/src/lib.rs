//! **maia-wal** — the durable, ordered, checksummed write-ahead log that is
//! the ground truth of MAIA replication.
//!
//! ```no_run
//! use std::sync::Arc;
//! use maia_wal::{KvWal, MemoryKv, Wal};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let wal = KvWal::open(Arc::new(MemoryKv::new()), "eu-central-1").await?;
//! let seq = wal.position().await?;
//! assert_eq!(seq, 0);
//! # Ok(())
//! # }
//! ```

mod entry;
mod error;
mod kv;
mod wal;

pub use entry::{Operation, ResourceType, WalEntry};
pub use error::{WalError, WalResult};
pub use kv::{Kv, MemoryKv};
pub use wal::{KvWal, Wal};

/// Sequence keys are zero-padded to this many digits in the underlying KV.
pub const SEQUENCE_KEY_WIDTH: usize = 20;
