//! Shared application state threaded through every axum handler.

use std::sync::Arc;

use tokio::sync::RwLock;

use maia_election::{ElectionConfig, ElectionState, FailoverSupervisor};
use maia_migration::MigrationExecutor;
use maia_replication::{Manager, MemoryStore, PlacementCache, ReplicatedStore};
use maia_wal::{Kv, Wal};

use crate::config::MaiaConfig;

#[derive(Clone)]
pub struct ServiceState {
    pub config: MaiaConfig,
    pub kv: Arc<dyn Kv>,
    pub wal: Arc<dyn Wal>,
    pub store: Arc<ReplicatedStore<MemoryStore>>,
    pub manager: Arc<Manager>,
    pub election: Arc<RwLock<ElectionState>>,
    pub election_config: ElectionConfig,
    pub failover: Arc<FailoverSupervisor>,
    pub placement_cache: Arc<PlacementCache<Manager>>,
    pub migrations: Arc<MigrationExecutor>,
}
