//! Orchestrates the push loop (leader), pull loop (follower), the follower
//! roster, tenant placements, and `applyEntry` — the heart of convergence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use maia_wal::{Operation, Wal, WalEntry};

use crate::error::{ReplicationError, ReplicationResult};
use crate::placement::{PlacementSource, TenantPlacement};
use crate::resolver::ConflictResolver;
use crate::store::{Memory, Namespace, Store};

/// Whether this node currently accepts writes, only replicates from a
/// leader, or runs with no peers at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Leader,
    Follower,
    Standalone,
}

/// How aggressively the push loop waits for follower acknowledgement.
/// `Sync` is reserved: today it behaves exactly like `SemiSync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Async,
    SemiSync,
    Sync,
}

/// Static configuration for a follower, set by the operator API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowerConfig {
    pub id: String,
    pub endpoint: String,
    pub region: String,
    pub priority: u32,
    pub max_lag: u64,
}

/// Mutable, frequently-updated follower health, behind its own lock so
/// push workers never contend on the roster-level map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FollowerStatus {
    pub connected: bool,
    pub last_seen: Option<chrono::DateTime<Utc>>,
    pub last_error: Option<String>,
    pub bytes_sent: u64,
    pub entries_sent: u64,
    pub last_push_seq: u64,
}

struct Follower {
    config: FollowerConfig,
    status: RwLock<FollowerStatus>,
}

/// Runtime-mutable manager configuration (role can flip under failover).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub node_id: String,
    pub region: String,
    pub role: Role,
    pub push_interval: Duration,
    pub pull_interval: Duration,
    pub batch_size: usize,
    pub leader_endpoint: Option<String>,
    pub sync_mode: SyncMode,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            node_id: "node-1".to_string(),
            region: "local".to_string(),
            role: Role::Standalone,
            push_interval: Duration::from_millis(200),
            pull_interval: Duration::from_millis(200),
            batch_size: 100,
            leader_endpoint: None,
            sync_mode: SyncMode::Async,
        }
    }
}

/// The replication manager: follower roster, tenant placements, push/pull
/// workers, and the idempotent `applyEntry` convergence algorithm.
pub struct Manager {
    config: RwLock<ManagerConfig>,
    wal: Arc<dyn Wal>,
    store: Arc<dyn Store>,
    resolver: Arc<dyn ConflictResolver>,
    followers: DashMap<String, Arc<Follower>>,
    placements: DashMap<String, TenantPlacement>,
    http: reqwest::Client,
    conflicts: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    /// Set by the caller to the same [`Notify`] a `ReplicatedStore` signals
    /// on every commit, so push workers can wake immediately instead of
    /// waiting out their `push_interval`. Purely a latency optimization.
    commit_notify: RwLock<Option<Arc<Notify>>>,
}

impl Manager {
    pub fn new(
        config: ManagerConfig,
        wal: Arc<dyn Wal>,
        store: Arc<dyn Store>,
        resolver: Arc<dyn ConflictResolver>,
    ) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Arc::new(Self {
            config: RwLock::new(config),
            wal,
            store,
            resolver,
            followers: DashMap::new(),
            placements: DashMap::new(),
            http: reqwest::Client::new(),
            conflicts: AtomicU64::new(0),
            shutdown_tx,
            shutdown_rx,
            commit_notify: RwLock::new(None),
        })
    }

    /// Wire this manager's push workers to wake on a `ReplicatedStore`'s
    /// commit notifications rather than only on `push_interval` ticks.
    pub async fn set_commit_notify(&self, notify: Arc<Notify>) {
        *self.commit_notify.write().await = Some(notify);
    }

    pub async fn role(&self) -> Role {
        self.config.read().await.role
    }

    pub async fn region(&self) -> String {
        self.config.read().await.region.clone()
    }

    /// Current WAL tail, for callers (e.g. the migration executor) that
    /// need a starting position without reaching into the WAL directly.
    pub async fn wal_position(&self) -> ReplicationResult<u64> {
        Ok(self.wal.position().await?)
    }

    pub async fn set_role(&self, role: Role) {
        self.config.write().await.role = role;
    }

    pub async fn leader_endpoint(&self) -> Option<String> {
        self.config.read().await.leader_endpoint.clone()
    }

    pub async fn set_leader_endpoint(&self, endpoint: Option<String>) {
        self.config.write().await.leader_endpoint = endpoint;
    }

    pub fn conflict_count(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    pub fn add_follower(&self, config: FollowerConfig) {
        let id = config.id.clone();
        self.followers.insert(
            id,
            Arc::new(Follower { config, status: RwLock::new(FollowerStatus::default()) }),
        );
    }

    pub fn remove_follower(&self, id: &str) {
        self.followers.remove(id);
    }

    pub async fn follower_statuses(&self) -> Vec<(FollowerConfig, FollowerStatus)> {
        let mut out = Vec::new();
        for entry in self.followers.iter() {
            let status = entry.status.read().await.clone();
            out.push((entry.config.clone(), status));
        }
        out
    }

    pub fn set_placement(&self, placement: TenantPlacement) {
        self.placements.insert(placement.tenant_id.clone(), placement);
    }

    pub fn remove_placement(&self, tenant_id: &str) {
        self.placements.remove(tenant_id);
    }

    pub fn get_placement(&self, tenant_id: &str) -> Option<TenantPlacement> {
        self.placements.get(tenant_id).map(|r| r.clone())
    }

    /// True when the placement mode is `global`, the primary or a replica
    /// is the local region, or no placement is configured at all (writes
    /// default to local in that case).
    pub async fn is_local_tenant(&self, tenant_id: &str) -> bool {
        let region = self.config.read().await.region.clone();
        match self.get_placement(tenant_id) {
            Some(placement) => placement.is_local(&region),
            None => true,
        }
    }

    /// Stop every worker spawned by [`Manager::run`] and wait for them to
    /// drain their current iteration.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Spawn the workers appropriate to the manager's current role: one
    /// push worker per follower if leading, one pull worker if following.
    pub async fn run(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let role = self.role().await;
        let mut handles = Vec::new();
        match role {
            Role::Leader => {
                for entry in self.followers.iter() {
                    handles.push(self.clone().spawn_push_worker(entry.key().clone()));
                }
            }
            Role::Follower => {
                handles.push(self.clone().spawn_pull_worker());
            }
            Role::Standalone => {}
        }
        handles
    }

    fn spawn_push_worker(self: Arc<Self>, follower_id: String) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut shutdown = self.shutdown_rx.clone();
            loop {
                let interval = self.config.read().await.push_interval;
                let notify = self.commit_notify.read().await.clone();
                let wake_on_commit = async {
                    match &notify {
                        Some(n) => n.notified().await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = wake_on_commit => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
                if *shutdown.borrow() {
                    break;
                }
                if let Err(e) = self.push_once(&follower_id).await {
                    warn!(follower_id, error = %e, "push cycle failed");
                }
            }
        })
    }

    async fn push_once(&self, follower_id: &str) -> ReplicationResult<()> {
        let Some(follower) = self.followers.get(follower_id).map(|r| r.clone()) else {
            return Ok(());
        };
        let after = follower.status.read().await.last_push_seq;
        let batch_size = self.config.read().await.batch_size;
        let entries = self.wal.read(after, batch_size).await?;
        if entries.is_empty() {
            return Ok(());
        }

        let url = format!("{}/replication/entries", follower.config.endpoint);
        let body_len: u64 = entries.iter().map(|e| approximate_size(e)).sum();
        let response = self.http.post(&url).json(&entries).send().await;

        let mut status = follower.status.write().await;
        match response {
            Ok(resp) if resp.status().is_success() => {
                status.last_push_seq = entries.last().map(|e| e.sequence).unwrap_or(status.last_push_seq);
                status.bytes_sent += body_len;
                status.entries_sent += entries.len() as u64;
                status.last_seen = Some(Utc::now());
                status.last_error = None;
                status.connected = true;
                debug!(follower_id, pushed = entries.len(), "pushed batch");
                Ok(())
            }
            Ok(resp) => {
                status.connected = false;
                status.last_error = Some(format!("HTTP {}", resp.status()));
                Ok(())
            }
            Err(e) => {
                status.connected = false;
                status.last_error = Some(e.to_string());
                Ok(())
            }
        }
    }

    fn spawn_pull_worker(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut shutdown = self.shutdown_rx.clone();
            loop {
                let interval = self.config.read().await.pull_interval;
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
                if *shutdown.borrow() {
                    break;
                }
                if let Err(e) = self.pull_once().await {
                    warn!(error = %e, "pull cycle failed");
                }
            }
        })
    }

    async fn pull_once(&self) -> ReplicationResult<()> {
        let leader_endpoint = self.config.read().await.leader_endpoint.clone();
        let Some(leader_endpoint) = leader_endpoint else {
            return Ok(());
        };
        let local_tail = self.wal.position().await?;
        let batch_size = self.config.read().await.batch_size;
        let url = format!(
            "{leader_endpoint}/replication/entries?after={local_tail}&limit={batch_size}"
        );
        let entries: Vec<WalEntry> = self.http.get(&url).send().await?.json().await?;
        for entry in entries {
            if let Err(e) = self.apply_entry(entry).await {
                warn!(error = %e, "apply failed; will retry next tick");
                return Ok(());
            }
        }
        Ok(())
    }

    /// Apply a (possibly remote) entry idempotently: verify, resolve any
    /// conflict, append locally, then mutate the underlying store.
    pub async fn apply_entry(&self, mut entry: WalEntry) -> ReplicationResult<()> {
        if !entry.verify_checksum() {
            return Err(ReplicationError::ChecksumMismatch { id: entry.id });
        }

        let to_apply = match self.wal.get_entry(entry.id).await {
            Ok(local) => {
                let winner = self.resolver.resolve(&local, &entry).await?;
                self.conflicts.fetch_add(1, Ordering::Relaxed);
                winner
            }
            Err(maia_wal::WalError::NotFound { .. }) => entry.clone(),
            Err(e) => return Err(e.into()),
        };

        entry = to_apply;
        entry.replicated = true;
        self.wal.append(entry.clone()).await?;

        self.dispatch(&entry).await
    }

    async fn dispatch(&self, entry: &WalEntry) -> ReplicationResult<()> {
        match entry.resource_type.as_str() {
            "memory" => self.apply_memory(entry).await,
            "namespace" => self.apply_namespace(entry).await,
            other => {
                debug!(resource_type = other, id = %entry.id, "unknown resource type; skipping apply");
                Ok(())
            }
        }
    }

    async fn apply_memory(&self, entry: &WalEntry) -> ReplicationResult<()> {
        match entry.operation {
            Operation::Delete => {
                self.store.delete_memory(&entry.tenant_id, &entry.resource_id).await
            }
            Operation::Create | Operation::Update => {
                let mut memory: Memory = serde_json::from_value(entry.data.clone())?;
                memory.tenant_id = entry.tenant_id.clone();
                memory.id = entry.resource_id.clone();
                memory.namespace = entry.namespace.clone();
                match entry.operation {
                    Operation::Create => {
                        self.store.create_memory(memory).await?;
                    }
                    _ => {
                        self.store.update_memory(memory).await?;
                    }
                }
                Ok(())
            }
        }
    }

    async fn apply_namespace(&self, entry: &WalEntry) -> ReplicationResult<()> {
        match entry.operation {
            Operation::Delete => {
                self.store.delete_namespace(&entry.tenant_id, &entry.resource_id).await
            }
            Operation::Create | Operation::Update => {
                let mut namespace: Namespace = serde_json::from_value(entry.data.clone())?;
                namespace.tenant_id = entry.tenant_id.clone();
                namespace.id = entry.resource_id.clone();
                match entry.operation {
                    Operation::Create => {
                        self.store.create_namespace(namespace).await?;
                    }
                    _ => {
                        self.store.update_namespace(namespace).await?;
                    }
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl PlacementSource for Manager {
    async fn fetch_placement(&self, tenant_id: &str) -> ReplicationResult<TenantPlacement> {
        self.get_placement(tenant_id)
            .ok_or_else(|| ReplicationError::PlacementNotFound { tenant_id: tenant_id.to_string() })
    }
}

fn approximate_size(entry: &WalEntry) -> u64 {
    serde_json::to_vec(entry).map(|b| b.len() as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::LastWriteWins;
    use crate::store::MemoryStore;
    use maia_wal::{KvWal, MemoryKv};
    use uuid::Uuid;

    async fn manager() -> Arc<Manager> {
        let wal = Arc::new(KvWal::open(Arc::new(MemoryKv::new()), "eu-central-1").await.unwrap());
        let store = Arc::new(MemoryStore::new());
        Manager::new(ManagerConfig::default(), wal, store, Arc::new(LastWriteWins))
    }

    fn memory_entry(tenant: &str, id: &str, content: &str, op: Operation) -> WalEntry {
        let mut e = WalEntry {
            id: Uuid::now_v7(),
            sequence: 0,
            timestamp: Utc::now(),
            tenant_id: tenant.into(),
            operation: op,
            resource_type: "memory".into(),
            resource_id: id.into(),
            namespace: "default".into(),
            data: serde_json::json!({
                "id": id, "namespace": "default", "tenant_id": tenant, "content": content,
                "metadata": {}, "tags": [], "access_count": 0,
                "created_at": Utc::now(), "updated_at": Utc::now(),
            }),
            previous_data: None,
            checksum: 0,
            region: "us-west-1".into(),
            replicated: false,
        };
        e.seal();
        e
    }

    #[tokio::test]
    async fn apply_entry_mutates_the_store() {
        let m = manager().await;
        let entry = memory_entry("t1", "m1", "x", Operation::Create);
        m.apply_entry(entry).await.unwrap();
        let got = m.store.get_memory("t1", "m1").await.unwrap();
        assert_eq!(got.unwrap().content, "x");
    }

    #[tokio::test]
    async fn apply_entry_is_idempotent_and_counts_one_conflict() {
        let m = manager().await;
        let entry = memory_entry("t1", "m1", "x", Operation::Create);
        m.apply_entry(entry.clone()).await.unwrap();
        assert_eq!(m.conflict_count(), 0);
        m.apply_entry(entry).await.unwrap();
        assert_eq!(m.conflict_count(), 1);
        let got = m.store.get_memory("t1", "m1").await.unwrap().unwrap();
        assert_eq!(got.content, "x");
    }

    #[tokio::test]
    async fn apply_entry_rejects_bad_checksum() {
        let m = manager().await;
        let mut entry = memory_entry("t1", "m1", "x", Operation::Create);
        entry.checksum = entry.checksum.wrapping_add(1);
        let err = m.apply_entry(entry).await.unwrap_err();
        assert!(matches!(err, ReplicationError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn unconfigured_tenant_defaults_to_local() {
        let m = manager().await;
        assert!(m.is_local_tenant("unknown-tenant").await);
    }

    #[tokio::test]
    async fn delete_entry_removes_from_store() {
        let m = manager().await;
        m.apply_entry(memory_entry("t1", "m1", "x", Operation::Create)).await.unwrap();
        m.apply_entry(memory_entry("t1", "m1", "x", Operation::Delete)).await.unwrap();
        assert!(m.store.get_memory("t1", "m1").await.unwrap().is_none());
    }
}
