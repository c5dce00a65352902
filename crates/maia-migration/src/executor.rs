//! Drives a tenant's primary region change through its supervised stages.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use maia_replication::{Manager, PlacementSource, TenantPlacement};
use maia_wal::Kv;

use crate::error::MigrationError;
use crate::migration::{Migration, MigrationState, Stage};

/// How long the executor pauses between stage transitions. A real
/// deployment's "validated"/"caught up" checks would take real time; this
/// is the fixed cadence used in its place.
const STAGE_INTERVAL: Duration = Duration::from_millis(50);

fn migration_key(id: &str) -> String {
    format!("migration/{id}")
}

fn tenant_index_key(tenant_id: &str, id: &str) -> String {
    format!("migration_tenant/{tenant_id}/{id}")
}

/// Anything that can invalidate a tenant's cached placement on migration
/// completion. Implemented for [`maia_replication::PlacementCache`] so the
/// executor does not need to know its source-type parameter.
pub trait PlacementInvalidator: Send + Sync {
    fn invalidate(&self, tenant_id: &str);
}

impl<P: PlacementSource> PlacementInvalidator for maia_replication::PlacementCache<P> {
    fn invalidate(&self, tenant_id: &str) {
        maia_replication::PlacementCache::invalidate(self, tenant_id)
    }
}

/// Staged state machine that moves a tenant's primary region while
/// preserving write ordering, per the replication core's migration
/// contract.
pub struct MigrationExecutor {
    kv: Arc<dyn Kv>,
    manager: Arc<Manager>,
    placement_cache: Arc<dyn PlacementInvalidator>,
    migrations: DashMap<String, Arc<RwLock<Migration>>>,
    active_tenant: DashMap<String, String>,
    cancellations: DashMap<String, CancellationToken>,
}

impl MigrationExecutor {
    pub fn new(
        kv: Arc<dyn Kv>,
        manager: Arc<Manager>,
        placement_cache: Arc<dyn PlacementInvalidator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            kv,
            manager,
            placement_cache,
            migrations: DashMap::new(),
            active_tenant: DashMap::new(),
            cancellations: DashMap::new(),
        })
    }

    /// Start a migration for `tenant_id` to `to_region`. Returns as soon as
    /// the migration is persisted at `pending`/`in_progress`; `dry_run`
    /// migrations instead run to completion synchronously before returning.
    pub async fn start_migration(
        self: &Arc<Self>,
        tenant_id: &str,
        to_region: &str,
        dry_run: bool,
    ) -> Result<Migration, MigrationError> {
        if self.active_tenant.contains_key(tenant_id) {
            return Err(MigrationError::AlreadyInProgress { tenant_id: tenant_id.to_string() });
        }

        let from_region = match self.manager.get_placement(tenant_id) {
            Some(placement) => placement.primary_region,
            None => self.manager.region().await,
        };

        if to_region == from_region {
            return Err(MigrationError::InvalidTargetRegion { region: to_region.to_string() });
        }

        let wal_position = self.manager.wal_position().await?;
        let migration = Migration {
            id: Uuid::now_v7().to_string(),
            tenant_id: tenant_id.to_string(),
            from_region,
            to_region: to_region.to_string(),
            state: MigrationState::Pending,
            started_at: Utc::now(),
            completed_at: None,
            progress: 0,
            wal_position,
            target_wal_position: None,
            dry_run,
            error: None,
        };

        self.persist(&migration).await?;
        self.active_tenant.insert(tenant_id.to_string(), migration.id.clone());
        self.migrations
            .insert(migration.id.clone(), Arc::new(RwLock::new(migration.clone())));

        if dry_run {
            return self.run_dry_run(migration).await;
        }

        let token = CancellationToken::new();
        self.cancellations.insert(migration.id.clone(), token.clone());

        let executor = self.clone();
        let id = migration.id.clone();
        tokio::spawn(async move {
            executor.run_staged(id, token).await;
        });

        Ok(self.advance_to(&migration.id, Stage::InProgress, None).await?)
    }

    async fn run_dry_run(&self, mut migration: Migration) -> Result<Migration, MigrationError> {
        for stage in [
            Stage::InProgress,
            Stage::Validated,
            Stage::CaughtUp,
            Stage::PlacementUpdated,
            Stage::Completed,
        ] {
            migration.progress = stage.progress();
        }
        migration.state = MigrationState::Completed;
        migration.completed_at = Some(Utc::now());
        self.persist(&migration).await?;
        self.finish_tenant(&migration.tenant_id, &migration.id);
        if let Some(slot) = self.migrations.get(&migration.id) {
            *slot.write().await = migration.clone();
        }
        Ok(migration)
    }

    async fn run_staged(self: Arc<Self>, id: String, token: CancellationToken) {
        let stages = [Stage::Validated, Stage::CaughtUp, Stage::PlacementUpdated, Stage::Completed];
        for stage in stages {
            tokio::select! {
                _ = tokio::time::sleep(STAGE_INTERVAL) => {}
                _ = token.cancelled() => {
                    if let Err(e) = self.cancel_in_place(&id).await {
                        warn!(migration_id = %id, error = %e, "failed to persist cancellation");
                    }
                    return;
                }
            }
            if let Err(e) = self.advance_to(&id, stage, None).await {
                warn!(migration_id = %id, error = %e, "migration stage failed");
                let _ = self.fail(&id, &e.to_string()).await;
                return;
            }
        }
        self.cancellations.remove(&id);
    }

    async fn advance_to(
        &self,
        id: &str,
        stage: Stage,
        target_wal_position: Option<u64>,
    ) -> Result<Migration, MigrationError> {
        let slot = self
            .migrations
            .get(id)
            .ok_or_else(|| MigrationError::NotFound { id: id.to_string() })?
            .clone();
        let mut migration = slot.write().await;
        migration.progress = stage.progress();
        migration.state = MigrationState::InProgress;
        if let Some(pos) = target_wal_position {
            migration.target_wal_position = Some(pos);
        }

        if stage == Stage::PlacementUpdated && !migration.dry_run {
            self.apply_new_placement(&migration).await?;
        }
        if stage == Stage::Completed {
            migration.state = MigrationState::Completed;
            migration.completed_at = Some(Utc::now());
            if !migration.dry_run {
                self.placement_cache.invalidate(&migration.tenant_id);
            }
            self.finish_tenant(&migration.tenant_id, &migration.id);
        }

        self.persist(&migration).await?;
        info!(migration_id = id, progress = migration.progress, "migration advanced");
        Ok(migration.clone())
    }

    async fn apply_new_placement(&self, migration: &Migration) -> Result<(), MigrationError> {
        let existing = self.manager.get_placement(&migration.tenant_id);
        let now = Utc::now();
        let mut replicas = vec![migration.from_region.clone()];
        if let Some(existing) = existing.as_ref() {
            for r in &existing.replicas {
                if !replicas.contains(r) && r != &migration.to_region {
                    replicas.push(r.clone());
                }
            }
        }
        let placement = TenantPlacement {
            tenant_id: migration.tenant_id.clone(),
            primary_region: migration.to_region.clone(),
            replicas,
            mode: existing.map(|p| p.mode).unwrap_or(maia_replication::PlacementMode::Replicated),
            created_at: now,
            updated_at: now,
        };
        self.manager.set_placement(placement);
        Ok(())
    }

    async fn fail(&self, id: &str, error: &str) -> Result<(), MigrationError> {
        let slot = self
            .migrations
            .get(id)
            .ok_or_else(|| MigrationError::NotFound { id: id.to_string() })?
            .clone();
        let mut migration = slot.write().await;
        migration.state = MigrationState::Failed;
        migration.error = Some(error.to_string());
        self.finish_tenant(&migration.tenant_id, &migration.id);
        self.persist(&migration).await
    }

    async fn cancel_in_place(&self, id: &str) -> Result<(), MigrationError> {
        let slot = self
            .migrations
            .get(id)
            .ok_or_else(|| MigrationError::NotFound { id: id.to_string() })?
            .clone();
        let mut migration = slot.write().await;
        migration.state = MigrationState::Cancelled;
        self.finish_tenant(&migration.tenant_id, &migration.id);
        self.persist(&migration).await
    }

    /// Request cancellation of a running migration.
    pub async fn cancel_migration(&self, id: &str) -> Result<(), MigrationError> {
        let token = self
            .cancellations
            .get(id)
            .ok_or_else(|| MigrationError::NotFound { id: id.to_string() })?
            .clone();
        token.cancel();
        Ok(())
    }

    pub async fn get_migration(&self, id: &str) -> Option<Migration> {
        match self.migrations.get(id) {
            Some(slot) => Some(slot.read().await.clone()),
            None => self.load(id).await.ok().flatten(),
        }
    }

    pub async fn list_for_tenant(&self, tenant_id: &str) -> Result<Vec<Migration>, MigrationError> {
        let prefix = format!("migration_tenant/{tenant_id}/");
        let pairs = self.kv.scan_prefix(&prefix).await?;
        let mut out = Vec::new();
        for (_, value) in pairs {
            let id = String::from_utf8_lossy(&value).to_string();
            if let Some(m) = self.get_migration(&id).await {
                out.push(m);
            }
        }
        Ok(out)
    }

    pub async fn list_all(&self) -> Result<Vec<Migration>, MigrationError> {
        let pairs = self.kv.scan_prefix("migration/").await?;
        let mut out = Vec::with_capacity(pairs.len());
        for (_, value) in pairs {
            out.push(serde_json::from_slice::<Migration>(&value)?);
        }
        Ok(out)
    }

    fn finish_tenant(&self, tenant_id: &str, id: &str) {
        if self.active_tenant.get(tenant_id).map(|v| v.clone()).as_deref() == Some(id) {
            self.active_tenant.remove(tenant_id);
        }
        self.cancellations.remove(id);
    }

    async fn persist(&self, migration: &Migration) -> Result<(), MigrationError> {
        let body = serde_json::to_vec(migration)?;
        self.kv.put(&migration_key(&migration.id), body).await?;
        self.kv
            .put(
                &tenant_index_key(&migration.tenant_id, &migration.id),
                migration.id.clone().into_bytes(),
            )
            .await?;
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<Migration>, MigrationError> {
        match self.kv.get(&migration_key(id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maia_replication::{LastWriteWins, ManagerConfig, MemoryStore, PlacementCache};
    use maia_wal::{KvWal, MemoryKv};

    async fn harness() -> (Arc<dyn Kv>, Arc<MigrationExecutor>) {
        let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
        let wal = Arc::new(KvWal::open(kv.clone(), "us-west-1").await.unwrap());
        let store = Arc::new(MemoryStore::new());
        let manager = Manager::new(
            ManagerConfig { region: "us-west-1".into(), ..ManagerConfig::default() },
            wal,
            store,
            Arc::new(LastWriteWins),
        );
        let cache = Arc::new(PlacementCache::new(manager.clone(), Duration::from_secs(30)));
        let executor = MigrationExecutor::new(kv.clone(), manager, cache);
        (kv, executor)
    }

    #[tokio::test]
    async fn start_migration_rejects_same_region_target() {
        let (_, executor) = harness().await;
        let err = executor.start_migration("t1", "us-west-1", false).await.unwrap_err();
        assert!(matches!(err, MigrationError::InvalidTargetRegion { .. }));
    }

    #[tokio::test]
    async fn dry_run_completes_synchronously_without_changing_placement() {
        let (_, executor) = harness().await;
        let migration = executor.start_migration("t1", "eu-central-1", true).await.unwrap();
        assert_eq!(migration.state, MigrationState::Completed);
        assert_eq!(migration.progress, 100);
        assert!(executor.manager.get_placement("t1").is_none());
    }

    #[tokio::test]
    async fn second_migration_for_same_tenant_is_rejected_while_active() {
        let (_, executor) = harness().await;
        let _ = executor.start_migration("t1", "eu-central-1", false).await.unwrap();
        let err = executor.start_migration("t1", "ap-south-1", false).await.unwrap_err();
        assert!(matches!(err, MigrationError::AlreadyInProgress { .. }));
    }

    #[tokio::test]
    async fn staged_migration_eventually_updates_placement() {
        let (_, executor) = harness().await;
        let migration = executor.start_migration("t1", "eu-central-1", false).await.unwrap();
        assert_eq!(migration.progress, 10);

        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if let Some(m) = executor.get_migration(&migration.id).await {
                if m.state.is_terminal() {
                    assert_eq!(m.state, MigrationState::Completed);
                    let placement = executor.manager.get_placement("t1").unwrap();
                    assert_eq!(placement.primary_region, "eu-central-1");
                    assert!(placement.replicas.contains(&"us-west-1".to_string()));
                    return;
                }
            }
        }
        panic!("migration did not complete in time");
    }

    #[tokio::test]
    async fn cancel_migration_marks_it_cancelled() {
        let (_, executor) = harness().await;
        let migration = executor.start_migration("t1", "eu-central-1", false).await.unwrap();
        executor.cancel_migration(&migration.id).await.unwrap();

        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if let Some(m) = executor.get_migration(&migration.id).await {
                if m.state.is_terminal() {
                    assert_eq!(m.state, MigrationState::Cancelled);
                    return;
                }
            }
        }
        panic!("migration was not cancelled in time");
    }
}
