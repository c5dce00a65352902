//! Tenant placement records and the TTL cache fronting them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::ReplicationResult;

/// Replication topology for a tenant's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementMode {
    Single,
    Replicated,
    Global,
}

/// Which region is primary for a tenant, and which regions hold replicas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantPlacement {
    pub tenant_id: String,
    pub primary_region: String,
    pub replicas: Vec<String>,
    pub mode: PlacementMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TenantPlacement {
    /// True when `region` is the primary, an explicit replica, or `mode`
    /// is `global` (which implies every region is a replica).
    pub fn is_local(&self, region: &str) -> bool {
        self.mode == PlacementMode::Global
            || self.primary_region == region
            || self.replicas.iter().any(|r| r == region)
    }
}

/// Whatever can produce an authoritative placement on a cache miss — the
/// `Manager` in production, a stub in tests.
#[async_trait]
pub trait PlacementSource: Send + Sync {
    async fn fetch_placement(&self, tenant_id: &str) -> ReplicationResult<TenantPlacement>;
}

/// Hit/miss counters for cache observability.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlacementCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub hit_rate: f64,
}

/// TTL cache over the placement registry, used on the hot routing path so
/// every request does not need to consult the manager directly.
pub struct PlacementCache<P: PlacementSource> {
    source: Arc<P>,
    ttl: Duration,
    entries: DashMap<String, (TenantPlacement, Instant)>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<P: PlacementSource> PlacementCache<P> {
    pub fn new(source: Arc<P>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Default TTL per the replication spec: 30 seconds.
    pub fn default_ttl() -> Duration {
        Duration::from_secs(30)
    }

    /// Fresh or cached placement for `tenant_id`, refreshing on expiry.
    pub async fn get(&self, tenant_id: &str) -> ReplicationResult<TenantPlacement> {
        if let Some(entry) = self.entries.get(tenant_id) {
            let (placement, expires_at) = entry.value();
            if Instant::now() < *expires_at {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(placement.clone());
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let placement = self.source.fetch_placement(tenant_id).await?;
        self.entries
            .insert(tenant_id.to_string(), (placement.clone(), Instant::now() + self.ttl));
        Ok(placement)
    }

    pub fn invalidate(&self, tenant_id: &str) {
        self.entries.remove(tenant_id);
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    /// Drop entries whose TTL has elapsed. Intended to be driven by a
    /// background worker on a fixed interval.
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
    }

    pub fn stats(&self) -> PlacementCacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        PlacementCacheStats {
            hits,
            misses,
            size: self.entries.len(),
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as StdOrdering};

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PlacementSource for CountingSource {
        async fn fetch_placement(&self, tenant_id: &str) -> ReplicationResult<TenantPlacement> {
            self.calls.fetch_add(1, StdOrdering::Relaxed);
            let now = Utc::now();
            Ok(TenantPlacement {
                tenant_id: tenant_id.to_string(),
                primary_region: "us-west-1".into(),
                replicas: vec![],
                mode: PlacementMode::Single,
                created_at: now,
                updated_at: now,
            })
        }
    }

    #[tokio::test]
    async fn caches_until_ttl_expires() {
        let source = Arc::new(CountingSource { calls: AtomicUsize::new(0) });
        let cache = PlacementCache::new(source.clone(), Duration::from_millis(20));

        cache.get("t1").await.unwrap();
        cache.get("t1").await.unwrap();
        assert_eq!(source.calls.load(StdOrdering::Relaxed), 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.get("t1").await.unwrap();
        assert_eq!(source.calls.load(StdOrdering::Relaxed), 2);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let source = Arc::new(CountingSource { calls: AtomicUsize::new(0) });
        let cache = PlacementCache::new(source.clone(), Duration::from_secs(30));
        cache.get("t1").await.unwrap();
        cache.invalidate("t1");
        cache.get("t1").await.unwrap();
        assert_eq!(source.calls.load(StdOrdering::Relaxed), 2);
    }

    #[test]
    fn global_mode_is_local_everywhere() {
        let now = Utc::now();
        let p = TenantPlacement {
            tenant_id: "t1".into(),
            primary_region: "us-west-1".into(),
            replicas: vec![],
            mode: PlacementMode::Global,
            created_at: now,
            updated_at: now,
        };
        assert!(p.is_local("anywhere"));
    }
}
