//! The `Store` capability and the transparent `ReplicatedStore` wrapper
//! that emits a WAL entry for every write.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::error;
use uuid::Uuid;

use maia_wal::{Operation, ResourceType, Wal, WalEntry};

use crate::error::{ReplicationError, ReplicationResult};

/// A stored memory record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Memory {
    pub id: String,
    pub namespace: String,
    pub tenant_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub access_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored namespace record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Namespace {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The base storage capability the replicated layer wraps. Reads pass
/// through unchanged; writes are what `ReplicatedStore` instruments.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_memory(&self, memory: Memory) -> ReplicationResult<Memory>;
    async fn get_memory(&self, tenant_id: &str, id: &str) -> ReplicationResult<Option<Memory>>;
    async fn update_memory(&self, memory: Memory) -> ReplicationResult<Memory>;
    async fn delete_memory(&self, tenant_id: &str, id: &str) -> ReplicationResult<()>;
    async fn list_memories(&self, tenant_id: &str, namespace: &str) -> ReplicationResult<Vec<Memory>>;
    async fn search_memories(&self, tenant_id: &str, query: &str) -> ReplicationResult<Vec<Memory>>;
    async fn touch_memory(&self, tenant_id: &str, id: &str) -> ReplicationResult<()>;

    async fn create_namespace(&self, namespace: Namespace) -> ReplicationResult<Namespace>;
    async fn get_namespace(&self, tenant_id: &str, id: &str) -> ReplicationResult<Option<Namespace>>;
    async fn update_namespace(&self, namespace: Namespace) -> ReplicationResult<Namespace>;
    async fn delete_namespace(&self, tenant_id: &str, id: &str) -> ReplicationResult<()>;
}

/// An in-process [`Store`] backed by concurrent maps. Used by tests and as
/// the default single-node backend.
#[derive(Default)]
pub struct MemoryStore {
    memories: DashMap<(String, String), Memory>,
    namespaces: DashMap<(String, String), Namespace>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_memory(&self, memory: Memory) -> ReplicationResult<Memory> {
        let key = (memory.tenant_id.clone(), memory.id.clone());
        self.memories.insert(key, memory.clone());
        Ok(memory)
    }

    async fn get_memory(&self, tenant_id: &str, id: &str) -> ReplicationResult<Option<Memory>> {
        Ok(self.memories.get(&(tenant_id.to_string(), id.to_string())).map(|r| r.clone()))
    }

    async fn update_memory(&self, memory: Memory) -> ReplicationResult<Memory> {
        let key = (memory.tenant_id.clone(), memory.id.clone());
        self.memories.insert(key, memory.clone());
        Ok(memory)
    }

    async fn delete_memory(&self, tenant_id: &str, id: &str) -> ReplicationResult<()> {
        self.memories.remove(&(tenant_id.to_string(), id.to_string()));
        Ok(())
    }

    async fn list_memories(&self, tenant_id: &str, namespace: &str) -> ReplicationResult<Vec<Memory>> {
        Ok(self
            .memories
            .iter()
            .filter(|e| e.key().0 == tenant_id && e.value().namespace == namespace)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn search_memories(&self, tenant_id: &str, query: &str) -> ReplicationResult<Vec<Memory>> {
        Ok(self
            .memories
            .iter()
            .filter(|e| e.key().0 == tenant_id && e.value().content.contains(query))
            .map(|e| e.value().clone())
            .collect())
    }

    async fn touch_memory(&self, tenant_id: &str, id: &str) -> ReplicationResult<()> {
        if let Some(mut entry) = self.memories.get_mut(&(tenant_id.to_string(), id.to_string())) {
            entry.access_count += 1;
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn create_namespace(&self, namespace: Namespace) -> ReplicationResult<Namespace> {
        let key = (namespace.tenant_id.clone(), namespace.id.clone());
        self.namespaces.insert(key, namespace.clone());
        Ok(namespace)
    }

    async fn get_namespace(&self, tenant_id: &str, id: &str) -> ReplicationResult<Option<Namespace>> {
        Ok(self.namespaces.get(&(tenant_id.to_string(), id.to_string())).map(|r| r.clone()))
    }

    async fn update_namespace(&self, namespace: Namespace) -> ReplicationResult<Namespace> {
        let key = (namespace.tenant_id.clone(), namespace.id.clone());
        self.namespaces.insert(key, namespace.clone());
        Ok(namespace)
    }

    async fn delete_namespace(&self, tenant_id: &str, id: &str) -> ReplicationResult<()> {
        self.namespaces.remove(&(tenant_id.to_string(), id.to_string()));
        Ok(())
    }
}

/// Wraps any [`Store`] so that every write also emits a durable, ordered
/// WAL entry. Reads pass through unchanged.
pub struct ReplicatedStore<S: Store> {
    inner: Arc<S>,
    wal: Arc<dyn Wal>,
    region: String,
    /// Notified after every successful append, so a push worker can wake
    /// up immediately instead of waiting for its next tick. Purely a
    /// latency optimization; nothing depends on it firing.
    pub commit_notify: Arc<Notify>,
}

impl<S: Store> ReplicatedStore<S> {
    pub fn new(inner: Arc<S>, wal: Arc<dyn Wal>, region: impl Into<String>) -> Self {
        Self {
            inner,
            wal,
            region: region.into(),
            commit_notify: Arc::new(Notify::new()),
        }
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    async fn emit(
        &self,
        tenant_id: &str,
        operation: Operation,
        resource_type: ResourceType,
        resource_id: &str,
        namespace: &str,
        data: serde_json::Value,
        previous_data: Option<serde_json::Value>,
    ) {
        let resource_type_str = match resource_type {
            ResourceType::Memory => "memory",
            ResourceType::Namespace => "namespace",
            ResourceType::Tenant => "tenant",
            ResourceType::ApiKey => "apikey",
        };
        let entry = WalEntry {
            id: Uuid::now_v7(),
            sequence: 0,
            timestamp: Utc::now(),
            tenant_id: tenant_id.to_string(),
            operation,
            resource_type: resource_type_str.to_string(),
            resource_id: resource_id.to_string(),
            namespace: namespace.to_string(),
            data,
            previous_data,
            checksum: 0,
            region: self.region.clone(),
            replicated: false,
        };
        // Availability wins over perfect replication: a WAL append failure
        // is logged, never rolled back against the already-committed write.
        match self.wal.append(entry).await {
            Ok(_) => self.commit_notify.notify_waiters(),
            Err(e) => error!(error = %e, tenant_id, resource_id, "WAL append failed after write"),
        }
    }

    pub async fn create_memory(&self, memory: Memory) -> ReplicationResult<Memory> {
        let tenant_id = memory.tenant_id.clone();
        let namespace = memory.namespace.clone();
        let id = memory.id.clone();
        let created = self.inner.create_memory(memory).await?;
        let data = serde_json::to_value(&created)?;
        self.emit(&tenant_id, Operation::Create, ResourceType::Memory, &id, &namespace, data, None)
            .await;
        Ok(created)
    }

    pub async fn update_memory(&self, memory: Memory) -> ReplicationResult<Memory> {
        let tenant_id = memory.tenant_id.clone();
        let namespace = memory.namespace.clone();
        let id = memory.id.clone();
        let previous = self.inner.get_memory(&tenant_id, &id).await?;
        let updated = self.inner.update_memory(memory).await?;
        let data = serde_json::to_value(&updated)?;
        let previous_data = previous.map(|p| serde_json::to_value(&p)).transpose()?;
        self.emit(&tenant_id, Operation::Update, ResourceType::Memory, &id, &namespace, data, previous_data)
            .await;
        Ok(updated)
    }

    pub async fn delete_memory(&self, tenant_id: &str, namespace: &str, id: &str) -> ReplicationResult<()> {
        let previous = self.inner.get_memory(tenant_id, id).await?;
        self.inner.delete_memory(tenant_id, id).await?;
        let previous_data = previous.map(|p| serde_json::to_value(&p)).transpose()?;
        self.emit(
            tenant_id,
            Operation::Delete,
            ResourceType::Memory,
            id,
            namespace,
            serde_json::Value::Null,
            previous_data,
        )
        .await;
        Ok(())
    }

    pub async fn get_memory(&self, tenant_id: &str, id: &str) -> ReplicationResult<Option<Memory>> {
        self.inner.get_memory(tenant_id, id).await
    }

    pub async fn list_memories(&self, tenant_id: &str, namespace: &str) -> ReplicationResult<Vec<Memory>> {
        self.inner.list_memories(tenant_id, namespace).await
    }

    pub async fn search_memories(&self, tenant_id: &str, query: &str) -> ReplicationResult<Vec<Memory>> {
        self.inner.search_memories(tenant_id, query).await
    }

    pub async fn touch_memory(&self, tenant_id: &str, id: &str) -> ReplicationResult<()> {
        self.inner.touch_memory(tenant_id, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maia_wal::{KvWal, MemoryKv};

    fn sample_memory(tenant: &str, id: &str) -> Memory {
        let now = Utc::now();
        Memory {
            id: id.to_string(),
            namespace: "default".into(),
            tenant_id: tenant.to_string(),
            content: "x".into(),
            metadata: HashMap::new(),
            tags: vec![],
            access_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    async fn store() -> ReplicatedStore<MemoryStore> {
        let wal = Arc::new(KvWal::open(Arc::new(MemoryKv::new()), "eu-central-1").await.unwrap());
        ReplicatedStore::new(Arc::new(MemoryStore::new()), wal, "eu-central-1")
    }

    #[tokio::test]
    async fn create_emits_wal_entry() {
        let s = store().await;
        s.create_memory(sample_memory("t1", "m1")).await.unwrap();
        let entries = s.wal.read(0, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].resource_id, "m1");
        assert_eq!(entries[0].operation, Operation::Create);
        assert!(entries[0].previous_data.is_none());
    }

    #[tokio::test]
    async fn update_carries_previous_data() {
        let s = store().await;
        s.create_memory(sample_memory("t1", "m1")).await.unwrap();
        let mut updated = sample_memory("t1", "m1");
        updated.content = "y".into();
        s.update_memory(updated).await.unwrap();

        let entries = s.wal.read(0, 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[1].previous_data.is_some());
    }

    #[tokio::test]
    async fn delete_removes_from_store_and_logs_entry() {
        let s = store().await;
        s.create_memory(sample_memory("t1", "m1")).await.unwrap();
        s.delete_memory("t1", "default", "m1").await.unwrap();
        assert!(s.get_memory("t1", "m1").await.unwrap().is_none());
        let entries = s.wal.read(0, 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].operation, Operation::Delete);
    }
}
