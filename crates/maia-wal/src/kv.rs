//! The narrow transactional key-value boundary the WAL is built over.
//!
//! The real embedded engine is explicitly out of scope; this trait is the
//! seam through which the WAL reaches it, and [`MemoryKv`] is the
//! in-process stand-in used by tests and single-node deployments.

use async_trait::async_trait;
use std::collections::BTreeMap;

use parking_lot::RwLock;

/// Transactional key-value storage used by the WAL.
///
/// `put`/`delete` are expected to be durable according to whatever sync
/// policy the implementation is configured with; the WAL never assumes
/// more than read-your-writes consistency from a single instance.
#[async_trait]
pub trait Kv: Send + Sync {
    /// Store `value` under `key`, overwriting any existing value.
    async fn put(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()>;

    /// Fetch the value stored under `key`, if any.
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Remove the value stored under `key`, if any.
    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Iterate all `(key, value)` pairs whose key starts with `prefix`, in
    /// ascending key order. Used by the WAL for sequence-ordered scans.
    async fn scan_prefix(&self, prefix: &str) -> anyhow::Result<Vec<(String, Vec<u8>)>>;

    /// Force any buffered writes to stable storage.
    async fn sync(&self) -> anyhow::Result<()>;
}

/// An in-memory [`Kv`] backed by a sorted map, guarded by a single lock.
///
/// `BTreeMap` gives `scan_prefix` its ordering for free, mirroring the
/// ordered-scan guarantee a real engine's key layout would provide.
#[derive(Default)]
pub struct MemoryKv {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKv {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Kv for MemoryKv {
    async fn put(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()> {
        self.data.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.data.write().remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> anyhow::Result<Vec<(String, Vec<u8>)>> {
        Ok(self
            .data
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn sync(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
