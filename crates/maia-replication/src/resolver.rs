//! Conflict resolution strategies used by `applyEntry` when the same
//! entry id already exists in the local WAL.

use async_trait::async_trait;
use maia_wal::{Operation, WalEntry};

use crate::error::{ReplicationError, ReplicationResult};

/// Decides the winner when a remote entry collides by id with a local one.
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    async fn resolve(&self, local: &WalEntry, remote: &WalEntry) -> ReplicationResult<WalEntry>;
}

/// Keep the entry with the greater timestamp; ties break toward local.
pub struct LastWriteWins;

#[async_trait]
impl ConflictResolver for LastWriteWins {
    async fn resolve(&self, local: &WalEntry, remote: &WalEntry) -> ReplicationResult<WalEntry> {
        Ok(last_write_wins(local, remote))
    }
}

fn last_write_wins(local: &WalEntry, remote: &WalEntry) -> WalEntry {
    if remote.timestamp > local.timestamp {
        remote.clone()
    } else {
        local.clone()
    }
}

/// For `update` operations on `memory` resources, merges fields instead of
/// picking one side outright. Falls back to last-write-wins for every
/// other operation/resource combination.
pub struct Merge;

#[async_trait]
impl ConflictResolver for Merge {
    async fn resolve(&self, local: &WalEntry, remote: &WalEntry) -> ReplicationResult<WalEntry> {
        if local.operation != Operation::Update || local.resource_type != "memory" {
            return Ok(last_write_wins(local, remote));
        }

        let local_data = local.data.as_object().cloned().unwrap_or_default();
        let remote_data = remote.data.as_object().cloned().unwrap_or_default();

        let content = remote_data
            .get("content")
            .or_else(|| local_data.get("content"))
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        let mut metadata = local_data
            .get("metadata")
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();
        if let Some(remote_metadata) = remote_data.get("metadata").and_then(|v| v.as_object()) {
            for (k, v) in remote_metadata {
                metadata.insert(k.clone(), v.clone());
            }
        }

        let mut tags: Vec<serde_json::Value> = local_data
            .get("tags")
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();
        if let Some(remote_tags) = remote_data.get("tags").and_then(|v| v.as_array()) {
            for t in remote_tags {
                if !tags.contains(t) {
                    tags.push(t.clone());
                }
            }
        }

        let local_access = local_data.get("access_count").and_then(|v| v.as_u64()).unwrap_or(0);
        let remote_access = remote_data.get("access_count").and_then(|v| v.as_u64()).unwrap_or(0);
        let access_count = local_access.max(remote_access);

        let mut merged_data = serde_json::Map::new();
        merged_data.insert("content".to_string(), content);
        merged_data.insert("metadata".to_string(), serde_json::Value::Object(metadata));
        merged_data.insert("tags".to_string(), serde_json::Value::Array(tags));
        merged_data.insert("access_count".to_string(), serde_json::Value::from(access_count));

        let winner = if remote.timestamp > local.timestamp { remote } else { local };
        let mut merged = winner.clone();
        merged.data = serde_json::Value::Object(merged_data);
        merged.seal();
        Ok(merged)
    }
}

/// Conflicts are never resolved automatically; the caller must escalate.
pub struct Reject;

#[async_trait]
impl ConflictResolver for Reject {
    async fn resolve(&self, local: &WalEntry, _remote: &WalEntry) -> ReplicationResult<WalEntry> {
        Err(ReplicationError::Conflict { id: local.id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use uuid::Uuid;

    fn entry(content: &str, ts_offset_secs: i64) -> WalEntry {
        let mut e = WalEntry {
            id: Uuid::now_v7(),
            sequence: 1,
            timestamp: Utc::now() + ChronoDuration::seconds(ts_offset_secs),
            tenant_id: "t1".into(),
            operation: Operation::Update,
            resource_type: "memory".into(),
            resource_id: "m1".into(),
            namespace: "default".into(),
            data: serde_json::json!({"content": content, "metadata": {}, "tags": [], "access_count": 0}),
            previous_data: None,
            checksum: 0,
            region: "eu".into(),
            replicated: false,
        };
        e.seal();
        e
    }

    #[tokio::test]
    async fn lww_picks_newer_timestamp() {
        let local = entry("A", 0);
        let remote = entry("B", 10);
        let winner = LastWriteWins.resolve(&local, &remote).await.unwrap();
        assert_eq!(winner.data["content"], "B");
    }

    #[tokio::test]
    async fn lww_ties_break_toward_local() {
        let mut local = entry("A", 0);
        let mut remote = entry("B", 0);
        remote.timestamp = local.timestamp;
        local.seal();
        remote.seal();
        let winner = LastWriteWins.resolve(&local, &remote).await.unwrap();
        assert_eq!(winner.data["content"], "A");
    }

    #[tokio::test]
    async fn merge_unions_tags_and_overrides_metadata() {
        let mut local = entry("A", 0);
        local.data = serde_json::json!({
            "content": "A", "metadata": {"k1": "local"}, "tags": ["x"], "access_count": 3
        });
        local.seal();
        let mut remote = entry("B", 10);
        remote.data = serde_json::json!({
            "content": "B", "metadata": {"k1": "remote", "k2": "new"}, "tags": ["y"], "access_count": 1
        });
        remote.seal();

        let merged = Merge.resolve(&local, &remote).await.unwrap();
        assert_eq!(merged.data["content"], "B");
        assert_eq!(merged.data["metadata"]["k1"], "remote");
        assert_eq!(merged.data["metadata"]["k2"], "new");
        assert_eq!(merged.data["access_count"], 3);
        let tags = merged.data["tags"].as_array().unwrap();
        assert!(tags.contains(&serde_json::json!("x")));
        assert!(tags.contains(&serde_json::json!("y")));
        assert!(merged.verify_checksum());
    }

    #[tokio::test]
    async fn merge_falls_back_to_lww_for_non_update_memory() {
        let mut local = entry("A", 0);
        local.operation = Operation::Create;
        local.seal();
        let mut remote = entry("B", 10);
        remote.operation = Operation::Create;
        remote.seal();
        let winner = Merge.resolve(&local, &remote).await.unwrap();
        assert_eq!(winner.data["content"], "B");
    }

    #[tokio::test]
    async fn merge_falls_back_to_lww_for_non_memory_resource() {
        let mut local = entry("A", 0);
        local.resource_type = "namespace".into();
        local.seal();
        let mut remote = entry("B", 10);
        remote.resource_type = "namespace".into();
        remote.seal();
        let winner = Merge.resolve(&local, &remote).await.unwrap();
        assert_eq!(winner.data["content"], "B");
    }

    #[tokio::test]
    async fn reject_returns_conflict_error() {
        let local = entry("A", 0);
        let remote = entry("B", 10);
        let err = Reject.resolve(&local, &remote).await.unwrap_err();
        assert!(matches!(err, ReplicationError::Conflict { .. }));
    }
}
