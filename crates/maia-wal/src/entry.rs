//! The fundamental unit of replication: `WalEntry`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of mutation an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// Kind of resource an entry mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Memory,
    Namespace,
    Tenant,
    ApiKey,
}

impl ResourceType {
    /// Parse a wire value, treating anything unrecognized as "unknown" so
    /// that `applyEntry` can forward-compatibly skip it rather than fail.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "memory" => Some(Self::Memory),
            "namespace" => Some(Self::Namespace),
            "tenant" => Some(Self::Tenant),
            "apikey" => Some(Self::ApiKey),
            _ => None,
        }
    }
}

/// A single durable, checksummed, ordered mutation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Globally unique, lexicographically sortable id (UUIDv7).
    pub id: Uuid,
    /// Monotonically increasing position within this WAL instance.
    pub sequence: u64,
    /// UTC instant the write was accepted.
    pub timestamp: DateTime<Utc>,
    /// Owning tenant.
    pub tenant_id: String,
    pub operation: Operation,
    pub resource_type: String,
    pub resource_id: String,
    pub namespace: String,
    /// Serialized resource state after the mutation.
    pub data: serde_json::Value,
    /// Serialized resource state before the mutation; absent for creates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_data: Option<serde_json::Value>,
    /// CRC32-IEEE over the fields named in [`checksum_payload`].
    pub checksum: u32,
    /// Region that originated the write.
    pub region: String,
    /// False for locally-originated writes, true once applied from a peer.
    pub replicated: bool,
}

impl WalEntry {
    /// Build the exact byte payload covered by the checksum: the nine
    /// fields named in the wire format, in the order they are listed there.
    /// `previous_data`, `region`, and `replicated` are deliberately excluded.
    fn checksum_payload(&self) -> Vec<u8> {
        let tuple = (
            &self.id,
            self.sequence,
            &self.timestamp,
            &self.tenant_id,
            &self.operation,
            &self.resource_type,
            &self.resource_id,
            &self.namespace,
            &self.data,
        );
        // unwrap: serializing a tuple of already-valid serde types cannot fail.
        serde_json::to_vec(&tuple).expect("checksum payload is always serializable")
    }

    /// Compute the CRC32-IEEE checksum over the covered fields.
    pub fn compute_checksum(&self) -> u32 {
        crc32fast::hash(&self.checksum_payload())
    }

    /// Set `self.checksum` to its freshly computed value.
    pub fn seal(&mut self) {
        self.checksum = self.compute_checksum();
    }

    /// True if the stored checksum matches a fresh recomputation.
    pub fn verify_checksum(&self) -> bool {
        self.checksum == self.compute_checksum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WalEntry {
        let mut e = WalEntry {
            id: Uuid::now_v7(),
            sequence: 1,
            timestamp: Utc::now(),
            tenant_id: "t1".into(),
            operation: Operation::Create,
            resource_type: "memory".into(),
            resource_id: "m1".into(),
            namespace: "default".into(),
            data: serde_json::json!({"content": "x"}),
            previous_data: None,
            checksum: 0,
            region: "eu-central-1".into(),
            replicated: false,
        };
        e.seal();
        e
    }

    #[test]
    fn checksum_round_trips() {
        let e = sample();
        assert!(e.verify_checksum());
    }

    #[test]
    fn mutating_covered_field_falsifies_checksum() {
        let mut e = sample();
        e.data = serde_json::json!({"content": "y"});
        assert!(!e.verify_checksum());
    }

    #[test]
    fn mutating_uncovered_field_preserves_checksum() {
        let mut e = sample();
        e.region = "us-west-1".into();
        e.replicated = true;
        e.previous_data = Some(serde_json::json!({"content": "old"}));
        assert!(e.verify_checksum());
    }
}
