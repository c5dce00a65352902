//! Configuration for an election participant.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ElectionError;

/// Tuning for the election state machine and its timers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// This node's identity.
    pub node_id: String,
    /// Every other participant's identity (does not include `node_id`).
    pub peers: Vec<String>,
    /// How often a leader emits heartbeats.
    pub heartbeat_interval: Duration,
    /// Lower bound of the randomized election timeout.
    pub election_timeout_min: Duration,
    /// Upper bound of the randomized election timeout.
    pub election_timeout_max: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            node_id: "node-1".to_string(),
            peers: Vec::new(),
            heartbeat_interval: Duration::from_millis(50),
            election_timeout_min: Duration::from_millis(150),
            election_timeout_max: Duration::from_millis(300),
        }
    }
}

impl ElectionConfig {
    /// Total number of participants, including this node.
    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    /// `floor(N/2) + 1`; a single-node cluster is always quorum.
    pub fn quorum_size(&self) -> usize {
        self.cluster_size() / 2 + 1
    }

    /// Draw a uniformly random timeout in `[min, max]`.
    pub fn random_election_timeout(&self) -> Duration {
        let min = self.election_timeout_min.as_millis() as u64;
        let max = self.election_timeout_max.as_millis() as u64;
        if max <= min {
            return self.election_timeout_min;
        }
        let millis = rand::thread_rng().gen_range(min..=max);
        Duration::from_millis(millis)
    }

    /// Validate internal consistency.
    pub fn validate(&self) -> Result<(), ElectionError> {
        if self.node_id.is_empty() {
            return Err(ElectionError::Configuration("node_id cannot be empty".into()));
        }
        if self.peers.iter().any(|p| p == &self.node_id) {
            return Err(ElectionError::Configuration(
                "peers must not include this node's own id".into(),
            ));
        }
        if self.election_timeout_min >= self.election_timeout_max {
            return Err(ElectionError::Configuration(
                "election_timeout_min must be less than election_timeout_max".into(),
            ));
        }
        if self.heartbeat_interval >= self.election_timeout_min {
            return Err(ElectionError::Configuration(
                "heartbeat_interval must be less than election_timeout_min".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_node_cluster_is_always_quorum() {
        let cfg = ElectionConfig { node_id: "n1".into(), ..Default::default() };
        assert_eq!(cfg.cluster_size(), 1);
        assert_eq!(cfg.quorum_size(), 1);
    }

    #[test]
    fn quorum_is_majority() {
        let cfg = ElectionConfig {
            node_id: "n1".into(),
            peers: vec!["n2".into(), "n3".into(), "n4".into()],
            ..Default::default()
        };
        assert_eq!(cfg.cluster_size(), 4);
        assert_eq!(cfg.quorum_size(), 3);
    }

    #[test]
    fn rejects_self_in_peers() {
        let cfg = ElectionConfig {
            node_id: "n1".into(),
            peers: vec!["n1".into()],
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_heartbeat_slower_than_timeout() {
        let cfg = ElectionConfig {
            heartbeat_interval: Duration::from_millis(500),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn random_timeout_stays_in_range() {
        let cfg = ElectionConfig::default();
        for _ in 0..50 {
            let t = cfg.random_election_timeout();
            assert!(t >= cfg.election_timeout_min && t <= cfg.election_timeout_max);
        }
    }
}
