//! Layered configuration: defaults, then an optional TOML file, then
//! `MAIA_`-prefixed environment overrides, mirroring the orchestration
//! service's `dotenv` + `config` layering.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Which conflict strategy the manager resolves remote/local collisions
/// with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    LastWriteWins,
    Merge,
    Reject,
}

/// This node's role at startup. Failover and operator action can change
/// the manager's live role afterward; this only seeds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupRole {
    Leader,
    Follower,
    Standalone,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaiaConfig {
    pub node_id: String,
    pub region: String,
    pub bind_addr: String,
    pub role: StartupRole,
    pub leader_endpoint: Option<String>,
    pub peers: Vec<String>,
    pub conflict_strategy: ConflictStrategy,
    #[serde(with = "humantime_millis")]
    pub push_interval: Duration,
    #[serde(with = "humantime_millis")]
    pub pull_interval: Duration,
    pub batch_size: usize,
    #[serde(with = "humantime_millis")]
    pub election_timeout_min: Duration,
    #[serde(with = "humantime_millis")]
    pub election_timeout_max: Duration,
    #[serde(with = "humantime_millis")]
    pub heartbeat_interval: Duration,
    #[serde(with = "humantime_millis")]
    pub leader_timeout: Duration,
    #[serde(with = "humantime_millis")]
    pub inhibit_window: Duration,
    #[serde(with = "humantime_millis")]
    pub placement_cache_ttl: Duration,
    /// Base URL (scheme + host) used to build redirect targets for each
    /// region, e.g. `{"eu-central-1": "https://eu.maia.internal"}`.
    pub region_base_urls: HashMap<String, String>,
    pub log_level: String,
}

impl Default for MaiaConfig {
    fn default() -> Self {
        Self {
            node_id: "node-1".to_string(),
            region: "local".to_string(),
            bind_addr: "0.0.0.0:8088".to_string(),
            role: StartupRole::Standalone,
            leader_endpoint: None,
            peers: Vec::new(),
            conflict_strategy: ConflictStrategy::LastWriteWins,
            push_interval: Duration::from_millis(200),
            pull_interval: Duration::from_millis(200),
            batch_size: 100,
            election_timeout_min: Duration::from_millis(150),
            election_timeout_max: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(50),
            leader_timeout: Duration::from_millis(500),
            inhibit_window: Duration::from_secs(60),
            placement_cache_ttl: Duration::from_secs(30),
            region_base_urls: HashMap::new(),
            log_level: "info".to_string(),
        }
    }
}

impl MaiaConfig {
    /// Load defaults, then overlay `config_path` (if it exists), then
    /// `MAIA_`-prefixed environment variables.
    pub fn load(config_path: &str) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix("MAIA")
                    .separator("__")
                    .try_parsing(true),
            );

        builder
            .build()
            .with_context(|| format!("failed to build configuration from {config_path}"))?
            .try_deserialize()
            .with_context(|| "failed to deserialize MaiaConfig")
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_id.is_empty() {
            anyhow::bail!("node_id must not be empty");
        }
        if self.region.is_empty() {
            anyhow::bail!("region must not be empty");
        }
        if self.election_timeout_min >= self.election_timeout_max {
            anyhow::bail!("election_timeout_min must be < election_timeout_max");
        }
        if self.role == StartupRole::Follower && self.leader_endpoint.is_none() {
            anyhow::bail!("role=follower requires leader_endpoint");
        }
        Ok(())
    }
}

mod humantime_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        MaiaConfig::default().validate().unwrap();
    }

    #[test]
    fn follower_without_leader_endpoint_is_invalid() {
        let mut cfg = MaiaConfig::default();
        cfg.role = StartupRole::Follower;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn inverted_election_timeouts_are_invalid() {
        let mut cfg = MaiaConfig::default();
        cfg.election_timeout_min = Duration::from_millis(400);
        cfg.election_timeout_max = Duration::from_millis(300);
        assert!(cfg.validate().is_err());
    }
}
