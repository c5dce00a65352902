//! The `Migration` record and its staged progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal or in-flight state of a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl MigrationState {
    /// Terminal states never transition further.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// An operator-initiated, staged change of a tenant's primary region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Migration {
    pub id: String,
    pub tenant_id: String,
    pub from_region: String,
    pub to_region: String,
    pub state: MigrationState,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// 0-100.
    pub progress: u8,
    pub wal_position: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_wal_position: Option<u64>,
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Named checkpoints and the progress percentage each carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    InProgress,
    Validated,
    CaughtUp,
    PlacementUpdated,
    Completed,
}

impl Stage {
    pub fn progress(self) -> u8 {
        match self {
            Stage::InProgress => 10,
            Stage::Validated => 30,
            Stage::CaughtUp => 60,
            Stage::PlacementUpdated => 80,
            Stage::Completed => 100,
        }
    }
}
