//! The replication wire API: entry exchange, position, stats, health.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

use maia_replication::Role;
use maia_wal::WalEntry;

use crate::state::ServiceState;

const MAX_ENTRIES_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct EntriesQuery {
    #[serde(default)]
    after: u64,
    limit: Option<usize>,
}

pub async fn get_entries(
    State(state): State<ServiceState>,
    Query(q): Query<EntriesQuery>,
) -> Result<Response, StatusCode> {
    let limit = q.limit.unwrap_or(100).min(MAX_ENTRIES_LIMIT);
    let entries = state
        .wal
        .read(q.after, limit)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let role = state.manager.role().await;
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, "X-MAIA-Region", &state.config.region);
    insert_header(&mut headers, "X-MAIA-Instance-ID", &state.config.node_id);
    insert_header(&mut headers, "X-MAIA-Role", role_str(role));

    Ok((headers, Json(entries)).into_response())
}

#[derive(Debug, Serialize)]
pub struct ApplyResponse {
    applied: usize,
    total: usize,
}

pub async fn post_entries(
    State(state): State<ServiceState>,
    Json(entries): Json<Vec<WalEntry>>,
) -> Json<ApplyResponse> {
    let total = entries.len();
    let mut applied = 0;
    for entry in entries {
        match state.manager.apply_entry(entry).await {
            Ok(()) => applied += 1,
            Err(e) => {
                tracing::warn!(error = %e, applied, total, "stopping batch apply on first failure");
                break;
            }
        }
    }
    Json(ApplyResponse { applied, total })
}

#[derive(Debug, Serialize)]
pub struct PositionResponse {
    sequence: u64,
    entry_id: Option<uuid::Uuid>,
    timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

pub async fn get_position(State(state): State<ServiceState>) -> Result<Json<PositionResponse>, StatusCode> {
    let sequence = state.wal.position().await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let tail = if sequence == 0 {
        Vec::new()
    } else {
        state
            .wal
            .read(sequence - 1, 1)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    };
    let last = tail.into_iter().next();
    Ok(Json(PositionResponse {
        sequence,
        entry_id: last.as_ref().map(|e| e.id),
        timestamp: last.as_ref().map(|e| e.timestamp),
    }))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    role: Role,
    region: String,
    wal_position: u64,
    conflict_count: u64,
    followers: Option<Vec<(maia_replication::FollowerConfig, maia_replication::FollowerStatus)>>,
    leader_endpoint: Option<String>,
}

pub async fn get_stats(State(state): State<ServiceState>) -> Result<Json<StatsResponse>, StatusCode> {
    let role = state.manager.role().await;
    let wal_position = state.wal.position().await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let (followers, leader_endpoint) = match role {
        Role::Leader => (Some(state.manager.follower_statuses().await), None),
        Role::Follower => (None, state.manager.leader_endpoint().await),
        Role::Standalone => (None, None),
    };
    Ok(Json(StatsResponse {
        role,
        region: state.config.region.clone(),
        wal_position,
        conflict_count: state.manager.conflict_count(),
        followers,
        leader_endpoint,
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    role: Role,
    region: String,
    wal_position: u64,
    followers_connected: Option<usize>,
    leader_reachable: Option<bool>,
}

pub async fn get_health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    let role = state.manager.role().await;
    let wal_position = state.wal.position().await.unwrap_or(0);

    let (status, followers_connected, leader_reachable) = match role {
        Role::Leader => {
            let statuses = state.manager.follower_statuses().await;
            let connected = statuses.iter().filter(|(_, s)| s.connected).count();
            let status = if statuses.is_empty() || connected == statuses.len() {
                "healthy"
            } else if connected > 0 {
                "degraded"
            } else {
                "unhealthy"
            };
            (status, Some(connected), None)
        }
        Role::Follower => {
            let election = state.election.read().await;
            let stale = election.elapsed_since_activity() >= state.config.leader_timeout;
            (if stale { "degraded" } else { "healthy" }, None, Some(!stale))
        }
        Role::Standalone => ("healthy", None, None),
    };

    Json(HealthResponse {
        status,
        role,
        region: state.config.region.clone(),
        wal_position,
        followers_connected,
        leader_reachable,
    })
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::Leader => "leader",
        Role::Follower => "follower",
        Role::Standalone => "standalone",
    }
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}
