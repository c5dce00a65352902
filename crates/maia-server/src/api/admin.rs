//! Placement, follower, and leader administration endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use maia_replication::{FollowerConfig, FollowerStatus, PlacementMode, Role, TenantPlacement};

use crate::state::ServiceState;

#[derive(Debug, Deserialize)]
pub struct PutPlacementRequest {
    pub primary_region: String,
    #[serde(default)]
    pub replicas: Vec<String>,
    #[serde(default = "default_mode")]
    pub mode: PlacementMode,
}

fn default_mode() -> PlacementMode {
    PlacementMode::Replicated
}

pub async fn get_placement(
    State(state): State<ServiceState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<TenantPlacement>, StatusCode> {
    state.manager.get_placement(&tenant_id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

pub async fn put_placement(
    State(state): State<ServiceState>,
    Path(tenant_id): Path<String>,
    Json(req): Json<PutPlacementRequest>,
) -> Json<TenantPlacement> {
    let now = Utc::now();
    let placement = TenantPlacement {
        tenant_id: tenant_id.clone(),
        primary_region: req.primary_region,
        replicas: req.replicas,
        mode: req.mode,
        created_at: now,
        updated_at: now,
    };
    state.manager.set_placement(placement.clone());
    state.placement_cache.invalidate(&tenant_id);
    Json(placement)
}

pub async fn delete_placement(
    State(state): State<ServiceState>,
    Path(tenant_id): Path<String>,
) -> StatusCode {
    state.manager.remove_placement(&tenant_id);
    state.placement_cache.invalidate(&tenant_id);
    StatusCode::NO_CONTENT
}

#[derive(Debug, Serialize)]
pub struct FollowerView {
    #[serde(flatten)]
    pub config: FollowerConfig,
    pub status: FollowerStatus,
}

pub async fn list_followers(State(state): State<ServiceState>) -> Json<Vec<FollowerView>> {
    let followers = state
        .manager
        .follower_statuses()
        .await
        .into_iter()
        .map(|(config, status)| FollowerView { config, status })
        .collect();
    Json(followers)
}

pub async fn add_follower(
    State(state): State<ServiceState>,
    Json(config): Json<FollowerConfig>,
) -> StatusCode {
    state.manager.add_follower(config);
    StatusCode::CREATED
}

pub async fn get_follower(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<FollowerView>, StatusCode> {
    state
        .manager
        .follower_statuses()
        .await
        .into_iter()
        .find(|(config, _)| config.id == id)
        .map(|(config, status)| Json(FollowerView { config, status }))
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn delete_follower(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> StatusCode {
    state.manager.remove_follower(&id);
    StatusCode::NO_CONTENT
}

#[derive(Debug, Serialize)]
pub struct LeaderView {
    pub role: Role,
    pub leader_endpoint: Option<String>,
}

pub async fn get_leader(State(state): State<ServiceState>) -> Json<LeaderView> {
    Json(LeaderView {
        role: state.manager.role().await,
        leader_endpoint: state.manager.leader_endpoint().await,
    })
}

#[derive(Debug, Deserialize)]
pub struct PutLeaderRequest {
    pub leader_endpoint: String,
}

/// Demotes this node to follower of `leader_endpoint` and (re-)spawns the
/// pull worker appropriate to that role.
pub async fn put_leader(
    State(state): State<ServiceState>,
    Json(req): Json<PutLeaderRequest>,
) -> Json<LeaderView> {
    state.manager.set_leader_endpoint(Some(req.leader_endpoint.clone())).await;
    state.manager.set_role(Role::Follower).await;
    let _ = state.manager.clone().run().await;
    Json(LeaderView {
        role: Role::Follower,
        leader_endpoint: Some(req.leader_endpoint),
    })
}
