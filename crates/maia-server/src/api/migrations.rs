//! Migration administration endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;

use maia_migration::Migration;

use crate::state::ServiceState;

#[derive(Debug, Deserialize)]
pub struct MigrateRequest {
    pub to_region: String,
    #[serde(default)]
    pub dry_run: bool,
}

pub async fn start_migration(
    State(state): State<ServiceState>,
    Path(tenant_id): Path<String>,
    Json(req): Json<MigrateRequest>,
) -> Result<Json<Migration>, StatusCode> {
    state
        .migrations
        .start_migration(&tenant_id, &req.to_region, req.dry_run)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::warn!(tenant_id, error = %e, "migration start rejected");
            StatusCode::CONFLICT
        })
}

pub async fn list_tenant_migrations(
    State(state): State<ServiceState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<Vec<Migration>>, StatusCode> {
    state
        .migrations
        .list_for_tenant(&tenant_id)
        .await
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

pub async fn list_all_migrations(
    State(state): State<ServiceState>,
) -> Result<Json<Vec<Migration>>, StatusCode> {
    state.migrations.list_all().await.map(Json).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

pub async fn get_migration(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<Migration>, StatusCode> {
    state.migrations.get_migration(&id).await.map(Json).ok_or(StatusCode::NOT_FOUND)
}

pub async fn cancel_migration(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> StatusCode {
    match state.migrations.cancel_migration(&id).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::NOT_FOUND,
    }
}
