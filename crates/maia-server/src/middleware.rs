//! Tenant-locality routing: redirects (or rejects) requests that belong to
//! another region's primary or a caller's preferred replica.

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use maia_replication::{
    route_request, RoutingDecision, PREFERRED_REGION_HEADER, PRIMARY_REGION_HEADER,
    REDIRECT_REASON_HEADER, TENANT_HEADER,
};

use crate::state::ServiceState;

pub async fn route_by_placement(
    State(state): State<ServiceState>,
    req: Request,
    next: Next,
) -> Response {
    let tenant_id = header_str(&req, TENANT_HEADER).map(|s| s.to_string());
    let preferred_region = header_str(&req, PREFERRED_REGION_HEADER).map(|s| s.to_string());
    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(|q| q.to_string());

    let placement = match tenant_id.as_deref() {
        Some(tenant_id) => match state.placement_cache.get(tenant_id).await {
            Ok(p) => Some(p),
            Err(maia_replication::ReplicationError::PlacementNotFound { .. }) => None,
            Err(e) => {
                tracing::warn!(tenant_id, error = %e, "placement lookup failed; serving locally");
                None
            }
        },
        None => None,
    };

    let decision = route_request(
        tenant_id.as_deref(),
        &method,
        &path,
        query.as_deref(),
        preferred_region.as_deref(),
        &state.config.region,
        placement.as_ref(),
        |region| state.config.region_base_urls.get(region).cloned(),
    );

    match decision {
        RoutingDecision::Forward => next.run(req).await,
        RoutingDecision::Redirect { location, reason, region } => {
            redirect_response(&location, reason, &region)
        }
        RoutingDecision::Unavailable { region } => unavailable_response(&region),
    }
}

fn header_str<'a>(req: &'a Request, name: &str) -> Option<&'a str> {
    req.headers().get(name)?.to_str().ok()
}

fn redirect_response(location: &str, reason: &'static str, region: &str) -> Response {
    let mut response = StatusCode::TEMPORARY_REDIRECT.into_response();
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(location) {
        headers.insert(axum::http::header::LOCATION, v);
    }
    if let Ok(v) = HeaderValue::from_str(reason) {
        headers.insert(REDIRECT_REASON_HEADER, v);
    }
    if let Ok(v) = HeaderValue::from_str(region) {
        headers.insert(PRIMARY_REGION_HEADER, v);
    }
    response
}

#[derive(Serialize)]
struct UnavailableBody {
    error: &'static str,
    region: String,
}

fn unavailable_response(region: &str) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(UnavailableBody { error: "REGION_UNAVAILABLE", region: region.to_string() }),
    )
        .into_response()
}
