//! The routing decision itself, as a pure function so it can be unit
//! tested without standing up an HTTP server. `maia-server` wires this
//! into a `tower::Layer`.

use crate::placement::TenantPlacement;

/// Header carrying the caller's tenant, when not already set upstream.
pub const TENANT_HEADER: &str = "X-MAIA-Tenant-ID";
/// Header carrying a caller's preferred read region.
pub const PREFERRED_REGION_HEADER: &str = "X-MAIA-Preferred-Region";
/// Header explaining why a redirect happened.
pub const REDIRECT_REASON_HEADER: &str = "X-MAIA-Redirect-Reason";
/// Header naming the tenant's primary region on a write redirect.
pub const PRIMARY_REGION_HEADER: &str = "X-MAIA-Primary-Region";

/// Path prefixes the routing middleware never touches.
const EXCLUDED_PREFIXES: &[&str] = &["/health", "/ready", "/metrics", "/admin/", "/replication/"];

/// Whether a request of this HTTP method counts as a write for routing
/// purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    Read,
    Write,
}

/// Outcome of a routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Serve locally.
    Forward,
    /// 307 redirect.
    Redirect {
        location: String,
        reason: &'static str,
        region: String,
    },
    /// 503 `REGION_UNAVAILABLE`: the target region has no base URL.
    Unavailable { region: String },
}

/// True if `path` is one the routing middleware passes through untouched.
pub fn is_excluded_path(path: &str) -> bool {
    EXCLUDED_PREFIXES.iter().any(|p| path.starts_with(p))
}

/// Classify an HTTP method as read or write.
pub fn classify_method(method: &str) -> RequestClass {
    match method.to_ascii_uppercase().as_str() {
        "POST" | "PUT" | "PATCH" | "DELETE" => RequestClass::Write,
        _ => RequestClass::Read,
    }
}

/// Decide what to do with a request, given its already-resolved placement
/// (or `None` if no placement is on file / the cache lookup failed — both
/// cases fail open to local serving).
#[allow(clippy::too_many_arguments)]
pub fn route_request(
    tenant_id: Option<&str>,
    method: &str,
    path: &str,
    query: Option<&str>,
    preferred_region: Option<&str>,
    local_region: &str,
    placement: Option<&TenantPlacement>,
    region_base_url: impl Fn(&str) -> Option<String>,
) -> RoutingDecision {
    if is_excluded_path(path) {
        return RoutingDecision::Forward;
    }
    let Some(_tenant_id) = tenant_id else {
        return RoutingDecision::Forward;
    };
    let Some(placement) = placement else {
        return RoutingDecision::Forward;
    };

    match classify_method(method) {
        RequestClass::Write => {
            if placement.primary_region == local_region {
                return RoutingDecision::Forward;
            }
            match region_base_url(&placement.primary_region) {
                Some(base) => RoutingDecision::Redirect {
                    location: build_location(&base, path, query),
                    reason: "write-to-primary",
                    region: placement.primary_region.clone(),
                },
                None => RoutingDecision::Unavailable { region: placement.primary_region.clone() },
            }
        }
        RequestClass::Read => {
            let Some(preferred) = preferred_region else {
                return RoutingDecision::Forward;
            };
            if preferred == local_region {
                return RoutingDecision::Forward;
            }
            let is_valid_replica = preferred == placement.primary_region
                || placement.replicas.iter().any(|r| r == preferred);
            if !is_valid_replica {
                return RoutingDecision::Forward;
            }
            match region_base_url(preferred) {
                Some(base) => RoutingDecision::Redirect {
                    location: build_location(&base, path, query),
                    reason: "preferred-region",
                    region: preferred.to_string(),
                },
                // A preferred region with no base URL is not an error: just
                // serve locally.
                None => RoutingDecision::Forward,
            }
        }
    }
}

fn build_location(base: &str, path: &str, query: Option<&str>) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("{base}{path}?{q}"),
        _ => format!("{base}{path}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::placement::PlacementMode;

    fn placement(primary: &str, replicas: &[&str]) -> TenantPlacement {
        let now = Utc::now();
        TenantPlacement {
            tenant_id: "t1".into(),
            primary_region: primary.into(),
            replicas: replicas.iter().map(|s| s.to_string()).collect(),
            mode: PlacementMode::Replicated,
            created_at: now,
            updated_at: now,
        }
    }

    fn base_urls(region: &str) -> Option<String> {
        match region {
            "us-west-1" => Some("https://us-west".to_string()),
            _ => None,
        }
    }

    #[test]
    fn write_to_non_primary_redirects() {
        let p = placement("us-west-1", &["eu-central-1"]);
        let decision = route_request(
            Some("t1"),
            "POST",
            "/v1/memories",
            None,
            None,
            "eu-central-1",
            Some(&p),
            base_urls,
        );
        assert_eq!(
            decision,
            RoutingDecision::Redirect {
                location: "https://us-west/v1/memories".into(),
                reason: "write-to-primary",
                region: "us-west-1".into(),
            }
        );
    }

    #[test]
    fn write_to_unreachable_primary_is_unavailable() {
        let p = placement("ap-south-1", &[]);
        let decision = route_request(
            Some("t1"), "POST", "/v1/memories", None, None, "eu-central-1", Some(&p), base_urls,
        );
        assert_eq!(decision, RoutingDecision::Unavailable { region: "ap-south-1".into() });
    }

    #[test]
    fn read_with_valid_preferred_replica_redirects() {
        let p = placement("us-west-1", &["eu-central-1"]);
        let decision = route_request(
            Some("t1"), "GET", "/v1/memories/m1", None, Some("us-west-1"), "eu-central-1",
            Some(&p), base_urls,
        );
        assert_eq!(
            decision,
            RoutingDecision::Redirect {
                location: "https://us-west/v1/memories/m1".into(),
                reason: "preferred-region",
                region: "us-west-1".into(),
            }
        );
    }

    #[test]
    fn read_without_preferred_region_forwards() {
        let p = placement("us-west-1", &["eu-central-1"]);
        let decision = route_request(
            Some("t1"), "GET", "/v1/memories/m1", None, None, "eu-central-1", Some(&p), base_urls,
        );
        assert_eq!(decision, RoutingDecision::Forward);
    }

    #[test]
    fn read_with_unreachable_preferred_region_forwards_not_errors() {
        let p = placement("us-west-1", &["eu-central-1", "ap-south-1"]);
        let decision = route_request(
            Some("t1"), "GET", "/v1/memories/m1", None, Some("ap-south-1"), "eu-central-1",
            Some(&p), base_urls,
        );
        assert_eq!(decision, RoutingDecision::Forward);
    }

    #[test]
    fn missing_tenant_forwards() {
        let decision = route_request(
            None, "POST", "/v1/memories", None, None, "eu-central-1", None, base_urls,
        );
        assert_eq!(decision, RoutingDecision::Forward);
    }

    #[test]
    fn excluded_paths_always_forward() {
        let p = placement("us-west-1", &[]);
        let decision = route_request(
            Some("t1"), "POST", "/replication/entries", None, None, "eu-central-1",
            Some(&p), base_urls,
        );
        assert_eq!(decision, RoutingDecision::Forward);
    }
}
