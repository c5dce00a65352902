//! **maia-replication** — the replicated store wrapper, conflict
//! resolution, the manager (push/pull loops and `applyEntry`), the
//! placement cache, and the routing decision that ties them to per-request
//! tenant locality.

mod error;
mod manager;
mod placement;
mod resolver;
mod routing;
mod store;

pub use error::{ReplicationError, ReplicationResult};
pub use manager::{
    FollowerConfig, FollowerStatus, Manager, ManagerConfig, Role, SyncMode,
};
pub use placement::{PlacementCache, PlacementCacheStats, PlacementMode, PlacementSource, TenantPlacement};
pub use resolver::{ConflictResolver, LastWriteWins, Merge, Reject};
pub use routing::{
    classify_method, is_excluded_path, route_request, RequestClass, RoutingDecision,
    PREFERRED_REGION_HEADER, PRIMARY_REGION_HEADER, REDIRECT_REASON_HEADER, TENANT_HEADER,
};
pub use store::{Memory, MemoryStore, Namespace, ReplicatedStore, Store};
