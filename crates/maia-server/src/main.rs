#![forbid(unsafe_code)]

//! **maia-server** — HTTP front for the MAIA multi-region replication core:
//! the replication wire API, placement and follower administration, and
//! staged tenant migration control.

mod api;
mod config;
mod middleware;
mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{delete, get, post, put};
use axum::Router;
use clap::Parser;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use maia_election::{ElectionConfig, ElectionState, FailoverSupervisor};
use maia_migration::MigrationExecutor;
use maia_replication::{
    ConflictResolver, LastWriteWins, Manager, ManagerConfig, Merge, MemoryStore, PlacementCache,
    Reject, ReplicatedStore, Role as ManagerRole,
};
use maia_wal::{Kv, KvWal, MemoryKv};

use crate::config::{ConflictStrategy, MaiaConfig, StartupRole};
use crate::state::ServiceState;

#[derive(Parser)]
#[command(name = "maia-server")]
#[command(about = "MAIA multi-region replication node")]
#[command(version)]
struct Cli {
    /// Configuration file path (TOML).
    #[arg(long, default_value = "config/maia.toml")]
    config: String,

    /// Overrides the configured node id.
    #[arg(long)]
    node_id: Option<String>,

    /// Overrides the configured region.
    #[arg(long)]
    region: Option<String>,

    /// Overrides the configured HTTP bind address.
    #[arg(long)]
    bind: Option<String>,

    /// Overrides the configured log level.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let mut config = MaiaConfig::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config))?;

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(region) = cli.region {
        config.region = region;
    }
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(log_level) = cli.log_level {
        config.log_level = log_level;
    }
    config.validate().context("invalid configuration")?;

    init_logging(&config.log_level)?;

    info!(node_id = %config.node_id, region = %config.region, "starting maia-server v{}", env!("CARGO_PKG_VERSION"));

    let state = build_state(config.clone()).await?;

    state.manager.clone().run().await;
    spawn_failover_ticker(state.failover.clone(), state.election_config.heartbeat_interval);
    spawn_placement_cache_janitor(state.placement_cache.clone(), config.placement_cache_ttl);

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!("listening on {}", config.bind_addr);

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            if let Err(e) = result {
                warn!(error = %e, "http server exited with error");
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("maia-server stopped");
    Ok(())
}

async fn build_state(config: MaiaConfig) -> Result<ServiceState> {
    let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
    let wal = Arc::new(KvWal::open(kv.clone(), config.region.clone()).await?);
    let wal_dyn: Arc<dyn maia_wal::Wal> = wal.clone();

    let memory_store = Arc::new(MemoryStore::new());
    let store = Arc::new(ReplicatedStore::new(memory_store.clone(), wal_dyn.clone(), config.region.clone()));

    let resolver: Arc<dyn ConflictResolver> = match config.conflict_strategy {
        ConflictStrategy::LastWriteWins => Arc::new(LastWriteWins),
        ConflictStrategy::Merge => Arc::new(Merge),
        ConflictStrategy::Reject => Arc::new(Reject),
    };

    let manager_role = match config.role {
        StartupRole::Leader => ManagerRole::Leader,
        StartupRole::Follower => ManagerRole::Follower,
        StartupRole::Standalone => ManagerRole::Standalone,
    };
    let manager_config = ManagerConfig {
        node_id: config.node_id.clone(),
        region: config.region.clone(),
        role: manager_role,
        push_interval: config.push_interval,
        pull_interval: config.pull_interval,
        batch_size: config.batch_size,
        leader_endpoint: config.leader_endpoint.clone(),
        sync_mode: maia_replication::SyncMode::Async,
    };
    let manager = Manager::new(manager_config, wal_dyn.clone(), memory_store.clone(), resolver);
    manager.set_commit_notify(store.commit_notify.clone()).await;

    let election_config = ElectionConfig {
        node_id: config.node_id.clone(),
        peers: config.peers.clone(),
        heartbeat_interval: config.heartbeat_interval,
        election_timeout_min: config.election_timeout_min,
        election_timeout_max: config.election_timeout_max,
    };
    election_config.validate().context("invalid election configuration")?;

    let election = Arc::new(tokio::sync::RwLock::new(ElectionState::new(
        config.node_id.clone(),
        election_config.quorum_size(),
    )));
    let failover = Arc::new(FailoverSupervisor::new(
        election.clone(),
        config.leader_timeout,
        config.inhibit_window,
    ));

    let placement_cache = Arc::new(PlacementCache::new(manager.clone(), config.placement_cache_ttl));
    let migrations = MigrationExecutor::new(kv.clone(), manager.clone(), placement_cache.clone());

    Ok(ServiceState {
        config,
        kv,
        wal: wal_dyn,
        store,
        manager,
        election,
        election_config,
        failover,
        placement_cache,
        migrations,
    })
}

fn create_app(state: ServiceState) -> Router {
    let replication_routes = Router::new()
        .route("/entries", get(api::replication::get_entries).post(api::replication::post_entries))
        .route("/position", get(api::replication::get_position))
        .route("/stats", get(api::replication::get_stats))
        .route("/health", get(api::replication::get_health))
        .route("/followers", get(api::admin::list_followers).post(api::admin::add_follower))
        .route(
            "/followers/:id",
            get(api::admin::get_follower).delete(api::admin::delete_follower),
        )
        .route("/leader", get(api::admin::get_leader).put(api::admin::put_leader));

    let admin_routes = Router::new()
        .route("/tenants/:id/migrate", post(api::migrations::start_migration))
        .route("/tenants/:id/migrations", get(api::migrations::list_tenant_migrations))
        .route("/migrations", get(api::migrations::list_all_migrations))
        .route("/migrations/:id", get(api::migrations::get_migration))
        .route("/migrations/:id/cancel", post(api::migrations::cancel_migration));

    let placement_routes = Router::new().route(
        "/:tenant_id",
        get(api::admin::get_placement)
            .put(api::admin::put_placement)
            .delete(api::admin::delete_placement),
    );

    Router::new()
        .nest("/replication", replication_routes)
        .nest("/admin", admin_routes)
        .nest("/placements", placement_routes)
        .route("/health", get(api::replication::get_health))
        .with_state(state.clone())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn_with_state(
                    state,
                    middleware::route_by_placement,
                ))
                .into_inner(),
        )
}

fn spawn_failover_ticker(failover: Arc<FailoverSupervisor>, interval: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            failover.tick().await;
        }
    });
}

fn spawn_placement_cache_janitor<P: maia_replication::PlacementSource + 'static>(
    cache: Arc<PlacementCache<P>>,
    ttl: std::time::Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ttl);
        loop {
            ticker.tick().await;
            cache.cleanup_expired();
        }
    });
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = format!(
        "maia_server={level},maia_replication={level},maia_election={level},maia_wal={level},maia_migration={level}",
        level = log_level
    );
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .init();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
