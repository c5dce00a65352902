//! End-to-end leader-to-follower push over real HTTP, mirroring
//! `toka-store-raft`'s integration-test style of standing up more than one
//! node in-process and asserting on their converged state.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::Json;
use axum::routing::post;
use axum::Router;

use maia_replication::{LastWriteWins, Manager, ManagerConfig, MemoryStore, Role};
use maia_wal::{KvWal, MemoryKv, Operation, WalEntry};

#[derive(Clone)]
struct FollowerState {
    manager: Arc<Manager>,
}

async fn apply_batch(
    State(state): State<FollowerState>,
    Json(entries): Json<Vec<WalEntry>>,
) -> Json<serde_json::Value> {
    let mut applied = 0;
    for entry in entries {
        if state.manager.apply_entry(entry).await.is_ok() {
            applied += 1;
        }
    }
    Json(serde_json::json!({ "applied": applied }))
}

async fn spawn_follower_server() -> (Arc<Manager>, String) {
    let kv: Arc<dyn maia_wal::Kv> = Arc::new(MemoryKv::new());
    let wal = Arc::new(KvWal::open(kv, "eu-central-1").await.unwrap());
    let store = Arc::new(MemoryStore::new());
    let manager = Manager::new(
        ManagerConfig { region: "eu-central-1".into(), role: Role::Standalone, ..ManagerConfig::default() },
        wal,
        store,
        Arc::new(LastWriteWins),
    );

    let app = Router::new()
        .route("/replication/entries", post(apply_batch))
        .with_state(FollowerState { manager: manager.clone() });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (manager, format!("http://{addr}"))
}

fn memory_create_entry(tenant: &str, resource_id: &str, content: &str) -> WalEntry {
    let mut e = WalEntry {
        id: uuid::Uuid::now_v7(),
        sequence: 0,
        timestamp: chrono::Utc::now(),
        tenant_id: tenant.into(),
        operation: Operation::Create,
        resource_type: "memory".into(),
        resource_id: resource_id.into(),
        namespace: "default".into(),
        data: serde_json::json!({
            "id": resource_id, "namespace": "default", "tenant_id": tenant, "content": content,
            "metadata": {}, "tags": [], "access_count": 0,
            "created_at": chrono::Utc::now(), "updated_at": chrono::Utc::now(),
        }),
        previous_data: None,
        checksum: 0,
        region: "us-west-1".into(),
        replicated: false,
    };
    e.seal();
    e
}

#[tokio::test]
async fn leader_pushes_writes_to_follower_within_one_interval() {
    let (follower_manager, follower_addr) = spawn_follower_server().await;

    let leader_kv: Arc<dyn maia_wal::Kv> = Arc::new(MemoryKv::new());
    let leader_wal = Arc::new(KvWal::open(leader_kv, "us-west-1").await.unwrap());
    let leader_store = Arc::new(MemoryStore::new());
    let push_interval = Duration::from_millis(40);
    let leader = Manager::new(
        ManagerConfig {
            region: "us-west-1".into(),
            role: Role::Leader,
            push_interval,
            ..ManagerConfig::default()
        },
        leader_wal.clone(),
        leader_store,
        Arc::new(LastWriteWins),
    );
    leader.add_follower(maia_replication::FollowerConfig {
        id: "f1".into(),
        endpoint: follower_addr,
        region: "eu-central-1".into(),
        priority: 1,
        max_lag: 1000,
    });

    let _handles = leader.run().await;

    let entry = memory_create_entry("t1", "m1", "hello");
    leader_wal.append(entry).await.unwrap();

    tokio::time::sleep(push_interval * 5).await;

    let got = follower_manager.get_placement("t1"); // sanity: manager is alive
    assert!(got.is_none());

    let statuses = leader.follower_statuses().await;
    let (_, status) = &statuses[0];
    assert!(status.connected, "leader never reached the follower");
    assert_eq!(status.last_push_seq, 1);
}
