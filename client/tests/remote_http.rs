//! HTTP transport tests against a local in-process server.
//!
//! Verifies the wire shapes the transport sends and expects, and the
//! mapping from transport/HTTP failures onto the error taxonomy.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tempo_client::{HttpRemote, RemoteTransport, SyncConfig, SyncError};
use tempo_engine::{SessionMode, SessionRecord, UserSnapshot};

// ============================================================================
// Support
// ============================================================================

#[derive(Default)]
struct ServerState {
    snapshot: Mutex<UserSnapshot>,
    last_push_body: Mutex<Option<Value>>,
}

async fn get_data(
    State(state): State<Arc<ServerState>>,
    Path(_user_id): Path<String>,
) -> Json<Value> {
    let snapshot = state.snapshot.lock().unwrap().clone();
    Json(json!({ "data": snapshot }))
}

async fn post_sync(
    State(state): State<Arc<ServerState>>,
    Path(_user_id): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    if let Ok(snapshot) = serde_json::from_value::<UserSnapshot>(body.clone()) {
        *state.snapshot.lock().unwrap() = snapshot;
    }
    *state.last_push_body.lock().unwrap() = Some(body);
    Json(json!({ "accepted": true, "serverTime": 1_717_236_000_000u64 }))
}

async fn spawn_server(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn spawn_account_server(state: Arc<ServerState>) -> SocketAddr {
    let router = Router::new()
        .route("/api/user/{user_id}/data", get(get_data))
        .route("/api/user/{user_id}/sync", post(post_sync))
        .with_state(state);
    spawn_server(router).await
}

fn remote_for(addr: SocketAddr) -> HttpRemote {
    let config = SyncConfig {
        base_url: format!("http://{addr}"),
        ..Default::default()
    };
    HttpRemote::new(&config).unwrap()
}

fn sample_snapshot() -> UserSnapshot {
    let mut snapshot = UserSnapshot::default();
    snapshot.sessions.push(SessionRecord::new(
        "2024-06-01",
        25,
        SessionMode::Classic,
        1_717_236_000_000,
    ));
    snapshot
}

// ============================================================================
// Round trips
// ============================================================================

#[tokio::test]
async fn push_then_pull_round_trips_the_snapshot() {
    let state = Arc::new(ServerState::default());
    let addr = spawn_account_server(Arc::clone(&state)).await;
    let remote = remote_for(addr);

    let snapshot = sample_snapshot();
    let ack = remote.push("u1", &snapshot).await.unwrap();
    assert!(ack.accepted);
    assert_eq!(ack.server_time, Some(1_717_236_000_000));

    let pulled = remote.pull("u1").await.unwrap();
    assert_eq!(pulled, snapshot);
}

#[tokio::test]
async fn push_body_carries_exactly_the_three_entity_fields() {
    let state = Arc::new(ServerState::default());
    let addr = spawn_account_server(Arc::clone(&state)).await;
    let remote = remote_for(addr);

    remote.push("u1", &sample_snapshot()).await.unwrap();

    let body = state.last_push_body.lock().unwrap().clone().unwrap();
    let mut keys: Vec<_> = body.as_object().unwrap().keys().cloned().collect();
    keys.sort();
    assert_eq!(keys, vec!["sessions", "streaks", "tasks"]);
}

#[tokio::test]
async fn pulling_a_user_with_no_server_data_yields_an_empty_snapshot() {
    // Endpoint answers the way the server does for a brand new account.
    let router = Router::new().route(
        "/api/user/{user_id}/data",
        get(|| async { Json(json!({})) }),
    );
    let addr = spawn_server(router).await;

    let pulled = remote_for(addr).pull("new-user").await.unwrap();
    assert!(pulled.is_empty());
}

// ============================================================================
// Failure classification
// ============================================================================

#[tokio::test]
async fn server_errors_map_to_remote_unavailable() {
    let router = Router::new().route(
        "/api/user/{user_id}/data",
        get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
    );
    let addr = spawn_server(router).await;

    let err = remote_for(addr).pull("u1").await.unwrap_err();
    assert!(matches!(err, SyncError::RemoteUnavailable(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn client_errors_map_to_remote_rejected() {
    let router = Router::new().route(
        "/api/user/{user_id}/sync",
        post(|| async { StatusCode::UNPROCESSABLE_ENTITY }),
    );
    let addr = spawn_server(router).await;

    let err = remote_for(addr)
        .push("u1", &sample_snapshot())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::RemoteRejected(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn connection_refused_maps_to_remote_unavailable() {
    // Bind then immediately drop, so nothing listens on the port.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = remote_for(addr).pull("u1").await.unwrap_err();
    assert!(matches!(err, SyncError::RemoteUnavailable(_)));
}

#[tokio::test]
async fn malformed_success_body_maps_to_remote_rejected() {
    let router = Router::new().route(
        "/api/user/{user_id}/data",
        get(|| async { "not json at all" }),
    );
    let addr = spawn_server(router).await;

    let err = remote_for(addr).pull("u1").await.unwrap_err();
    assert!(matches!(err, SyncError::RemoteRejected(_)));
}
