//! HTTP-level tests over the full gateway stack with in-memory shards.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;
use torusdb_client::{InMemoryShard, ShardApi, ShardClientPool};
use torusdb_cluster::MemoryConfigBackend;
use torusdb_core::Settings;
use torusdb_gateway::{build_router, build_state_with_pool, state::AppState};

async fn test_state(shard_ids: &[&str]) -> (AppState, HashMap<String, Arc<InMemoryShard>>) {
    let shards: HashMap<String, Arc<InMemoryShard>> = shard_ids
        .iter()
        .map(|id| (id.to_string(), InMemoryShard::new(*id)))
        .collect();
    let pool = {
        let shards = shards.clone();
        Arc::new(ShardClientPool::with_factory(move |descriptor| {
            let shard: Arc<dyn ShardApi> = shards
                .get(&descriptor.shard_id)
                .expect("unknown shard in test fleet")
                .clone();
            shard
        }))
    };
    let state = build_state_with_pool(&Settings::default(), MemoryConfigBackend::new(), pool)
        .await
        .unwrap();
    (state, shards)
}

async fn send(
    state: &AppState,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let app = build_router(state.clone());
    let request = match body {
        Some(json) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

fn two_shard_config() -> serde_json::Value {
    serde_json::json!({
        "shards": [
            {"shardId": "s1", "baseUrl": "http://s1:7700", "hashKey": 0u64, "status": "ACTIVE"},
            {"shardId": "s2", "baseUrl": "http://s2:7700", "hashKey": 4_611_686_018_427_387_903u64, "status": "ACTIVE"}
        ],
        "metadata": {}
    })
}

#[tokio::test]
async fn health_answers_ok() {
    let (state, _) = test_state(&[]).await;
    let (status, body) = send(&state, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn config_round_trips_through_the_control_surface() {
    let (state, _) = test_state(&["s1", "s2"]).await;

    let (status, body) = send(&state, "PUT", "/cluster/config", Some(two_shard_config())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], true);
    assert_eq!(body["addedShards"], 2);

    let (status, body) = send(&state, "GET", "/cluster/config", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["shards"][0]["shardId"], "s1");
    assert_eq!(body["shards"][1]["hashKey"], 4_611_686_018_427_387_903u64);

    let (status, body) = send(&state, "GET", "/cluster/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert_eq!(body[0]["available"], true);
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let (state, _) = test_state(&["s1"]).await;
    let config = serde_json::json!({
        "shards": [
            {"shardId": "s1", "baseUrl": "http://s1:7700", "hashKey": 0u64, "status": "ACTIVE"},
            {"shardId": "s1", "baseUrl": "http://s1:7700", "hashKey": 10u64, "status": "ACTIVE"}
        ]
    });
    let (status, body) = send(&state, "PUT", "/cluster/config", Some(config)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "INVALID_CONFIG");
}

#[tokio::test]
async fn vectors_flow_through_the_data_plane() {
    let (state, _) = test_state(&["s1", "s2"]).await;
    send(&state, "PUT", "/cluster/config", Some(two_shard_config())).await;

    let (status, _) = send(
        &state,
        "POST",
        "/databases",
        Some(serde_json::json!({"id": "db1", "dimension": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &state,
        "POST",
        "/databases/db1/vectors",
        Some(serde_json::json!({"id": 100, "embedding": [0.5, 1.5], "originalData": "a"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 100);

    let (status, body) = send(&state, "GET", "/databases/db1/vectors/100", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["originalData"], "a");
    assert_eq!(body["databaseId"], "db1");

    let (status, body) = send(
        &state,
        "POST",
        "/databases/db1/search",
        Some(serde_json::json!({"probe": [0.5, 1.5], "k": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["results"][0]["vector"]["id"], 100);

    let (status, body) = send(&state, "DELETE", "/databases/db1/vectors/100", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);

    state.coordinator.replication().quiesce().await;
    let (status, body) = send(&state, "GET", "/databases/db1/vectors/100", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "NOT_FOUND");
}

#[tokio::test]
async fn dimension_mismatch_maps_to_unprocessable() {
    let (state, _) = test_state(&["s1", "s2"]).await;
    send(&state, "PUT", "/cluster/config", Some(two_shard_config())).await;
    send(
        &state,
        "POST",
        "/databases",
        Some(serde_json::json!({"id": "db2", "dimension": 4})),
    )
    .await;

    let (status, body) = send(
        &state,
        "POST",
        "/databases/db2/search",
        Some(serde_json::json!({"probe": [0.1, 0.2, 0.3], "k": 5})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "DIMENSION_MISMATCH");
    assert_eq!(body["expected"], 4);
    assert_eq!(body["actual"], 3);
}

#[tokio::test]
async fn empty_cluster_maps_to_service_unavailable() {
    let (state, _) = test_state(&[]).await;
    let (status, body) = send(
        &state,
        "POST",
        "/databases/db1/vectors",
        Some(serde_json::json!({"embedding": [1.0]})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "UNAVAILABLE");
}
