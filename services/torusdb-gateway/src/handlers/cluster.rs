//! Operator control surface: read and submit cluster configs.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use torusdb_core::ClusterConfig;

use crate::error::ApiError;
use crate::state::AppState;

/// Response for a submitted config.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResponse {
    pub applied: bool,
    pub added_shards: usize,
}

/// Availability-annotated shard row for the status endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardStatusRow {
    pub shard_id: String,
    pub base_url: String,
    pub hash_key: u64,
    pub status: torusdb_core::ShardStatus,
    pub available: bool,
}

/// Returns the current cluster config.
pub async fn get_config(State(state): State<AppState>) -> Json<ClusterConfig> {
    Json(state.control.current_config())
}

/// Persists a new config and kicks resharding in the background.
/// Answers once the update is durable, independent of migration progress.
pub async fn put_config(
    State(state): State<AppState>,
    Json(config): Json<ClusterConfig>,
) -> Result<Json<ApplyResponse>, ApiError> {
    tracing::info!(shards = config.shards.len(), "operator submitted cluster config");
    let added_shards = state.control.submit(config).await?;
    Ok(Json(ApplyResponse {
        applied: true,
        added_shards,
    }))
}

/// Shard descriptors with their live availability classification.
pub async fn cluster_status(State(state): State<AppState>) -> Json<Vec<ShardStatusRow>> {
    let snapshot = state.view.current();
    let rows = snapshot
        .config
        .shards
        .iter()
        .map(|shard| ShardStatusRow {
            shard_id: shard.shard_id.clone(),
            base_url: shard.base_url.clone(),
            hash_key: shard.hash_key,
            status: shard.status,
            available: state.health.is_available(&shard.shard_id),
        })
        .collect();
    Json(rows)
}
