//! Data-plane handlers: add, get, delete, and search vectors.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use torusdb_core::{SearchHit, VectorRecord};

use crate::error::ApiError;
use crate::state::AppState;

/// Request to add one vector.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddVectorRequest {
    /// Caller-supplied id; generated when absent.
    #[serde(default)]
    pub id: Option<i64>,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub original_data: String,
}

/// Search request.
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub probe: Vec<f32>,
    #[serde(default = "default_k")]
    pub k: usize,
}

fn default_k() -> usize {
    10
}

/// Search response.
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub count: usize,
}

/// Response for a vector delete.
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

/// Writes a vector through its primary.
pub async fn add_vector(
    State(state): State<AppState>,
    Path(database_id): Path<String>,
    Json(req): Json<AddVectorRequest>,
) -> Result<Json<VectorRecord>, ApiError> {
    let record = state
        .coordinator
        .add_vector(&database_id, req.id, req.embedding, req.original_data)
        .await?;
    Ok(Json(record))
}

/// Reads a vector, falling back to replicas and stranded copies.
pub async fn get_vector(
    State(state): State<AppState>,
    Path((database_id, id)): Path<(String, i64)>,
) -> Result<Json<VectorRecord>, ApiError> {
    Ok(Json(state.coordinator.get_vector(&database_id, id).await?))
}

/// Best-effort delete across all candidate shards.
pub async fn delete_vector(
    State(state): State<AppState>,
    Path((database_id, id)): Path<(String, i64)>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let deleted = state.coordinator.delete_vector(&database_id, id).await?;
    Ok(Json(DeleteResponse { deleted }))
}

/// Top-K similarity search fanned out over the read ring.
pub async fn search(
    State(state): State<AppState>,
    Path(database_id): Path<String>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let results = state
        .coordinator
        .search(&database_id, &req.probe, req.k)
        .await?;
    let count = results.len();
    Ok(Json(SearchResponse { results, count }))
}
