//! Database lifecycle handlers.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use torusdb_core::DatabaseDescriptor;

use crate::error::ApiError;
use crate::state::AppState;

/// Request to create a database.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDatabaseRequest {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub dimension: u32,
}

/// Response for a database drop.
#[derive(Debug, Serialize)]
pub struct DropResponse {
    pub dropped: bool,
}

/// Creates a database on every writable shard.
pub async fn create_database(
    State(state): State<AppState>,
    Json(req): Json<CreateDatabaseRequest>,
) -> Result<Json<DatabaseDescriptor>, ApiError> {
    let display_name = req.display_name.unwrap_or_else(|| req.id.clone());
    let descriptor = state
        .coordinator
        .create_database(&req.id, &display_name, req.dimension)
        .await?;
    Ok(Json(descriptor))
}

/// Drops a database from every writable shard; missing is success.
pub async fn drop_database(
    State(state): State<AppState>,
    Path(database_id): Path<String>,
) -> Result<Json<DropResponse>, ApiError> {
    state.coordinator.drop_database(&database_id).await?;
    Ok(Json(DropResponse { dropped: true }))
}

/// Lists known databases.
pub async fn list_databases(
    State(state): State<AppState>,
) -> Result<Json<Vec<DatabaseDescriptor>>, ApiError> {
    Ok(Json(state.coordinator.list_databases().await?))
}
