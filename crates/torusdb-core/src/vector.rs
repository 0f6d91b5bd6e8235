//! Vector domain types shared between the front door and storage nodes.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A vector record as stored on a shard. Immutable once written; an upsert
/// with the same id replaces it atomically on the owning shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorRecord {
    /// Positive 64-bit identifier, unique within a database.
    pub id: i64,

    /// Dense embedding; length must equal the database dimension.
    pub embedding: Vec<f32>,

    /// Opaque payload carried alongside the embedding.
    pub original_data: String,

    /// Owning logical database.
    pub database_id: String,

    /// Millisecond instant the record was first written.
    pub created_at: DateTime<Utc>,
}

impl VectorRecord {
    /// Creates a record stamped with the current instant.
    #[must_use]
    pub fn new(
        id: i64,
        embedding: Vec<f32>,
        original_data: impl Into<String>,
        database_id: impl Into<String>,
    ) -> Self {
        Self {
            id,
            embedding,
            original_data: original_data.into(),
            database_id: database_id.into(),
            created_at: Utc::now(),
        }
    }

    /// Returns the embedding dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }

    /// Milliseconds since the Unix epoch, as carried on the wire.
    #[must_use]
    pub fn created_at_millis(&self) -> i64 {
        self.created_at.timestamp_millis()
    }

    /// Rebuilds the creation instant from a wire-format millisecond stamp.
    #[must_use]
    pub fn instant_from_millis(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// One entry of a top-K search response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    /// Distance in `[0, inf)`; the merge sort key, ascending.
    pub distance: f64,

    /// Similarity in `[0, 1]`, passed through from the index unchanged.
    pub similarity: f64,

    /// The matching record.
    pub vector: VectorRecord,
}

impl SearchHit {
    /// Total order used when merging shard responses: ascending distance,
    /// ties broken by ascending id for determinism.
    #[must_use]
    pub fn merge_key(&self) -> (f64, i64) {
        (self.distance, self.vector.id)
    }
}
