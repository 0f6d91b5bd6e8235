use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata describing a logical database on the storage fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseDescriptor {
    /// Stable database identifier (non-empty ASCII).
    pub id: String,

    /// Human-readable name.
    pub display_name: String,

    /// Embedding dimension; immutable after creation.
    pub dimension: u32,

    /// Number of vectors currently stored; monotone with inserts/deletes.
    pub vector_count: u64,

    /// Creation timestamp in UTC.
    pub created_at: DateTime<Utc>,

    /// Update timestamp in UTC.
    pub updated_at: DateTime<Utc>,
}

impl DatabaseDescriptor {
    /// Constructs a descriptor for a freshly created database.
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, dimension: u32) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            display_name: display_name.into(),
            dimension,
            vector_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Updates the `updated_at` timestamp to the current time.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
