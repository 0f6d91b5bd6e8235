//! The wire surface a storage node exposes to the front door.

use async_trait::async_trait;
use torusdb_core::{DatabaseDescriptor, Result, SearchHit, VectorRecord};

/// Per-shard client for the storage-node wire protocol.
///
/// All calls are asynchronous and may fail with NotFound,
/// DimensionMismatch, Timeout, Unavailable, Protocol, or Internal.
/// Replica variants operate on the tagged copies a shard holds on behalf
/// of another primary, keyed by `source_shard_id`.
#[async_trait]
pub trait ShardApi: Send + Sync {
    /// Upserts a vector as a primary record and acks its id.
    async fn add_vector(&self, record: &VectorRecord) -> Result<i64>;

    /// Fetches a primary record.
    async fn get_vector(&self, database_id: &str, id: i64) -> Result<VectorRecord>;

    /// Deletes a primary record; `false` when it did not exist.
    async fn delete_vector(&self, database_id: &str, id: i64) -> Result<bool>;

    /// Top-K similarity search over the shard's primary records.
    async fn search(&self, database_id: &str, probe: &[f32], k: usize) -> Result<Vec<SearchHit>>;

    /// Creates a database; idempotent when the dimension matches, Conflict
    /// when it differs.
    async fn create_database(&self, database: &DatabaseDescriptor) -> Result<()>;

    /// Drops a database.
    async fn drop_database(&self, database_id: &str) -> Result<()>;

    /// Lists database descriptors known to the shard.
    async fn list_databases(&self) -> Result<Vec<DatabaseDescriptor>>;

    /// Ascending id-ordered page of primaries in `(from_exclusive,
    /// to_inclusive]`, at most `limit` records.
    async fn scan_range(
        &self,
        database_id: &str,
        from_exclusive: i64,
        to_inclusive: i64,
        limit: usize,
    ) -> Result<Vec<VectorRecord>>;

    /// Bulk-upserts primary records.
    async fn put_batch(&self, database_id: &str, records: &[VectorRecord]) -> Result<()>;

    /// Bulk-deletes primary records by id.
    async fn delete_batch(&self, database_id: &str, ids: &[i64]) -> Result<()>;

    /// Stores a replica copy tagged with the shard it is held for.
    async fn add_vector_replica(&self, record: &VectorRecord, source_shard_id: &str)
        -> Result<()>;

    /// Fetches a tagged replica copy.
    async fn get_vector_replica(
        &self,
        database_id: &str,
        id: i64,
        source_shard_id: &str,
    ) -> Result<VectorRecord>;

    /// Deletes a tagged replica copy; `false` when it did not exist.
    async fn delete_vector_replica(
        &self,
        database_id: &str,
        id: i64,
        source_shard_id: &str,
    ) -> Result<bool>;

    /// Top-K search over the replicas held for `source_shard_id`.
    async fn search_replicas(
        &self,
        database_id: &str,
        probe: &[f32],
        k: usize,
        source_shard_id: &str,
    ) -> Result<Vec<SearchHit>>;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<()>;
}
