//! Read/write protocol core: add, get, delete, search, and database
//! lifecycle over the shard fleet.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use moka::future::Cache;
use torusdb_cluster::{
    empty_ring_as_unavailable, ClusterSnapshot, ClusterView, HealthMonitor, Router, WriteRoute,
};
use torusdb_client::ShardClientPool;
use torusdb_core::{
    generate_vector_id, metrics, DatabaseDescriptor, Error, Result, SearchHit, Settings,
    ShardDescriptor, VectorRecord,
};

use crate::replication::ReplicationPool;

/// Stateless front-door coordinator. Cheap to clone through an `Arc`; all
/// members are shared.
pub struct Coordinator {
    router: Router,
    pool: Arc<ShardClientPool>,
    health: Arc<HealthMonitor>,
    replication: Arc<ReplicationPool>,
    descriptors: Cache<String, DatabaseDescriptor>,
    search_deadline: Duration,
    probe_interval: Duration,
}

impl Coordinator {
    /// Wires the coordinator over the shared cluster view and client pool.
    #[must_use]
    pub fn new(
        view: Arc<ClusterView>,
        pool: Arc<ShardClientPool>,
        health: Arc<HealthMonitor>,
        settings: &Settings,
    ) -> Arc<Self> {
        Arc::new(Self {
            router: Router::new(view),
            pool,
            health,
            replication: ReplicationPool::new(&settings.replication),
            descriptors: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(30))
                .build(),
            search_deadline: settings.search.rpc_deadline(),
            probe_interval: settings.health.probe_interval(),
        })
    }

    /// The replication pool, exposed so shutdown can drain it.
    #[must_use]
    pub fn replication(&self) -> Arc<ReplicationPool> {
        self.replication.clone()
    }

    /// The health monitor backing availability classification.
    #[must_use]
    pub fn health(&self) -> Arc<HealthMonitor> {
        self.health.clone()
    }

    /// Starts the periodic liveness prober over all configured shards.
    /// The task exits when the coordinator is dropped.
    pub fn spawn_health_prober(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = Arc::downgrade(&self);
        let interval = self.probe_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(coordinator) = this.upgrade() else { break };
                let snapshot = coordinator.router.snapshot();
                let probes = snapshot.config.shards.iter().map(|shard| {
                    let client = coordinator.pool.client_for(shard);
                    let health = coordinator.health.clone();
                    let shard_id = shard.shard_id.clone();
                    async move {
                        match client.ping().await {
                            Ok(()) => health.record_success(&shard_id),
                            Err(_) => health.record_failure(&shard_id),
                        }
                    }
                });
                join_all(probes).await;
            }
        })
    }

    /// Feeds passive health signals from an RPC outcome. Only transport
    /// failures count against a shard; a NotFound or Conflict answer means
    /// the node is alive.
    fn note_outcome<T>(&self, shard_id: &str, result: &Result<T>) {
        match result {
            Err(Error::Unavailable { .. }) | Err(Error::Timeout { .. }) => {
                self.health.record_failure(shard_id);
            }
            _ => self.health.record_success(shard_id),
        }
    }

    fn route(&self, snapshot: &ClusterSnapshot, id: i64) -> Result<WriteRoute> {
        Router::route_for_write(snapshot, id).map_err(empty_ring_as_unavailable)
    }

    /// Read-ring shards beyond the primary and replica, in stable
    /// `shard_id` order, used to recover keys stranded on old primaries
    /// during a resharding gap.
    fn stragglers(
        snapshot: &ClusterSnapshot,
        route: &WriteRoute,
    ) -> Vec<ShardDescriptor> {
        let mut rest: Vec<ShardDescriptor> = snapshot
            .read_ring
            .shards()
            .iter()
            .filter(|s| {
                s.shard_id != route.primary.shard_id && s.shard_id != route.replica.shard_id
            })
            .cloned()
            .collect();
        rest.sort_by(|a, b| a.shard_id.cmp(&b.shard_id));
        rest
    }

    // ------------------------------------------------------------------
    // Add
    // ------------------------------------------------------------------

    /// Writes a vector to its primary and acks once the primary accepts.
    /// The replica copy is written asynchronously; replica failures are
    /// logged as eventual inconsistency and never surfaced to the caller.
    pub async fn add_vector(
        &self,
        database_id: &str,
        id: Option<i64>,
        embedding: Vec<f32>,
        original_data: String,
    ) -> Result<VectorRecord> {
        let id = id.unwrap_or_else(generate_vector_id);
        let snapshot = self.router.snapshot();
        let route = self.route(&snapshot, id)?;

        let record = VectorRecord::new(id, embedding, original_data, database_id);
        let client = self.pool.client_for(&route.primary);
        let acked = client.add_vector(&record).await;
        self.note_outcome(&route.primary.shard_id, &acked);
        let outcome = if acked.is_ok() { "ok" } else { "error" };
        metrics::ROUTED_OPERATIONS
            .with_label_values(&["add", outcome])
            .inc();
        acked?;

        if route.has_distinct_replica() {
            let replica_client = self.pool.client_for(&route.replica);
            let source = route.primary.shard_id.clone();
            let replica_id = route.replica.shard_id.clone();
            let copy = record.clone();
            self.replication
                .submit("replicate-add", async move {
                    match replica_client.add_vector_replica(&copy, &source).await {
                        Ok(()) => {
                            metrics::REPLICATION_TASKS
                                .with_label_values(&["replicate-add", "ok"])
                                .inc();
                        }
                        Err(err) => {
                            metrics::REPLICATION_TASKS
                                .with_label_values(&["replicate-add", "error"])
                                .inc();
                            tracing::warn!(
                                vector = copy.id,
                                replica = %replica_id,
                                error = %err,
                                "replica write failed; replica is now behind its primary"
                            );
                        }
                    }
                })
                .await;
        }
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Get
    // ------------------------------------------------------------------

    /// Reads a vector, walking primary, replica, then the remaining read
    /// shards in stable order. A hit on a non-primary schedules a
    /// read-repair onto the expected primary.
    pub async fn get_vector(&self, database_id: &str, id: i64) -> Result<VectorRecord> {
        let snapshot = self.router.snapshot();
        let route = self.route(&snapshot, id)?;

        let primary_client = self.pool.client_for(&route.primary);
        let found = primary_client.get_vector(database_id, id).await;
        self.note_outcome(&route.primary.shard_id, &found);
        match found {
            Ok(record) => {
                metrics::ROUTED_OPERATIONS
                    .with_label_values(&["get", "ok"])
                    .inc();
                return Ok(record);
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                tracing::warn!(vector = id, shard = %route.primary.shard_id, error = %err,
                    "primary read failed; walking replicas");
            }
        }

        if route.has_distinct_replica() {
            let replica_client = self.pool.client_for(&route.replica);
            let found = replica_client
                .get_vector_replica(database_id, id, &route.primary.shard_id)
                .await;
            self.note_outcome(&route.replica.shard_id, &found);
            match found {
                Ok(record) => {
                    self.schedule_read_repair(&route.primary, &route.replica.shard_id, &record)
                        .await;
                    metrics::ROUTED_OPERATIONS
                        .with_label_values(&["get", "ok"])
                        .inc();
                    return Ok(record);
                }
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    tracing::warn!(vector = id, shard = %route.replica.shard_id, error = %err,
                        "replica read failed; walking remaining shards");
                }
            }
        }

        for shard in Self::stragglers(&snapshot, &route) {
            let client = self.pool.client_for(&shard);
            let found = client.get_vector(database_id, id).await;
            self.note_outcome(&shard.shard_id, &found);
            match found {
                Ok(record) => {
                    self.schedule_read_repair(&route.primary, &shard.shard_id, &record)
                        .await;
                    metrics::ROUTED_OPERATIONS
                        .with_label_values(&["get", "ok"])
                        .inc();
                    return Ok(record);
                }
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    tracing::warn!(vector = id, shard = %shard.shard_id, error = %err,
                        "candidate read failed; continuing walk");
                }
            }
        }

        metrics::ROUTED_OPERATIONS
            .with_label_values(&["get", "miss"])
            .inc();
        Err(Error::not_found("vector", id))
    }

    /// Reconciles a record read from a non-primary back onto its expected
    /// primary, tagged with the shard it was read from.
    async fn schedule_read_repair(
        &self,
        expected_primary: &ShardDescriptor,
        read_from: &str,
        record: &VectorRecord,
    ) {
        let client = self.pool.client_for(expected_primary);
        let primary_id = expected_primary.shard_id.clone();
        let source = read_from.to_string();
        let copy = record.clone();
        self.replication
            .submit("read-repair", async move {
                match client.add_vector_replica(&copy, &source).await {
                    Ok(()) => {
                        metrics::REPLICATION_TASKS
                            .with_label_values(&["read-repair", "ok"])
                            .inc();
                    }
                    Err(err) => {
                        metrics::REPLICATION_TASKS
                            .with_label_values(&["read-repair", "error"])
                            .inc();
                        tracing::warn!(vector = copy.id, primary = %primary_id, error = %err,
                            "read repair failed");
                    }
                }
            })
            .await;
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Best-effort delete over the same candidate walk as `get_vector`.
    /// The first successful delete is reported; a primary delete also
    /// enqueues the replica delete.
    pub async fn delete_vector(&self, database_id: &str, id: i64) -> Result<bool> {
        let snapshot = self.router.snapshot();
        let route = self.route(&snapshot, id)?;

        let primary_client = self.pool.client_for(&route.primary);
        let deleted = primary_client.delete_vector(database_id, id).await;
        self.note_outcome(&route.primary.shard_id, &deleted);
        match deleted {
            Ok(true) => {
                if route.has_distinct_replica() {
                    let replica_client = self.pool.client_for(&route.replica);
                    let source = route.primary.shard_id.clone();
                    let replica_id = route.replica.shard_id.clone();
                    let database_id = database_id.to_string();
                    self.replication
                        .submit("replicate-delete", async move {
                            if let Err(err) = replica_client
                                .delete_vector_replica(&database_id, id, &source)
                                .await
                            {
                                metrics::REPLICATION_TASKS
                                    .with_label_values(&["replicate-delete", "error"])
                                    .inc();
                                tracing::warn!(vector = id, replica = %replica_id, error = %err,
                                    "replica delete failed; orphan copy remains until repaired");
                            } else {
                                metrics::REPLICATION_TASKS
                                    .with_label_values(&["replicate-delete", "ok"])
                                    .inc();
                            }
                        })
                        .await;
                }
                metrics::ROUTED_OPERATIONS
                    .with_label_values(&["delete", "ok"])
                    .inc();
                return Ok(true);
            }
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(vector = id, shard = %route.primary.shard_id, error = %err,
                    "primary delete failed; walking replicas");
            }
        }

        if route.has_distinct_replica() {
            let replica_client = self.pool.client_for(&route.replica);
            let deleted = replica_client
                .delete_vector_replica(database_id, id, &route.primary.shard_id)
                .await;
            self.note_outcome(&route.replica.shard_id, &deleted);
            match deleted {
                Ok(true) => {
                    metrics::ROUTED_OPERATIONS
                        .with_label_values(&["delete", "ok"])
                        .inc();
                    return Ok(true);
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(vector = id, shard = %route.replica.shard_id, error = %err,
                        "replica delete failed; walking remaining shards");
                }
            }
        }

        for shard in Self::stragglers(&snapshot, &route) {
            let client = self.pool.client_for(&shard);
            let deleted = client.delete_vector(database_id, id).await;
            self.note_outcome(&shard.shard_id, &deleted);
            match deleted {
                Ok(true) => {
                    metrics::ROUTED_OPERATIONS
                        .with_label_values(&["delete", "ok"])
                        .inc();
                    return Ok(true);
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(vector = id, shard = %shard.shard_id, error = %err,
                        "candidate delete failed; continuing walk");
                }
            }
        }

        metrics::ROUTED_OPERATIONS
            .with_label_values(&["delete", "miss"])
            .inc();
        Ok(false)
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    /// Fans a top-K query out to every available read shard, covers
    /// unavailable shards through their replica locations, and merges the
    /// responses into the global top-K.
    pub async fn search(
        &self,
        database_id: &str,
        probe: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        let descriptor = self.database_descriptor(database_id).await?;
        if probe.len() != descriptor.dimension as usize {
            return Err(Error::dimension_mismatch(
                descriptor.dimension as usize,
                probe.len(),
            ));
        }

        let snapshot = self.router.snapshot();
        let read_shards = snapshot.read_ring.shards();
        if read_shards.is_empty() {
            return Err(Error::unavailable("cluster has no serving shards"));
        }

        let (available, unavailable) = self.health.partition(read_shards);

        let mut calls = Vec::new();
        for shard in &available {
            let client = self.pool.client_for(shard);
            calls.push((
                shard.shard_id.clone(),
                None::<String>,
                client,
                database_id.to_string(),
                probe.to_vec(),
            ));
        }
        for down in &unavailable {
            let Some(replica) = snapshot.ownership.replica_location(&down.shard_id) else {
                tracing::warn!(shard = %down.shard_id,
                    "unavailable shard has no replica location; skipping its arc");
                continue;
            };
            if !self.health.is_available(&replica.shard_id) {
                tracing::warn!(shard = %down.shard_id, replica = %replica.shard_id,
                    "shard and its replica are both unavailable; skipping its arc");
                continue;
            }
            let client = self.pool.client_for(replica);
            calls.push((
                replica.shard_id.clone(),
                Some(down.shard_id.clone()),
                client,
                database_id.to_string(),
                probe.to_vec(),
            ));
        }

        let deadline = self.search_deadline;
        let in_flight = calls
            .into_iter()
            .map(|(shard_id, source, client, database_id, probe)| async move {
                let call = async {
                    match &source {
                        None => client.search(&database_id, &probe, k).await,
                        Some(source) => {
                            client.search_replicas(&database_id, &probe, k, source).await
                        }
                    }
                };
                let outcome = match tokio::time::timeout(deadline, call).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::timeout(format!("search on shard {shard_id}"))),
                };
                (shard_id, source, outcome)
            });

        let mut hits: Vec<SearchHit> = Vec::new();
        for (shard_id, source, outcome) in join_all(in_flight).await {
            self.note_outcome(&shard_id, &outcome);
            match outcome {
                Ok(batch) => hits.extend(batch),
                Err(err) => {
                    tracing::warn!(shard = %shard_id, replica_for = ?source, error = %err,
                        "search fan-out leg failed; merging partial results");
                }
            }
        }

        metrics::ROUTED_OPERATIONS
            .with_label_values(&["search", "ok"])
            .inc();
        Ok(Self::merge_top_k(hits, k))
    }

    /// Deduplicates by vector id keeping the smallest distance, then
    /// orders ascending by (distance, id) and keeps the first k.
    fn merge_top_k(hits: Vec<SearchHit>, k: usize) -> Vec<SearchHit> {
        let mut best: std::collections::HashMap<i64, SearchHit> = std::collections::HashMap::new();
        for hit in hits {
            match best.get(&hit.vector.id) {
                Some(existing) if existing.distance <= hit.distance => {}
                _ => {
                    best.insert(hit.vector.id, hit);
                }
            }
        }
        let mut merged: Vec<SearchHit> = best.into_values().collect();
        merged.sort_by(|a, b| {
            a.merge_key()
                .partial_cmp(&b.merge_key())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        merged.truncate(k);
        merged
    }

    // ------------------------------------------------------------------
    // Database lifecycle
    // ------------------------------------------------------------------

    /// Fans the create out to every writable shard; succeeds when at least
    /// one accepts. The dimension is immutable once stored anywhere, so a
    /// Conflict from any shard wins over partial success.
    pub async fn create_database(
        &self,
        id: &str,
        display_name: &str,
        dimension: u32,
    ) -> Result<DatabaseDescriptor> {
        if id.is_empty() || !id.is_ascii() {
            return Err(Error::invalid_config(
                "database id must be non-empty ASCII",
            ));
        }
        if dimension == 0 {
            return Err(Error::invalid_config("database dimension must be positive"));
        }

        let snapshot = self.router.snapshot();
        let writable = snapshot.write_ring.shards();
        if writable.is_empty() {
            return Err(Error::unavailable("cluster has no writable shards"));
        }

        let descriptor = DatabaseDescriptor::new(id, display_name, dimension);
        let creates = writable.iter().map(|shard| {
            let client = self.pool.client_for(shard);
            let descriptor = descriptor.clone();
            let shard_id = shard.shard_id.clone();
            async move { (shard_id, client.create_database(&descriptor).await) }
        });

        let mut accepted = 0usize;
        let mut conflict: Option<Error> = None;
        let mut last_err: Option<Error> = None;
        for (shard_id, outcome) in join_all(creates).await {
            self.note_outcome(&shard_id, &outcome);
            match outcome {
                Ok(()) => accepted += 1,
                Err(err @ Error::Conflict { .. }) => conflict = Some(err),
                Err(err) => {
                    tracing::warn!(database = id, shard = %shard_id, error = %err,
                        "database create failed on shard");
                    last_err = Some(err);
                }
            }
        }

        if let Some(err) = conflict {
            return Err(err);
        }
        if accepted == 0 {
            return Err(last_err
                .unwrap_or_else(|| Error::unavailable("no shard accepted the database create")));
        }
        self.descriptors
            .insert(id.to_string(), descriptor.clone())
            .await;
        Ok(descriptor)
    }

    /// Fans the drop out to every writable shard. NotFound from a shard is
    /// idempotent success.
    pub async fn drop_database(&self, id: &str) -> Result<()> {
        let snapshot = self.router.snapshot();
        let writable = snapshot.write_ring.shards();
        if writable.is_empty() {
            return Err(Error::unavailable("cluster has no writable shards"));
        }

        let drops = writable.iter().map(|shard| {
            let client = self.pool.client_for(shard);
            let id = id.to_string();
            let shard_id = shard.shard_id.clone();
            async move { (shard_id, client.drop_database(&id).await) }
        });

        let mut accepted = 0usize;
        let mut last_err: Option<Error> = None;
        for (shard_id, outcome) in join_all(drops).await {
            self.note_outcome(&shard_id, &outcome);
            match outcome {
                Ok(()) => accepted += 1,
                Err(err) if err.is_not_found() => accepted += 1,
                Err(err) => {
                    tracing::warn!(database = id, shard = %shard_id, error = %err,
                        "database drop failed on shard");
                    last_err = Some(err);
                }
            }
        }

        self.descriptors.invalidate(id).await;
        if accepted == 0 {
            return Err(
                last_err.unwrap_or_else(|| Error::unavailable("no shard accepted the drop"))
            );
        }
        Ok(())
    }

    /// Lists database descriptors from the first read shard that answers.
    pub async fn list_databases(&self) -> Result<Vec<DatabaseDescriptor>> {
        let snapshot = self.router.snapshot();
        let read_shards = snapshot.read_ring.shards();
        if read_shards.is_empty() {
            return Err(Error::unavailable("cluster has no serving shards"));
        }
        let mut last_err: Option<Error> = None;
        for shard in read_shards {
            let client = self.pool.client_for(shard);
            let listed = client.list_databases().await;
            self.note_outcome(&shard.shard_id, &listed);
            match listed {
                Ok(databases) => return Ok(databases),
                Err(err) => {
                    tracing::warn!(shard = %shard.shard_id, error = %err,
                        "database listing failed; trying next shard");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::unavailable("no shard answered the listing")))
    }

    /// Descriptor for one database, served from cache when warm. The
    /// cache is primed on create so the dimension fast-fail path does not
    /// cost an RPC.
    pub async fn database_descriptor(&self, id: &str) -> Result<DatabaseDescriptor> {
        if let Some(descriptor) = self.descriptors.get(id).await {
            return Ok(descriptor);
        }
        let descriptor = self
            .list_databases()
            .await?
            .into_iter()
            .find(|db| db.id == id)
            .ok_or_else(|| Error::not_found("database", id))?;
        self.descriptors
            .insert(id.to_string(), descriptor.clone())
            .await;
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: i64, distance: f64) -> SearchHit {
        SearchHit {
            distance,
            similarity: 1.0 / (1.0 + distance),
            vector: VectorRecord::new(id, vec![0.0], "", "db1"),
        }
    }

    #[test]
    fn merge_keeps_smallest_distance_per_id() {
        let merged = Coordinator::merge_top_k(vec![hit(1, 0.9), hit(1, 0.2), hit(2, 0.5)], 10);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].vector.id, 1);
        assert_eq!(merged[0].distance, 0.2);
        assert_eq!(merged[1].vector.id, 2);
    }

    #[test]
    fn merge_orders_by_distance_then_id() {
        let merged = Coordinator::merge_top_k(vec![hit(9, 0.5), hit(3, 0.5), hit(5, 0.1)], 10);
        let ids: Vec<i64> = merged.iter().map(|h| h.vector.id).collect();
        assert_eq!(ids, vec![5, 3, 9]);
    }

    #[test]
    fn merge_truncates_to_k() {
        let hits = (0..20).map(|i| hit(i, i as f64)).collect();
        let merged = Coordinator::merge_top_k(hits, 5);
        assert_eq!(merged.len(), 5);
        assert_eq!(merged.last().unwrap().vector.id, 4);
    }
}
