//! Online data migration when shards are added to the cluster.
//!
//! Triggered by a config change: for every new shard the engine locates
//! the old owner of the new shard's arc, then moves that arc's keys over
//! in batches (put on target, delete on source) and reshuffles the tagged
//! replica copies. Migration is at-least-once: batch failures are logged
//! and retried by a fresh scan on the next apply, and duplicates on the
//! target resolve through the storage engine's upsert semantics.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{watch, Semaphore};
use torusdb_cluster::{belongs_to, ClusterView, HashRing, OwnershipMap};
use torusdb_client::ShardClientPool;
use torusdb_core::{
    metrics, ring_hash, ClusterConfig, DatabaseDescriptor, ReshardingSettings, Result,
    ShardDescriptor, VectorRecord,
};

/// One (source, target) primary migration.
#[derive(Debug, Clone)]
struct MigrationJob {
    source: ShardDescriptor,
    target: ShardDescriptor,
    /// Exclusive start of the moving arc.
    range_start: u64,
    /// Inclusive end of the moving arc.
    range_end: u64,
}

/// Summary of one resharding run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReshardingReport {
    /// Number of (source, target) migration jobs derived.
    pub jobs: usize,

    /// Vectors moved onto new shards.
    pub moved: u64,

    /// Vectors whose migration or replica reshuffle failed and is left
    /// for the next run.
    pub failed: u64,
}

/// Engine migrating primary and replica data onto newly added shards.
pub struct ReshardingEngine {
    view: Arc<ClusterView>,
    pool: Arc<ShardClientPool>,
    settings: ReshardingSettings,
    stop: watch::Receiver<bool>,
}

impl ReshardingEngine {
    /// Creates an engine honoring the given cooperative stop signal,
    /// checked at batch boundaries.
    #[must_use]
    pub fn new(
        view: Arc<ClusterView>,
        pool: Arc<ShardClientPool>,
        settings: ReshardingSettings,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            view,
            pool,
            settings,
            stop,
        }
    }

    fn stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Compares the old and new shard sets and migrates the arcs owned by
    /// added shards. Returns immediately when nothing was added.
    ///
    /// There is no distributed commit: a killed run resumes from a fresh
    /// scan on the next `apply`.
    pub async fn run(&self, old: &ClusterConfig, new: &ClusterConfig) -> Result<ReshardingReport> {
        let added = new.added_since(old);
        if added.is_empty() {
            return Ok(ReshardingReport::default());
        }
        tracing::info!(
            added = added.len(),
            "cluster config added shards; starting resharding"
        );

        let databases = self.enumerate_databases(old).await;

        // Step 1: materialize every known database on the new shards.
        self.materialize_databases(&added, &databases).await;

        // Step 2: derive (source, target) pairs against the old ring.
        let old_ring = write_ring_of(old);
        let new_ring = write_ring_of(new);
        let jobs = derive_jobs(&added, &old_ring, &new_ring);

        // Ownership of the post-change ring governs where replicas move.
        let ownership = self.view.current().ownership.clone();

        // Steps 3 and 4, per job: databases within one pair run serially,
        // distinct pairs in parallel under a bounded pool.
        let semaphore = Arc::new(Semaphore::new(self.settings.max_parallel_jobs.max(1)));
        let runs = jobs.iter().map(|job| {
            let semaphore = semaphore.clone();
            let databases = &databases;
            let ownership = &ownership;
            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return (0u64, 0u64);
                };
                let mut moved = 0u64;
                let mut failed = 0u64;
                for database in databases {
                    if self.stopped() {
                        tracing::info!(
                            source = %job.source.shard_id,
                            target = %job.target.shard_id,
                            "resharding stopped cooperatively"
                        );
                        break;
                    }
                    let (m, f) = self.migrate_database(job, &database.id, ownership).await;
                    moved += m;
                    failed += f;
                }
                (moved, failed)
            }
        });

        let mut report = ReshardingReport {
            jobs: jobs.len(),
            ..ReshardingReport::default()
        };
        for (moved, failed) in join_all(runs).await {
            report.moved += moved;
            report.failed += failed;
        }
        tracing::info!(
            jobs = report.jobs,
            moved = report.moved,
            failed = report.failed,
            "resharding finished"
        );
        Ok(report)
    }

    /// Settlement sweep for a config whose shard set did not change:
    /// every ring shard is treated as a migration target and the other
    /// shards are scanned for keys inside its arc. A clean cluster moves
    /// nothing; a cluster left mid-migration by a killed coordinator gets
    /// its stranded keys moved onto their current owners.
    pub async fn settle(&self, config: &ClusterConfig) -> Result<ReshardingReport> {
        let ring = write_ring_of(config);
        let databases = self.enumerate_databases(config).await;
        let ownership = self.view.current().ownership.clone();

        // A killed run may have died before materializing databases on the
        // shards it was filling; creates are idempotent.
        self.materialize_databases(ring.shards(), &databases).await;

        let mut jobs = Vec::new();
        for target in ring.shards() {
            let Some(prev) = ring.predecessor(&target.shard_id) else {
                continue;
            };
            for source in ring.shards() {
                if source.shard_id == target.shard_id {
                    continue;
                }
                jobs.push(MigrationJob {
                    source: source.clone(),
                    target: target.clone(),
                    range_start: prev.hash_key,
                    range_end: target.hash_key,
                });
            }
        }

        let mut report = ReshardingReport {
            jobs: jobs.len(),
            ..ReshardingReport::default()
        };
        for job in &jobs {
            if self.stopped() {
                break;
            }
            for database in &databases {
                let (moved, failed) = self.migrate_database(job, &database.id, &ownership).await;
                report.moved += moved;
                report.failed += failed;
            }
        }
        if report.moved > 0 {
            tracing::info!(moved = report.moved, "settlement moved stranded vectors");
        }
        Ok(report)
    }

    /// Lists databases from the first old-config shard that answers.
    /// Failures are logged and yield an empty set; the config remains the
    /// source of truth and a later apply retries.
    async fn enumerate_databases(&self, old: &ClusterConfig) -> Vec<DatabaseDescriptor> {
        for shard in old.shards.iter().filter(|s| s.status.is_readable()) {
            let client = self.pool.client_for(shard);
            match client.list_databases().await {
                Ok(databases) => return databases,
                Err(err) => {
                    tracing::warn!(shard = %shard.shard_id, error = %err,
                        "database enumeration failed; trying next shard");
                }
            }
        }
        tracing::warn!("no shard answered database enumeration; nothing to migrate");
        Vec::new()
    }

    async fn materialize_databases(
        &self,
        added: &[ShardDescriptor],
        databases: &[DatabaseDescriptor],
    ) {
        for shard in added {
            let client = self.pool.client_for(shard);
            for database in databases {
                if let Err(err) = client.create_database(database).await {
                    tracing::warn!(shard = %shard.shard_id, database = %database.id,
                        error = %err, "database create on new shard failed");
                }
            }
        }
    }

    /// Moves one database's arc from `job.source` to `job.target`,
    /// scanning the id space in ascending batches.
    async fn migrate_database(
        &self,
        job: &MigrationJob,
        database_id: &str,
        ownership: &OwnershipMap,
    ) -> (u64, u64) {
        let source = self.pool.client_for(&job.source);
        let target = self.pool.client_for(&job.target);
        let mut moved = 0u64;
        let mut failed = 0u64;
        let mut last_id = i64::MIN;

        loop {
            if self.stopped() {
                break;
            }
            let batch = match source
                .scan_range(database_id, last_id, i64::MAX, self.settings.batch_size)
                .await
            {
                Ok(batch) => batch,
                Err(err) => {
                    tracing::error!(
                        source = %job.source.shard_id,
                        target = %job.target.shard_id,
                        database = database_id,
                        error = %err,
                        "scan failed; aborting this migration job"
                    );
                    failed += 1;
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }
            // Advance past everything seen, moved or not, so consecutive
            // scans never report the same id twice.
            last_id = batch.last().map(|r| r.id).unwrap_or(last_id);

            let moving: Vec<VectorRecord> = batch
                .into_iter()
                .filter(|record| belongs_to(ring_hash(record.id), job.range_start, job.range_end))
                .collect();
            if moving.is_empty() {
                continue;
            }

            if let Err(err) = target.put_batch(database_id, &moving).await {
                tracing::warn!(target = %job.target.shard_id, database = database_id,
                    batch = moving.len(), error = %err,
                    "put batch failed; batch will be retried by a later run");
                failed += moving.len() as u64;
                continue;
            }
            let ids: Vec<i64> = moving.iter().map(|r| r.id).collect();
            if let Err(err) = source.delete_batch(database_id, &ids).await {
                tracing::warn!(source = %job.source.shard_id, database = database_id,
                    error = %err,
                    "delete batch failed; source keeps stale copies until the next run");
            }
            moved += moving.len() as u64;
            metrics::RESHARDING_MOVED_VECTORS
                .with_label_values(&[job.target.shard_id.as_str()])
                .inc_by(moving.len() as u64);

            failed += self
                .reshuffle_replicas(job, database_id, &moving, ownership)
                .await;
        }
        (moved, failed)
    }

    /// Moves the replica copies of migrated entries from the old replica
    /// location to the new one, re-tagging them with the new primary.
    async fn reshuffle_replicas(
        &self,
        job: &MigrationJob,
        database_id: &str,
        moved: &[VectorRecord],
        ownership: &OwnershipMap,
    ) -> u64 {
        let Some(old_location) = ownership.replica_location(&job.source.shard_id) else {
            tracing::warn!(shard = %job.source.shard_id,
                "source shard has no replica location; skipping replica reshuffle");
            return 0;
        };
        let Some(new_location) = ownership.replica_location(&job.target.shard_id) else {
            tracing::warn!(shard = %job.target.shard_id,
                "target shard has no replica location; skipping replica reshuffle");
            return 0;
        };
        if old_location.shard_id == new_location.shard_id {
            return 0;
        }

        let old_client = self.pool.client_for(old_location);
        let new_client = self.pool.client_for(new_location);
        let mut failed = 0u64;
        for entry in moved {
            // The old copy is authoritative when present; replication may
            // still be lagging behind the primary we just moved.
            let copy = match old_client
                .get_vector_replica(database_id, entry.id, &job.source.shard_id)
                .await
            {
                Ok(copy) => copy,
                Err(err) if err.is_not_found() => entry.clone(),
                Err(err) => {
                    tracing::warn!(vector = entry.id, shard = %old_location.shard_id,
                        error = %err, "replica fetch failed; using migrated entry");
                    entry.clone()
                }
            };
            if let Err(err) = new_client
                .add_vector_replica(&copy, &job.target.shard_id)
                .await
            {
                tracing::warn!(vector = entry.id, shard = %new_location.shard_id,
                    error = %err, "replica move failed");
                failed += 1;
                continue;
            }
            if let Err(err) = old_client
                .delete_vector_replica(database_id, entry.id, &job.source.shard_id)
                .await
            {
                tracing::warn!(vector = entry.id, shard = %old_location.shard_id,
                    error = %err, "stale replica delete failed");
            }
        }
        failed
    }
}

fn write_ring_of(config: &ClusterConfig) -> HashRing {
    HashRing::build(
        config
            .shards
            .iter()
            .filter(|s| s.status.is_writable())
            .cloned(),
    )
}

/// Derives the (source, target) migration pairs for the added shards.
///
/// For each new shard `t`, the arc `(prev_t.hash_key, t.hash_key]` moves
/// into `t`; its previous owner is found by probing the old ring just past
/// `prev_t`. A `prev_t` at the top of the key space wraps the probe to
/// zero.
fn derive_jobs(
    added: &[ShardDescriptor],
    old_ring: &HashRing,
    new_ring: &HashRing,
) -> Vec<MigrationJob> {
    let mut jobs = Vec::new();
    for target in added {
        let Some(prev) = new_ring.predecessor(&target.shard_id) else {
            tracing::warn!(shard = %target.shard_id,
                "added shard is not on the new write ring; skipping");
            continue;
        };
        let probe = prev.hash_key.wrapping_add(1);
        let source = match old_ring.locate(probe) {
            Ok(source) => source.clone(),
            Err(_) => {
                tracing::info!(shard = %target.shard_id,
                    "old ring is empty; nothing to migrate into the new shard");
                continue;
            }
        };
        if source.shard_id == target.shard_id {
            continue;
        }
        jobs.push(MigrationJob {
            range_start: prev.hash_key,
            range_end: target.hash_key,
            source,
            target: target.clone(),
        });
    }
    jobs
}
