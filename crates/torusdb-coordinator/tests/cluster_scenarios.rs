//! End-to-end coordinator scenarios over in-memory shards and an
//! in-memory config record.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use torusdb_cluster::{belongs_to, ClusterView, ConfigBackend, HealthMonitor, MemoryConfigBackend};
use torusdb_client::{InMemoryShard, ShardApi, ShardClientPool};
use torusdb_coordinator::{ControlPlane, Coordinator, ReshardingEngine, ReshardingReport};
use torusdb_core::{
    ring_hash, ClusterConfig, Error, Settings, ShardDescriptor, ShardStatus, MIN_VECTOR_ID,
};

/// One coordinator process over a shared config record and shard fleet.
struct Cluster {
    backend: Arc<MemoryConfigBackend>,
    shards: HashMap<String, Arc<InMemoryShard>>,
    view: Arc<ClusterView>,
    health: Arc<HealthMonitor>,
    coordinator: Arc<Coordinator>,
    control: Arc<ControlPlane>,
    _stop: watch::Sender<bool>,
}

impl Cluster {
    async fn start(shard_ids: &[&str]) -> Self {
        let shards: HashMap<String, Arc<InMemoryShard>> = shard_ids
            .iter()
            .map(|id| (id.to_string(), InMemoryShard::new(*id)))
            .collect();
        Self::start_with(MemoryConfigBackend::new(), shards).await
    }

    /// Starts a coordinator over pre-existing state; models a restart when
    /// given the backend and shards of a previous instance.
    async fn start_with(
        backend: Arc<MemoryConfigBackend>,
        shards: HashMap<String, Arc<InMemoryShard>>,
    ) -> Self {
        let view = ClusterView::bootstrap(backend.clone()).await.unwrap();
        let pool = {
            let shards = shards.clone();
            Arc::new(ShardClientPool::with_factory(move |descriptor| {
                let shard: Arc<dyn ShardApi> = shards
                    .get(&descriptor.shard_id)
                    .expect("test fleet is missing a configured shard")
                    .clone();
                shard
            }))
        };
        let settings = Settings::default();
        let health = Arc::new(HealthMonitor::new(&settings.health));
        let coordinator = Coordinator::new(view.clone(), pool.clone(), health.clone(), &settings);
        let (stop_tx, stop_rx) = watch::channel(false);
        let engine = Arc::new(ReshardingEngine::new(
            view.clone(),
            pool,
            settings.resharding.clone(),
            stop_rx,
        ));
        let control = Arc::new(ControlPlane::new(view.clone(), engine));
        Self {
            backend,
            shards,
            view,
            health,
            coordinator,
            control,
            _stop: stop_tx,
        }
    }

    fn shard(&self, id: &str) -> &Arc<InMemoryShard> {
        &self.shards[id]
    }

    async fn apply(&self, entries: &[(&str, u64, ShardStatus)]) -> ReshardingReport {
        self.control.apply(config(entries)).await.unwrap()
    }

    /// Waits for all in-flight replication and read-repair work.
    async fn quiesce(&self) {
        self.coordinator.replication().quiesce().await;
    }
}

fn config(entries: &[(&str, u64, ShardStatus)]) -> ClusterConfig {
    ClusterConfig {
        shards: entries
            .iter()
            .map(|(id, key, status)| {
                ShardDescriptor::new(*id, format!("http://{id}:7700"), *key, *status)
            })
            .collect(),
        metadata: Default::default(),
    }
}

const SHARD2_KEY: u64 = 4_611_686_018_427_387_903;

/// S1: two shards, add and read.
#[tokio::test]
async fn add_and_read_with_two_shards() {
    let cluster = Cluster::start(&["shard1", "shard2"]).await;
    cluster
        .apply(&[
            ("shard1", 0, ShardStatus::Active),
            ("shard2", SHARD2_KEY, ShardStatus::Active),
        ])
        .await;
    cluster
        .coordinator
        .create_database("db1", "db1", 3)
        .await
        .unwrap();

    let written = cluster
        .coordinator
        .add_vector("db1", Some(100), vec![0.1, 0.2, 0.3], "a".to_string())
        .await
        .unwrap();
    cluster.quiesce().await;

    let read = cluster.coordinator.get_vector("db1", 100).await.unwrap();
    assert_eq!(read, written);

    // hash(100) lands below shard2's key, so shard2 is the primary and
    // shard1 holds the replica tagged with shard2's id.
    assert!(ring_hash(100) <= SHARD2_KEY);
    assert_eq!(cluster.shard("shard2").primary_count("db1"), 1);
    assert_eq!(cluster.shard("shard1").primary_count("db1"), 0);
    assert!(cluster.shard("shard1").has_replica("db1", 100, "shard2"));
}

/// S2: three-shard read with the owning primary down.
#[tokio::test]
async fn get_survives_a_down_primary() {
    let cluster = Cluster::start(&["s1", "s2", "s3"]).await;
    let third = u64::MAX / 3;
    cluster
        .apply(&[
            ("s1", third, ShardStatus::Active),
            ("s2", third * 2, ShardStatus::Active),
            ("s3", u64::MAX, ShardStatus::Active),
        ])
        .await;
    cluster
        .coordinator
        .create_database("db1", "db1", 2)
        .await
        .unwrap();
    for id in 1..=20 {
        cluster
            .coordinator
            .add_vector("db1", Some(id), vec![id as f32, 0.0], String::new())
            .await
            .unwrap();
    }
    cluster.quiesce().await;

    // Stop the primary of vector 7 and read through the replica.
    let probe_id = 7;
    let snapshot = cluster.view.current();
    let primary = snapshot.write_ring.locate(ring_hash(probe_id)).unwrap().clone();
    cluster.shard(&primary.shard_id).set_down(true);

    let record = cluster
        .coordinator
        .get_vector("db1", probe_id)
        .await
        .unwrap();
    assert_eq!(record.id, probe_id);
    cluster.quiesce().await;

    // Restore the primary; the read now comes straight from it.
    cluster.shard(&primary.shard_id).set_down(false);
    let record = cluster
        .coordinator
        .get_vector("db1", probe_id)
        .await
        .unwrap();
    assert_eq!(record.id, probe_id);
}

/// A record found on a non-primary schedules a read-repair tagged with the
/// shard it was read from.
#[tokio::test]
async fn non_primary_hit_triggers_read_repair() {
    let cluster = Cluster::start(&["shard1", "shard2"]).await;
    cluster
        .apply(&[
            ("shard1", 0, ShardStatus::Active),
            ("shard2", SHARD2_KEY, ShardStatus::Active),
        ])
        .await;
    cluster
        .coordinator
        .create_database("db1", "db1", 1)
        .await
        .unwrap();
    cluster
        .coordinator
        .add_vector("db1", Some(100), vec![1.0], String::new())
        .await
        .unwrap();
    cluster.quiesce().await;

    // Drop the primary copy, leaving only the replica on shard1.
    assert!(cluster
        .shard("shard2")
        .delete_vector("db1", 100)
        .await
        .unwrap());

    let record = cluster.coordinator.get_vector("db1", 100).await.unwrap();
    assert_eq!(record.id, 100);
    cluster.quiesce().await;

    // The repair landed on the expected primary, tagged with the shard
    // the record was read from.
    assert!(cluster.shard("shard2").has_replica("db1", 100, "shard1"));
}

/// S3: top-k merge across three shards equals the global top-k.
#[tokio::test]
async fn search_merges_global_top_k() {
    let cluster = Cluster::start(&["s1", "s2", "s3"]).await;
    let third = u64::MAX / 3;
    cluster
        .apply(&[
            ("s1", third, ShardStatus::Active),
            ("s2", third * 2, ShardStatus::Active),
            ("s3", u64::MAX, ShardStatus::Active),
        ])
        .await;
    cluster
        .coordinator
        .create_database("db1", "db1", 1)
        .await
        .unwrap();
    for id in 1..=15 {
        cluster
            .coordinator
            .add_vector("db1", Some(id), vec![id as f32], String::new())
            .await
            .unwrap();
    }
    cluster.quiesce().await;

    let hits = cluster.coordinator.search("db1", &[0.0], 5).await.unwrap();
    let ids: Vec<i64> = hits.iter().map(|h| h.vector.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
}

/// Search covers an unavailable shard through its replica location.
#[tokio::test]
async fn search_reads_replicas_of_unavailable_shards() {
    let cluster = Cluster::start(&["s1", "s2", "s3"]).await;
    let third = u64::MAX / 3;
    cluster
        .apply(&[
            ("s1", third, ShardStatus::Active),
            ("s2", third * 2, ShardStatus::Active),
            ("s3", u64::MAX, ShardStatus::Active),
        ])
        .await;
    cluster
        .coordinator
        .create_database("db1", "db1", 1)
        .await
        .unwrap();
    for id in 1..=15 {
        cluster
            .coordinator
            .add_vector("db1", Some(id), vec![id as f32], String::new())
            .await
            .unwrap();
    }
    cluster.quiesce().await;

    // Classify s2 unavailable and stop it; its arc is served by the
    // replicas its ring successor holds.
    cluster.shard("s2").set_down(true);
    for _ in 0..3 {
        cluster.health.record_failure("s2");
    }

    let hits = cluster.coordinator.search("db1", &[0.0], 15).await.unwrap();
    let ids: Vec<i64> = hits.iter().map(|h| h.vector.id).collect();
    assert_eq!(ids, (1..=15).collect::<Vec<i64>>());
}

/// S4: adding a shard migrates its arc and reshuffles replicas.
#[tokio::test]
async fn adding_a_shard_migrates_its_arc() {
    let cluster = Cluster::start(&["s1", "s2", "s3"]).await;
    cluster
        .apply(&[
            ("s1", 0, ShardStatus::Active),
            ("s2", SHARD2_KEY, ShardStatus::Active),
        ])
        .await;
    cluster
        .coordinator
        .create_database("db1", "db1", 1)
        .await
        .unwrap();
    let ids: Vec<i64> = (1..=40).collect();
    for &id in &ids {
        cluster
            .coordinator
            .add_vector("db1", Some(id), vec![id as f32], format!("v{id}"))
            .await
            .unwrap();
    }
    cluster.quiesce().await;

    let before: HashMap<i64, _> = {
        let mut map = HashMap::new();
        for &id in &ids {
            map.insert(id, cluster.coordinator.get_vector("db1", id).await.unwrap());
        }
        map
    };

    // Slot s3 between the existing keys; its arc is (0, s3_key].
    let s3_key = SHARD2_KEY / 2;
    let report = cluster
        .apply(&[
            ("s1", 0, ShardStatus::Active),
            ("s3", s3_key, ShardStatus::Active),
            ("s2", SHARD2_KEY, ShardStatus::Active),
        ])
        .await;
    assert_eq!(report.jobs, 1);
    assert!(report.moved > 0);

    let moved: Vec<i64> = ids
        .iter()
        .copied()
        .filter(|&id| belongs_to(ring_hash(id), 0, s3_key))
        .collect();
    assert!(!moved.is_empty(), "the chosen key must split real traffic");

    for &id in &ids {
        // (a) every vector remains reachable and unchanged.
        let record = cluster.coordinator.get_vector("db1", id).await.unwrap();
        assert_eq!(record, before[&id]);
    }
    for &id in &moved {
        // (b) the new shard hosts its arc; (c) the source gave it up.
        assert!(cluster.shard("s3").primary_ids("db1").contains(&id));
        assert!(!cluster.shard("s2").primary_ids("db1").contains(&id));
        // (d) the replica follows the new primary: replica_location(s3) = s2.
        assert!(cluster.shard("s2").has_replica("db1", id, "s3"));
        assert!(!cluster.shard("s1").has_replica("db1", id, "s2"));
    }
}

/// S5: dimension mismatch fails fast without touching any shard.
#[tokio::test]
async fn dimension_mismatch_fails_before_any_rpc() {
    let cluster = Cluster::start(&["s1", "s2"]).await;
    cluster
        .apply(&[
            ("s1", 0, ShardStatus::Active),
            ("s2", SHARD2_KEY, ShardStatus::Active),
        ])
        .await;
    cluster
        .coordinator
        .create_database("db2", "db2", 4)
        .await
        .unwrap();

    // With every shard down, only a fast-failing path can produce
    // DimensionMismatch rather than Unavailable.
    cluster.shard("s1").set_down(true);
    cluster.shard("s2").set_down(true);

    let err = cluster
        .coordinator
        .search("db2", &[0.1, 0.2, 0.3], 5)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::DimensionMismatch {
            expected: 4,
            actual: 3
        }
    ));
}

/// S6: config survives a coordinator crash; re-applying it finishes the
/// interrupted migration.
#[tokio::test]
async fn crashed_migration_resumes_on_reapply() {
    let cluster = Cluster::start(&["s1", "s2", "s3"]).await;
    cluster
        .apply(&[
            ("s1", 0, ShardStatus::Active),
            ("s2", SHARD2_KEY, ShardStatus::Active),
        ])
        .await;
    cluster
        .coordinator
        .create_database("db1", "db1", 1)
        .await
        .unwrap();
    let ids: Vec<i64> = (1..=40).collect();
    for &id in &ids {
        cluster
            .coordinator
            .add_vector("db1", Some(id), vec![id as f32], String::new())
            .await
            .unwrap();
    }
    cluster.quiesce().await;

    // The coordinator persists the grown config and dies before moving a
    // single vector.
    let s3_key = SHARD2_KEY / 2;
    let submitted = config(&[
        ("s1", 0, ShardStatus::Active),
        ("s3", s3_key, ShardStatus::Active),
        ("s2", SHARD2_KEY, ShardStatus::Active),
    ]);
    cluster
        .backend
        .store(submitted.to_json_bytes().unwrap())
        .await
        .unwrap();

    // Restart over the same durable record and fleet.
    let restarted = Cluster::start_with(cluster.backend.clone(), cluster.shards.clone()).await;
    assert_eq!(restarted.view.current().config, submitted);

    // apply(current()) finishes migrating whatever is still misplaced.
    let report = restarted.control.apply(submitted.clone()).await.unwrap();
    assert!(report.moved > 0);

    let moved: Vec<i64> = ids
        .iter()
        .copied()
        .filter(|&id| belongs_to(ring_hash(id), 0, s3_key))
        .collect();
    for &id in &moved {
        assert!(restarted.shard("s3").primary_ids("db1").contains(&id));
        assert!(!restarted.shard("s2").primary_ids("db1").contains(&id));
        assert!(restarted.shard("s2").has_replica("db1", id, "s3"));
    }
    for &id in &ids {
        assert!(restarted.coordinator.get_vector("db1", id).await.is_ok());
    }

    // A further apply of the same settled config moves nothing.
    let report = restarted.control.apply(submitted).await.unwrap();
    assert_eq!(report.moved, 0);
}

/// Empty cluster: every operation fails Unavailable without an RPC.
#[tokio::test]
async fn empty_cluster_is_unavailable() {
    let cluster = Cluster::start(&[]).await;

    let err = cluster
        .coordinator
        .add_vector("db1", Some(1), vec![1.0], String::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unavailable { .. }));

    let err = cluster.coordinator.get_vector("db1", 1).await.unwrap_err();
    assert!(matches!(err, Error::Unavailable { .. }));

    let err = cluster.coordinator.search("db1", &[1.0], 5).await.unwrap_err();
    assert!(matches!(err, Error::Unavailable { .. }));

    let err = cluster
        .coordinator
        .create_database("db1", "db1", 2)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unavailable { .. }));
}

/// A single-shard cluster performs no replica I/O.
#[tokio::test]
async fn single_shard_cluster_skips_replica_io() {
    let cluster = Cluster::start(&["only"]).await;
    cluster.apply(&[("only", 1000, ShardStatus::Active)]).await;
    cluster
        .coordinator
        .create_database("db1", "db1", 1)
        .await
        .unwrap();

    cluster
        .coordinator
        .add_vector("db1", Some(5), vec![1.0], String::new())
        .await
        .unwrap();
    cluster.quiesce().await;

    assert_eq!(cluster.shard("only").primary_count("db1"), 1);
    assert!(!cluster.shard("only").has_replica("db1", 5, "only"));

    assert!(cluster.coordinator.delete_vector("db1", 5).await.unwrap());
    cluster.quiesce().await;
    assert_eq!(cluster.shard("only").primary_count("db1"), 0);
}

/// Primary failure on the write path is surfaced, never auto-promoted.
#[tokio::test]
async fn add_fails_when_the_primary_is_down() {
    let cluster = Cluster::start(&["shard1", "shard2"]).await;
    cluster
        .apply(&[
            ("shard1", 0, ShardStatus::Active),
            ("shard2", SHARD2_KEY, ShardStatus::Active),
        ])
        .await;
    cluster
        .coordinator
        .create_database("db1", "db1", 1)
        .await
        .unwrap();

    // hash(100) makes shard2 the primary.
    cluster.shard("shard2").set_down(true);
    let err = cluster
        .coordinator
        .add_vector("db1", Some(100), vec![1.0], String::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unavailable { .. }));
    assert_eq!(cluster.shard("shard1").primary_count("db1"), 0);
}

/// Delete then get reports NotFound; a second delete stays false.
#[tokio::test]
async fn delete_is_idempotent() {
    let cluster = Cluster::start(&["shard1", "shard2"]).await;
    cluster
        .apply(&[
            ("shard1", 0, ShardStatus::Active),
            ("shard2", SHARD2_KEY, ShardStatus::Active),
        ])
        .await;
    cluster
        .coordinator
        .create_database("db1", "db1", 1)
        .await
        .unwrap();
    cluster
        .coordinator
        .add_vector("db1", Some(100), vec![1.0], String::new())
        .await
        .unwrap();
    cluster.quiesce().await;

    assert!(cluster.coordinator.delete_vector("db1", 100).await.unwrap());
    cluster.quiesce().await;

    let err = cluster.coordinator.get_vector("db1", 100).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(!cluster.coordinator.delete_vector("db1", 100).await.unwrap());
}

/// Database creates are idempotent and dimension conflicts surface.
#[tokio::test]
async fn database_lifecycle_is_idempotent() {
    let cluster = Cluster::start(&["shard1", "shard2"]).await;
    cluster
        .apply(&[
            ("shard1", 0, ShardStatus::Active),
            ("shard2", SHARD2_KEY, ShardStatus::Active),
        ])
        .await;

    cluster
        .coordinator
        .create_database("db1", "first", 3)
        .await
        .unwrap();
    cluster
        .coordinator
        .create_database("db1", "first", 3)
        .await
        .unwrap();
    let err = cluster
        .coordinator
        .create_database("db1", "first", 4)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict { .. }));

    let listed = cluster.coordinator.list_databases().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].dimension, 3);

    cluster.coordinator.drop_database("db1").await.unwrap();
    cluster.coordinator.drop_database("db1").await.unwrap();
    assert!(cluster.coordinator.list_databases().await.unwrap().is_empty());
}

/// Generated ids are positive and inside the configured draw range.
#[tokio::test]
async fn generated_ids_spread_over_the_ring() {
    let cluster = Cluster::start(&["shard1", "shard2"]).await;
    cluster
        .apply(&[
            ("shard1", 0, ShardStatus::Active),
            ("shard2", SHARD2_KEY, ShardStatus::Active),
        ])
        .await;
    cluster
        .coordinator
        .create_database("db1", "db1", 1)
        .await
        .unwrap();

    for _ in 0..20 {
        let record = cluster
            .coordinator
            .add_vector("db1", None, vec![1.0], String::new())
            .await
            .unwrap();
        assert!(record.id >= MIN_VECTOR_ID);
    }
    cluster.quiesce().await;

    let total = cluster.shard("shard1").primary_count("db1")
        + cluster.shard("shard2").primary_count("db1");
    assert_eq!(total, 20);
}
