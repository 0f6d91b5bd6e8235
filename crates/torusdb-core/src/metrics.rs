//! Central metrics registry for the coordination layer.
//!
//! Metrics are registered lazily on first access using once_cell::Lazy.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_vec, register_int_gauge, register_int_gauge_vec, IntCounterVec, IntGauge,
    IntGaugeVec,
};

/// Total routed operations by kind (add/get/delete/search) and outcome.
pub static ROUTED_OPERATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "torusdb_routed_operations_total",
        "Total routed data-plane operations",
        &["operation", "status"]
    )
    .expect("Failed to register routed operations counter")
});

/// Replication / read-repair task outcomes.
pub static REPLICATION_TASKS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "torusdb_replication_tasks_total",
        "Replication pool task outcomes",
        &["kind", "status"]
    )
    .expect("Failed to register replication task counter")
});

/// Current depth of the replication queue.
pub static REPLICATION_QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "torusdb_replication_queue_depth",
        "Replication pool queued tasks"
    )
    .expect("Failed to register replication queue gauge")
});

/// Tasks that overflowed the replication queue and ran on the caller.
pub static REPLICATION_CALLER_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "torusdb_replication_caller_runs_total",
        "Replication tasks executed inline after queue overflow",
        &["kind"]
    )
    .expect("Failed to register caller-runs counter")
});

/// Vectors moved by the resharding engine, per target shard.
pub static RESHARDING_MOVED_VECTORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "torusdb_resharding_moved_vectors_total",
        "Vectors migrated onto new shards",
        &["target_shard"]
    )
    .expect("Failed to register resharding moved counter")
});

/// Shard availability as seen by the health monitor (1 = available).
pub static SHARD_AVAILABLE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "torusdb_shard_available",
        "Shard availability classification (1 = available, 0 = unavailable)",
        &["shard"]
    )
    .expect("Failed to register shard availability gauge")
});
