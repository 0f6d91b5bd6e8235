//! Advisory shard health classification.
//!
//! A shard is unavailable after a configured number of consecutive RPC
//! failures and recovers on the next successful call or probe. There is no
//! quorum: health only steers replica reads when a primary is down.

use std::collections::HashMap;

use parking_lot::RwLock;
use torusdb_core::{metrics, HealthSettings, ShardDescriptor};

#[derive(Debug, Default)]
struct ShardHealth {
    consecutive_failures: u32,
    unavailable: bool,
}

/// Tracks reachability of each shard endpoint.
#[derive(Debug)]
pub struct HealthMonitor {
    shards: RwLock<HashMap<String, ShardHealth>>,
    failure_threshold: u32,
}

impl HealthMonitor {
    /// Creates a monitor with the configured failure threshold.
    #[must_use]
    pub fn new(settings: &HealthSettings) -> Self {
        Self {
            shards: RwLock::new(HashMap::new()),
            failure_threshold: settings.failure_threshold,
        }
    }

    /// Records a successful RPC or probe; recovers the shard.
    pub fn record_success(&self, shard_id: &str) {
        let mut shards = self.shards.write();
        let health = shards.entry(shard_id.to_string()).or_default();
        if health.unavailable {
            tracing::info!(shard = shard_id, "shard recovered");
        }
        health.consecutive_failures = 0;
        health.unavailable = false;
        metrics::SHARD_AVAILABLE.with_label_values(&[shard_id]).set(1);
    }

    /// Records a failed RPC or probe; trips the shard to unavailable once
    /// the consecutive-failure threshold is reached.
    pub fn record_failure(&self, shard_id: &str) {
        let mut shards = self.shards.write();
        let health = shards.entry(shard_id.to_string()).or_default();
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        if !health.unavailable && health.consecutive_failures >= self.failure_threshold {
            tracing::warn!(
                shard = shard_id,
                failures = health.consecutive_failures,
                "shard classified unavailable"
            );
            health.unavailable = true;
            metrics::SHARD_AVAILABLE.with_label_values(&[shard_id]).set(0);
        }
    }

    /// Whether the shard is currently classified available. Shards never
    /// seen before are assumed available.
    #[must_use]
    pub fn is_available(&self, shard_id: &str) -> bool {
        self.shards
            .read()
            .get(shard_id)
            .map(|h| !h.unavailable)
            .unwrap_or(true)
    }

    /// Partitions `shards` into (available, unavailable).
    #[must_use]
    pub fn partition<'a>(
        &self,
        shards: &'a [ShardDescriptor],
    ) -> (Vec<&'a ShardDescriptor>, Vec<&'a ShardDescriptor>) {
        shards
            .iter()
            .partition(|shard| self.is_available(&shard.shard_id))
    }

    /// The available subset of `shards`.
    #[must_use]
    pub fn available<'a>(&self, shards: &'a [ShardDescriptor]) -> Vec<&'a ShardDescriptor> {
        self.partition(shards).0
    }

    /// The unavailable subset of `shards`.
    #[must_use]
    pub fn unavailable<'a>(&self, shards: &'a [ShardDescriptor]) -> Vec<&'a ShardDescriptor> {
        self.partition(shards).1
    }
}
