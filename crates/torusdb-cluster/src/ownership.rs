//! Replica ownership derived from ring order.
//!
//! The relation is circular: each shard replicates onto its successor, so
//! `replica_location(s_i) = s_{i+1 mod n}` and the only replica source of a
//! shard is its predecessor. On a single-shard ring a shard is its own
//! replica location and replica writes are no-ops.

use std::collections::HashMap;

use torusdb_core::ShardDescriptor;

use crate::ring::HashRing;

/// Primary→replica relation for the current ring.
#[derive(Debug, Clone, Default)]
pub struct OwnershipMap {
    replica_of: HashMap<String, ShardDescriptor>,
    sources_of: HashMap<String, Vec<ShardDescriptor>>,
}

impl OwnershipMap {
    /// Derives the ownership relation from a ring.
    #[must_use]
    pub fn derive(ring: &HashRing) -> Self {
        let shards = ring.shards();
        let n = shards.len();
        let mut replica_of = HashMap::with_capacity(n);
        let mut sources_of: HashMap<String, Vec<ShardDescriptor>> = HashMap::with_capacity(n);
        for (i, shard) in shards.iter().enumerate() {
            let replica = &shards[(i + 1) % n];
            replica_of.insert(shard.shard_id.clone(), replica.clone());
            sources_of
                .entry(replica.shard_id.clone())
                .or_default()
                .push(shard.clone());
        }
        Self {
            replica_of,
            sources_of,
        }
    }

    /// The shard holding replicas of `shard_id`'s primaries.
    #[must_use]
    pub fn replica_location(&self, shard_id: &str) -> Option<&ShardDescriptor> {
        self.replica_of.get(shard_id)
    }

    /// The shards whose primaries replicate onto `shard_id`.
    #[must_use]
    pub fn replica_sources(&self, shard_id: &str) -> &[ShardDescriptor] {
        self.sources_of
            .get(shard_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}
