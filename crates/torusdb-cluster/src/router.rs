//! Write routing: vector id → (primary, replica).

use std::sync::Arc;

use torusdb_core::{ring_hash, Result, ShardDescriptor};

use crate::view::{ClusterSnapshot, ClusterView};

/// Primary and replica targets for one write, resolved against a single
/// snapshot so both agree on the same ring revision.
#[derive(Debug, Clone)]
pub struct WriteRoute {
    /// Shard selected by the write ring for the vector's hash.
    pub primary: ShardDescriptor,

    /// Ring successor of the primary. Equals the primary on a single-shard
    /// ring, in which case replica writes are no-ops.
    pub replica: ShardDescriptor,
}

impl WriteRoute {
    /// Whether the replica is a distinct shard.
    #[must_use]
    pub fn has_distinct_replica(&self) -> bool {
        self.replica.shard_id != self.primary.shard_id
    }
}

/// Routes vector ids over the current cluster snapshot.
pub struct Router {
    view: Arc<ClusterView>,
}

impl Router {
    /// Creates a router over the watched cluster view.
    #[must_use]
    pub fn new(view: Arc<ClusterView>) -> Self {
        Self { view }
    }

    /// The snapshot all route decisions of one operation should share.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ClusterSnapshot> {
        self.view.current()
    }

    /// Resolves the (primary, replica) pair for a vector id against the
    /// given snapshot.
    pub fn route_for_write(
        snapshot: &ClusterSnapshot,
        id: i64,
    ) -> Result<WriteRoute> {
        let hash = ring_hash(id);
        let primary = snapshot.write_ring.locate(hash)?.clone();
        let replica = snapshot
            .ownership
            .replica_location(&primary.shard_id)
            .cloned()
            .unwrap_or_else(|| primary.clone());
        Ok(WriteRoute { primary, replica })
    }

    /// Shards currently serving reads, in ring order.
    #[must_use]
    pub fn readable_shards(snapshot: &ClusterSnapshot) -> &[ShardDescriptor] {
        snapshot.read_ring.shards()
    }
}
