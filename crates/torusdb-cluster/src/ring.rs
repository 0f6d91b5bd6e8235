//! Consistent-hash ring over shard descriptors.
//!
//! Physical placement only, no virtual nodes: the cluster relies on a
//! handful of shards whose `hash_key`s are set well-spaced by the operator.

use torusdb_core::{Error, Result, ShardDescriptor};

/// Ordered-by-`hash_key` view of shards with wrap-around lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HashRing {
    shards: Vec<ShardDescriptor>,
}

impl HashRing {
    /// Builds a ring from descriptors.
    ///
    /// Shards are ordered by `(hash_key, shard_id)`. Identical `hash_key`s
    /// are forbidden: the lexicographically smaller `shard_id` wins and the
    /// other descriptor is logged and ignored.
    #[must_use]
    pub fn build(shards: impl IntoIterator<Item = ShardDescriptor>) -> Self {
        let mut shards: Vec<ShardDescriptor> = shards.into_iter().collect();
        shards.sort_by(|a, b| {
            a.hash_key
                .cmp(&b.hash_key)
                .then_with(|| a.shard_id.cmp(&b.shard_id))
        });
        shards.dedup_by(|loser, winner| {
            let clash = loser.hash_key == winner.hash_key;
            if clash {
                tracing::warn!(
                    ignored = %loser.shard_id,
                    kept = %winner.shard_id,
                    hash_key = loser.hash_key,
                    "shards share a hash key; ignoring the lexicographically larger one"
                );
            }
            clash
        });
        Self { shards }
    }

    /// Returns the first shard whose `hash_key` is >= `hash`, wrapping to
    /// the ring start past the last entry.
    ///
    /// # Errors
    ///
    /// Fails with `EmptyRing` when the ring has no shards; there are no
    /// other error paths.
    pub fn locate(&self, hash: u64) -> Result<&ShardDescriptor> {
        if self.shards.is_empty() {
            return Err(Error::EmptyRing);
        }
        let idx = self.shards.partition_point(|s| s.hash_key < hash);
        let idx = if idx == self.shards.len() { 0 } else { idx };
        Ok(&self.shards[idx])
    }

    /// Shards in ring order.
    #[must_use]
    pub fn shards(&self) -> &[ShardDescriptor] {
        &self.shards
    }

    /// The shard immediately preceding `shard_id` in ring order, wrapping
    /// at the start. On a single-entry ring this is the shard itself.
    #[must_use]
    pub fn predecessor(&self, shard_id: &str) -> Option<&ShardDescriptor> {
        let idx = self.shards.iter().position(|s| s.shard_id == shard_id)?;
        let prev = (idx + self.shards.len() - 1) % self.shards.len();
        Some(&self.shards[prev])
    }

    /// Whether the ring has no shards. An empty ring is a valid state; all
    /// lookups on it fail with `EmptyRing`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Number of shards on the ring.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.len()
    }
}

/// Whether `hash` falls in the half-open ring arc `(start, end]`.
///
/// Handles the wrap case: when `start >= end` the arc crosses the origin
/// and membership is `hash > start || hash <= end`.
#[must_use]
pub fn belongs_to(hash: u64, start: u64, end: u64) -> bool {
    if start < end {
        hash > start && hash <= end
    } else {
        hash > start || hash <= end
    }
}
