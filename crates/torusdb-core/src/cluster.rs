//! Cluster config: the single source of truth for shard topology.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::shard::ShardDescriptor;

/// Ordered set of shard descriptors plus free-form operator metadata.
///
/// The config is persisted as a single JSON payload in the coordination
/// service; derived objects (read ring, write ring, ownership map) are
/// recomputed from it on every change.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Shard descriptors in operator-submitted order.
    #[serde(default)]
    pub shards: Vec<ShardDescriptor>,

    /// Free-form metadata mapping.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ClusterConfig {
    /// Parses a coordination-service payload. An empty payload means an
    /// empty config (the well-known record may not have been written yet).
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_slice(bytes)
            .map_err(|err| Error::invalid_config(format!("malformed cluster config: {err}")))
    }

    /// Serializes the config to its wire payload.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|err| Error::internal(format!("encoding cluster config: {err}")))
    }

    /// Validates operator input before it is persisted.
    ///
    /// Duplicate `hash_key`s are legal here and arbitrated at ring build
    /// (the lexicographically smaller `shard_id` wins); duplicate shard ids
    /// and empty fields are rejected outright.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for shard in &self.shards {
            if shard.shard_id.is_empty() {
                return Err(Error::invalid_config("shard with empty shardId"));
            }
            if shard.base_url.is_empty() {
                return Err(Error::invalid_config(format!(
                    "shard `{}` has an empty baseUrl",
                    shard.shard_id
                )));
            }
            if !seen.insert(shard.shard_id.as_str()) {
                return Err(Error::invalid_config(format!(
                    "duplicate shardId `{}`",
                    shard.shard_id
                )));
            }
        }
        Ok(())
    }

    /// Looks up a shard descriptor by id.
    #[must_use]
    pub fn shard(&self, shard_id: &str) -> Option<&ShardDescriptor> {
        self.shards.iter().find(|s| s.shard_id == shard_id)
    }

    /// Shards present in `self` but absent from `old`, compared by
    /// `shard_id`. This is the trigger set for resharding.
    #[must_use]
    pub fn added_since(&self, old: &ClusterConfig) -> Vec<ShardDescriptor> {
        let old_ids: HashSet<&str> = old.shards.iter().map(|s| s.shard_id.as_str()).collect();
        self.shards
            .iter()
            .filter(|s| !old_ids.contains(s.shard_id.as_str()))
            .cloned()
            .collect()
    }
}
