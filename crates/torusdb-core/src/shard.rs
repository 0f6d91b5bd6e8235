use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a storage shard.
///
/// Readable iff `Active` or `Draining`; writable iff `New` or `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShardStatus {
    /// Created and accepting writes, but not necessarily hashed to yet.
    New,
    /// Fully serving reads and writes.
    Active,
    /// Source of a removal migration; still readable.
    Draining,
    /// Removed from the cluster config.
    Decommissioned,
}

impl ShardStatus {
    /// Returns the canonical wire string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Active => "ACTIVE",
            Self::Draining => "DRAINING",
            Self::Decommissioned => "DECOMMISSIONED",
        }
    }

    /// Whether shards in this status serve reads.
    #[must_use]
    pub const fn is_readable(&self) -> bool {
        matches!(self, Self::Active | Self::Draining)
    }

    /// Whether shards in this status accept writes.
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        matches!(self, Self::New | Self::Active)
    }
}

impl FromStr for ShardStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(Self::New),
            "ACTIVE" => Ok(Self::Active),
            "DRAINING" => Ok(Self::Draining),
            "DECOMMISSIONED" => Ok(Self::Decommissioned),
            _ => Err(()),
        }
    }
}

/// A storage node owning a contiguous arc of the hash ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardDescriptor {
    /// Stable shard identifier.
    pub shard_id: String,

    /// Network address of the storage node.
    pub base_url: String,

    /// Unsigned 64-bit ring position.
    pub hash_key: u64,

    /// Lifecycle status.
    pub status: ShardStatus,
}

impl ShardDescriptor {
    /// Constructs a descriptor in the given status.
    #[must_use]
    pub fn new(
        shard_id: impl Into<String>,
        base_url: impl Into<String>,
        hash_key: u64,
        status: ShardStatus,
    ) -> Self {
        Self {
            shard_id: shard_id.into(),
            base_url: base_url.into(),
            hash_key,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_filters_match_lifecycle() {
        assert!(ShardStatus::New.is_writable());
        assert!(!ShardStatus::New.is_readable());
        assert!(ShardStatus::Active.is_writable());
        assert!(ShardStatus::Active.is_readable());
        assert!(!ShardStatus::Draining.is_writable());
        assert!(ShardStatus::Draining.is_readable());
        assert!(!ShardStatus::Decommissioned.is_readable());
        assert!(!ShardStatus::Decommissioned.is_writable());
    }

    #[test]
    fn status_serializes_screaming_case() {
        let json = serde_json::to_string(&ShardStatus::Active).unwrap();
        assert_eq!(json, "\"ACTIVE\"");
        assert_eq!("DRAINING".parse::<ShardStatus>(), Ok(ShardStatus::Draining));
    }

    #[test]
    fn descriptor_wire_shape_is_camel_case() {
        let shard = ShardDescriptor::new("shard1", "http://node1:7700", 42, ShardStatus::Active);
        let json = serde_json::to_value(&shard).unwrap();
        assert!(json.get("shardId").is_some());
        assert!(json.get("baseUrl").is_some());
        assert!(json.get("hashKey").is_some());
    }
}
