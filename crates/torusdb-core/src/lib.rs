//! Core domain types for the TorusDB coordination layer.

pub mod cluster;
pub mod config;
pub mod database;
pub mod error;
pub mod ids;
pub mod metrics;
pub mod shard;
pub mod vector;

pub use cluster::ClusterConfig;
pub use config::{
    CoordinationSettings, GatewaySettings, HealthSettings, ReplicationSettings,
    ReshardingSettings, RetrySettings, SearchSettings, Settings,
};
pub use database::DatabaseDescriptor;
pub use error::{Error, Result};
pub use ids::{generate_vector_id, ring_hash, MIN_VECTOR_ID};
pub use shard::{ShardDescriptor, ShardStatus};
pub use vector::{SearchHit, VectorRecord};
