//! Clients for the storage-node wire protocol, one per shard.

pub mod api;
pub mod http;
pub mod memory;
pub mod pool;
pub mod wire;

pub use api::ShardApi;
pub use http::HttpShardClient;
pub use memory::InMemoryShard;
pub use pool::ShardClientPool;
pub use wire::{decode_hits, encode_hits, BINARY_RESULTS, JSON_RESULTS};
