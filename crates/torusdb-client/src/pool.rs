//! Lazily-populated client map keyed by shard id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use torusdb_core::{Error, Result, ShardDescriptor};

use crate::api::ShardApi;
use crate::http::HttpShardClient;

type ClientFactory = dyn Fn(&ShardDescriptor) -> Arc<dyn ShardApi> + Send + Sync;

/// One logical client per shard; creation is lazy and idempotent.
pub struct ShardClientPool {
    clients: RwLock<HashMap<String, Arc<dyn ShardApi>>>,
    factory: Box<ClientFactory>,
}

impl ShardClientPool {
    /// Pool of HTTP clients sharing one transport, with a per-call timeout.
    pub fn over_http(rpc_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(rpc_timeout)
            .build()
            .map_err(|err| Error::internal(format!("building http transport: {err}")))?;
        Ok(Self::with_factory(move |shard| {
            Arc::new(HttpShardClient::new(&shard.base_url, http.clone())) as Arc<dyn ShardApi>
        }))
    }

    /// Pool with a custom client factory; tests inject in-memory shards.
    #[must_use]
    pub fn with_factory(
        factory: impl Fn(&ShardDescriptor) -> Arc<dyn ShardApi> + Send + Sync + 'static,
    ) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            factory: Box::new(factory),
        }
    }

    /// Returns the client for a shard, creating it on first use.
    #[must_use]
    pub fn client_for(&self, shard: &ShardDescriptor) -> Arc<dyn ShardApi> {
        if let Some(client) = self.clients.read().get(&shard.shard_id) {
            return client.clone();
        }
        let mut clients = self.clients.write();
        clients
            .entry(shard.shard_id.clone())
            .or_insert_with(|| (self.factory)(shard))
            .clone()
    }

    /// Drops the cached client for a shard (e.g. after its endpoint moved).
    pub fn evict(&self, shard_id: &str) {
        self.clients.write().remove(shard_id);
    }
}
