//! Process-wide snapshot of the cluster config and its derived objects.
//!
//! The snapshot is an immutable value produced by a single refresh routine
//! and published by swapping one shared pointer, so readers always see a
//! consistent (config, read ring, write ring, ownership) tuple.

use std::sync::Arc;

use parking_lot::RwLock;
use torusdb_core::{ClusterConfig, Error, Result, ShardDescriptor};

use crate::ownership::OwnershipMap;
use crate::ring::HashRing;
use crate::store::ConfigBackend;

/// Immutable view of one config revision.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    /// The config as loaded from the coordination service.
    pub config: ClusterConfig,

    /// Ring over shards that serve reads (ACTIVE, DRAINING).
    pub read_ring: HashRing,

    /// Ring over shards that accept writes (NEW, ACTIVE).
    pub write_ring: HashRing,

    /// Circular replica relation derived from the write ring.
    pub ownership: OwnershipMap,
}

impl ClusterSnapshot {
    /// Derives rings and ownership from a parsed config.
    #[must_use]
    pub fn derive(config: ClusterConfig) -> Self {
        let read_ring = HashRing::build(
            config
                .shards
                .iter()
                .filter(|s| s.status.is_readable())
                .cloned(),
        );
        let write_ring = HashRing::build(
            config
                .shards
                .iter()
                .filter(|s| s.status.is_writable())
                .cloned(),
        );
        let ownership = OwnershipMap::derive(&write_ring);
        Self {
            config,
            read_ring,
            write_ring,
            ownership,
        }
    }

    /// All shard descriptors in ACTIVE status.
    #[must_use]
    pub fn active_shards(&self) -> Vec<&ShardDescriptor> {
        self.config
            .shards
            .iter()
            .filter(|s| s.status == torusdb_core::ShardStatus::Active)
            .collect()
    }
}

/// Watched handle over the cluster config store.
pub struct ClusterView {
    backend: Arc<dyn ConfigBackend>,
    snapshot: RwLock<Arc<ClusterSnapshot>>,
}

impl ClusterView {
    /// Loads the initial snapshot and starts the refresh task that
    /// re-invokes the load path on every external change.
    pub async fn bootstrap(backend: Arc<dyn ConfigBackend>) -> Result<Arc<Self>> {
        let view = Arc::new(Self {
            backend: backend.clone(),
            snapshot: RwLock::new(Arc::new(ClusterSnapshot::default())),
        });
        // Subscribe before the initial load so a write landing in between
        // still triggers a refresh.
        let mut changes = backend.subscribe();
        view.refresh().await?;

        let weak = Arc::downgrade(&view);
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let Some(view) = weak.upgrade() else { break };
                if let Err(err) = view.refresh().await {
                    tracing::warn!(error = %err, "cluster config refresh failed; serving previous snapshot");
                }
            }
        });
        Ok(view)
    }

    /// Reloads the record and swaps the snapshot.
    ///
    /// A missing record is adopted as the empty config. A payload that
    /// fails to parse is logged and the previous snapshot is retained.
    pub async fn refresh(&self) -> Result<()> {
        let payload = self.backend.load().await?;
        let config = match payload {
            Some(bytes) => match ClusterConfig::from_json_bytes(&bytes) {
                Ok(config) => config,
                Err(err) => {
                    tracing::error!(error = %err, "cluster config payload unparsable; keeping previous snapshot");
                    return Ok(());
                }
            },
            None => ClusterConfig::default(),
        };
        let snapshot = Arc::new(ClusterSnapshot::derive(config));
        *self.snapshot.write() = snapshot;
        Ok(())
    }

    /// Writes a new config to the coordination service and refreshes.
    ///
    /// Single-writer by convention: only the control surface calls this.
    pub async fn update(&self, config: &ClusterConfig) -> Result<()> {
        config.validate()?;
        let payload = config.to_json_bytes()?;
        self.backend.store(payload).await?;
        self.refresh().await
    }

    /// The latest successfully parsed snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<ClusterSnapshot> {
        self.snapshot.read().clone()
    }
}

impl std::fmt::Debug for ClusterView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterView")
            .field("snapshot", &self.snapshot.read())
            .finish_non_exhaustive()
    }
}

/// Maps ring lookups on an empty cluster to the caller-visible error.
pub fn empty_ring_as_unavailable(err: Error) -> Error {
    match err {
        Error::EmptyRing => Error::unavailable("cluster has no serving shards"),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryConfigBackend;
    use torusdb_core::{ShardDescriptor, ShardStatus};

    fn config(shards: Vec<ShardDescriptor>) -> ClusterConfig {
        ClusterConfig {
            shards,
            metadata: Default::default(),
        }
    }

    fn shard(id: &str, key: u64, status: ShardStatus) -> ShardDescriptor {
        ShardDescriptor::new(id, format!("http://{id}:7700"), key, status)
    }

    #[tokio::test]
    async fn bootstrap_with_missing_record_yields_empty_config() {
        let view = ClusterView::bootstrap(MemoryConfigBackend::new())
            .await
            .unwrap();
        let snapshot = view.current();
        assert!(snapshot.config.shards.is_empty());
        assert!(snapshot.write_ring.is_empty());
    }

    #[tokio::test]
    async fn update_persists_and_refreshes() {
        let backend = MemoryConfigBackend::new();
        let view = ClusterView::bootstrap(backend.clone()).await.unwrap();

        let cfg = config(vec![
            shard("shard1", 0, ShardStatus::Active),
            shard("shard2", 9000, ShardStatus::Active),
        ]);
        view.update(&cfg).await.unwrap();

        let snapshot = view.current();
        assert_eq!(snapshot.config, cfg);
        assert_eq!(snapshot.read_ring.len(), 2);
        assert_eq!(snapshot.write_ring.len(), 2);
    }

    #[tokio::test]
    async fn rings_apply_status_filters() {
        let backend = MemoryConfigBackend::new();
        let view = ClusterView::bootstrap(backend).await.unwrap();
        view.update(&config(vec![
            shard("fresh", 10, ShardStatus::New),
            shard("live", 20, ShardStatus::Active),
            shard("drain", 30, ShardStatus::Draining),
            shard("gone", 40, ShardStatus::Decommissioned),
        ]))
        .await
        .unwrap();

        let snapshot = view.current();
        let read_ids: Vec<_> = snapshot
            .read_ring
            .shards()
            .iter()
            .map(|s| s.shard_id.as_str())
            .collect();
        let write_ids: Vec<_> = snapshot
            .write_ring
            .shards()
            .iter()
            .map(|s| s.shard_id.as_str())
            .collect();
        assert_eq!(read_ids, vec!["live", "drain"]);
        assert_eq!(write_ids, vec!["fresh", "live"]);
        assert_eq!(snapshot.active_shards().len(), 1);
    }

    #[tokio::test]
    async fn unparsable_payload_keeps_previous_snapshot() {
        let backend = MemoryConfigBackend::new();
        let view = ClusterView::bootstrap(backend.clone()).await.unwrap();
        view.update(&config(vec![shard("shard1", 0, ShardStatus::Active)]))
            .await
            .unwrap();

        backend.store(b"{broken".to_vec()).await.unwrap();
        view.refresh().await.unwrap();

        assert_eq!(view.current().config.shards.len(), 1);
    }

    #[tokio::test]
    async fn external_store_triggers_watch_refresh() {
        let backend = MemoryConfigBackend::new();
        let view = ClusterView::bootstrap(backend.clone()).await.unwrap();

        let cfg = config(vec![shard("shard1", 0, ShardStatus::Active)]);
        backend.store(cfg.to_json_bytes().unwrap()).await.unwrap();

        // The watch task refreshes asynchronously.
        for _ in 0..50 {
            if !view.current().config.shards.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(view.current().config, cfg);
    }
}
