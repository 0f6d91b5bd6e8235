//! Operator control surface: read and apply cluster configs.

use std::sync::Arc;

use torusdb_cluster::ClusterView;
use torusdb_core::{ClusterConfig, Result};

use crate::resharding::{ReshardingEngine, ReshardingReport};

/// Applies config changes atomically and drives resharding.
///
/// Writes are single-writer by convention: operators serialize config
/// changes through this surface; there is no optimistic CAS.
pub struct ControlPlane {
    view: Arc<ClusterView>,
    engine: Arc<ReshardingEngine>,
}

impl ControlPlane {
    /// Builds the control surface over the shared view and engine.
    #[must_use]
    pub fn new(view: Arc<ClusterView>, engine: Arc<ReshardingEngine>) -> Self {
        Self { view, engine }
    }

    /// The current cluster config.
    #[must_use]
    pub fn current_config(&self) -> ClusterConfig {
        self.view.current().config.clone()
    }

    /// Persists a new config and migrates data onto any added shards.
    ///
    /// The config write is the commit point: it succeeds independently of
    /// resharding completion. When the shard set did not change, the
    /// engine instead runs a settlement sweep that moves nothing on a
    /// clean cluster and finishes any migration a killed coordinator left
    /// behind, so re-applying the current config is both idempotent and
    /// the recovery path after a crash.
    pub async fn apply(&self, new_config: ClusterConfig) -> Result<ReshardingReport> {
        new_config.validate()?;
        let old = self.view.current().config.clone();
        self.view.update(&new_config).await?;
        let added = new_config.added_since(&old);
        if added.is_empty() {
            return self.engine.settle(&new_config).await;
        }
        self.engine.run(&old, &new_config).await
    }

    /// Persists a new config and kicks resharding as a background job,
    /// returning once the update is durable. The deployment used by the
    /// gateway, where operators should not wait out a long migration.
    pub async fn submit(&self, new_config: ClusterConfig) -> Result<usize> {
        new_config.validate()?;
        let old = self.view.current().config.clone();
        self.view.update(&new_config).await?;
        let added = new_config.added_since(&old);
        let added_count = added.len();

        let engine = self.engine.clone();
        tokio::spawn(async move {
            let outcome = if added.is_empty() {
                engine.settle(&new_config).await
            } else {
                engine.run(&old, &new_config).await
            };
            if let Err(err) = outcome {
                tracing::error!(error = %err, "background resharding failed; retry with another apply");
            }
        });
        Ok(added_count)
    }
}
