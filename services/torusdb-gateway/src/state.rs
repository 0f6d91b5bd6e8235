//! Shared state for the gateway HTTP server.

use std::sync::Arc;

use tokio::sync::watch;
use torusdb_cluster::{ClusterView, HealthMonitor};
use torusdb_coordinator::{ControlPlane, Coordinator};

/// Everything a handler needs; cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Read/write protocol core.
    pub coordinator: Arc<Coordinator>,
    /// Operator control surface.
    pub control: Arc<ControlPlane>,
    /// Watched cluster view, for status reporting.
    pub view: Arc<ClusterView>,
    /// Availability classification, for status reporting.
    pub health: Arc<HealthMonitor>,
    /// Cooperative stop signal fanned out to resharding jobs.
    pub stop: watch::Sender<bool>,
}
