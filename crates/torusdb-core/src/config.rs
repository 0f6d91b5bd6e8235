//! Configuration for the front door process.
//!
//! Sources, in order of precedence:
//! - Environment variables (highest priority)
//! - Config file named by `TORUSDB_CONFIG`
//! - `./config/torusdb.yaml`
//! - Hardcoded defaults (lowest priority)

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Root configuration for a coordinator/gateway process.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub coordination: CoordinationSettings,

    #[serde(default)]
    pub replication: ReplicationSettings,

    #[serde(default)]
    pub search: SearchSettings,

    #[serde(default)]
    pub resharding: ReshardingSettings,

    #[serde(default)]
    pub health: HealthSettings,

    #[serde(default)]
    pub gateway: GatewaySettings,
}

impl Settings {
    /// Loads settings from files and environment.
    ///
    /// Example override: `TORUSDB_RESHARDING__BATCH_SIZE=1000`.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Self::set_defaults(Config::builder())?;

        if let Ok(config_path) = std::env::var("TORUSDB_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        builder = builder
            .add_source(File::with_name("./config/torusdb").required(false))
            .add_source(
                Environment::with_prefix("TORUSDB")
                    .separator("__")
                    .try_parsing(true),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Seeds every key so partial overrides from files or the environment
    /// merge against a complete tree.
    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            // Coordination service
            .set_default("coordination.endpoints", vec!["http://127.0.0.1:2379"])?
            .set_default("coordination.base_path", "/torusdb")?
            .set_default("coordination.connect_timeout_ms", 10_000)?
            .set_default("coordination.reconnect.initial_backoff_ms", 100)?
            .set_default("coordination.reconnect.max_backoff_ms", 5000)?
            .set_default("coordination.reconnect.backoff_multiplier", 2.0)?
            // Replication pool
            .set_default("replication.workers", 4)?
            .set_default("replication.queue_depth", 1024)?
            // Search deadlines
            .set_default("search.rpc_deadline_ms", 5000)?
            .set_default("search.deadline_margin_ms", 250)?
            // Resharding
            .set_default("resharding.batch_size", 500)?
            .set_default("resharding.max_parallel_jobs", 4)?
            // Health
            .set_default("health.probe_interval_ms", 5000)?
            .set_default("health.failure_threshold", 3)?
            // Gateway
            .set_default("gateway.listen_addr", "0.0.0.0:7600")
    }

    /// Validates cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resharding.batch_size == 0 {
            return Err(ConfigError::Message(
                "resharding.batch_size must be > 0".to_string(),
            ));
        }
        if self.replication.workers == 0 {
            return Err(ConfigError::Message(
                "replication.workers must be > 0".to_string(),
            ));
        }
        if self.search.deadline_margin_ms >= self.search.rpc_deadline_ms {
            return Err(ConfigError::Message(
                "search.deadline_margin_ms must be < search.rpc_deadline_ms".to_string(),
            ));
        }
        if self.health.failure_threshold == 0 {
            return Err(ConfigError::Message(
                "health.failure_threshold must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Coordination-service (cluster config store) connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoordinationSettings {
    /// Endpoints of the coordination service.
    pub endpoints: Vec<String>,

    /// Base path under which the well-known records live.
    pub base_path: String,

    /// Bound on the initial connect wait.
    pub connect_timeout_ms: u64,

    /// Backoff schedule for reconnection after a lost session.
    #[serde(default)]
    pub reconnect: RetrySettings,
}

impl Default for CoordinationSettings {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            base_path: "/torusdb".to_string(),
            connect_timeout_ms: 10_000,
            reconnect: RetrySettings::default(),
        }
    }
}

impl CoordinationSettings {
    /// Connect timeout as a `Duration`.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Exponential backoff schedule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrySettings {
    /// Initial backoff delay in milliseconds.
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds.
    pub max_backoff_ms: u64,

    /// Backoff multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    /// Calculates the backoff delay for a given attempt, capped at the
    /// configured maximum.
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = (self.initial_backoff_ms as f64
            * self.backoff_multiplier.powi(attempt.min(30) as i32))
        .min(self.max_backoff_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

/// Bounded pool for fire-and-forget replica writes and read repair.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReplicationSettings {
    /// Number of worker tasks draining the queue.
    pub workers: usize,

    /// Queue depth; overflow falls back to caller-runs.
    pub queue_depth: usize,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_depth: 1024,
        }
    }
}

/// Deadlines for fan-out reads.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchSettings {
    /// Shared deadline for all in-flight per-shard search calls.
    pub rpc_deadline_ms: u64,

    /// Safety margin subtracted from the caller's deadline.
    pub deadline_margin_ms: u64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            rpc_deadline_ms: 5000,
            deadline_margin_ms: 250,
        }
    }
}

impl SearchSettings {
    /// Effective per-fan-out deadline.
    #[must_use]
    pub fn rpc_deadline(&self) -> Duration {
        Duration::from_millis(self.rpc_deadline_ms.saturating_sub(self.deadline_margin_ms))
    }
}

/// Online migration tunables.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReshardingSettings {
    /// Number of records fetched per `scan_range` call.
    pub batch_size: usize,

    /// Bound on concurrently running (source, target) migration jobs.
    pub max_parallel_jobs: usize,
}

impl Default for ReshardingSettings {
    fn default() -> Self {
        Self {
            batch_size: 500,
            max_parallel_jobs: 4,
        }
    }
}

/// Shard liveness monitoring tunables.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthSettings {
    /// Interval between liveness probes.
    pub probe_interval_ms: u64,

    /// Consecutive RPC failures before a shard is classified unavailable.
    pub failure_threshold: u32,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            probe_interval_ms: 5000,
            failure_threshold: 3,
        }
    }
}

impl HealthSettings {
    /// Probe interval as a `Duration`.
    #[must_use]
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

/// Front-door listener settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewaySettings {
    /// Bind address for the HTTP listener.
    pub listen_addr: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:7600".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.resharding.batch_size, 500);
        assert_eq!(settings.health.failure_threshold, 3);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let retry = RetrySettings::default();
        assert_eq!(retry.backoff_for_attempt(0).as_millis(), 100);
        assert_eq!(retry.backoff_for_attempt(1).as_millis(), 200);
        assert_eq!(retry.backoff_for_attempt(2).as_millis(), 400);
        assert!(retry.backoff_for_attempt(20).as_millis() <= 5000);
    }

    #[test]
    fn zero_batch_size_rejected() {
        let mut settings = Settings::default();
        settings.resharding.batch_size = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn search_deadline_subtracts_margin() {
        let search = SearchSettings {
            rpc_deadline_ms: 1000,
            deadline_margin_ms: 200,
        };
        assert_eq!(search.rpc_deadline().as_millis(), 800);
    }
}
