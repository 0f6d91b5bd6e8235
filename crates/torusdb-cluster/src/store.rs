//! Durable cluster-config record in the coordination service.
//!
//! The config lives as a single JSON byte payload at a well-known key under
//! a configurable base path. Updates are last-writer-wins; there is no
//! optimistic CAS, and the operator serializes config changes through the
//! control surface.

use std::sync::Arc;

use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions};
use parking_lot::Mutex;
use tokio::sync::watch;
use torusdb_core::{CoordinationSettings, Error, Result};

/// Relative key of the cluster config record.
pub const CONFIG_RECORD: &str = "cluster/config";

/// Reserved namespaces created alongside the config record.
pub const RESERVED_NAMESPACES: [&str; 2] = ["rebalance", "coordinators/main"];

/// Storage backend for the cluster config record.
///
/// The etcd implementation is used in production; the in-memory one backs
/// tests and single-process deployments.
#[async_trait]
pub trait ConfigBackend: Send + Sync {
    /// Reads the current payload. `None` means the record was never
    /// written, which readers adopt as the empty config.
    async fn load(&self) -> Result<Option<Vec<u8>>>;

    /// Overwrites the record with a new payload.
    async fn store(&self, payload: Vec<u8>) -> Result<()>;

    /// Change notifications. The receiver observes a revision counter that
    /// bumps on every external change (and after reconnection, so readers
    /// re-load even if a change was missed while the session was down).
    fn subscribe(&self) -> watch::Receiver<u64>;
}

/// etcd-backed config store.
pub struct EtcdConfigBackend {
    client: Client,
    base_path: String,
    notify: watch::Sender<u64>,
}

impl EtcdConfigBackend {
    /// Connects to the coordination service, ensures the well-known
    /// namespaces exist, and starts the watch loop.
    ///
    /// Blocks until the client is connected, bounded by the configured
    /// connect timeout.
    pub async fn connect(settings: &CoordinationSettings) -> Result<Arc<Self>> {
        let options = ConnectOptions::new().with_connect_timeout(settings.connect_timeout());
        let client = Client::connect(&settings.endpoints, Some(options))
            .await
            .map_err(|err| {
                Error::unavailable(format!(
                    "coordination service unreachable at {:?}: {err}",
                    settings.endpoints
                ))
            })?;

        let backend = Arc::new(Self {
            client,
            base_path: settings.base_path.trim_end_matches('/').to_string(),
            notify: watch::channel(0).0,
        });
        backend.ensure_namespaces().await?;
        backend.spawn_watch_loop(settings.clone());
        Ok(backend)
    }

    fn record_key(&self) -> String {
        format!("{}/{CONFIG_RECORD}", self.base_path)
    }

    async fn ensure_namespaces(&self) -> Result<()> {
        let mut client = self.client.clone();
        for namespace in RESERVED_NAMESPACES {
            let key = format!("{}/{namespace}", self.base_path);
            let existing = client
                .get(key.as_str(), None)
                .await
                .map_err(|err| Error::unavailable(format!("reading `{key}`: {err}")))?;
            if existing.kvs().is_empty() {
                client
                    .put(key.as_str(), Vec::<u8>::new(), None)
                    .await
                    .map_err(|err| Error::unavailable(format!("creating `{key}`: {err}")))?;
            }
        }
        Ok(())
    }

    /// Watches the config record forever. A lost session is retried with
    /// exponential backoff; the process keeps serving its last snapshot
    /// meanwhile, and every successful (re)subscription bumps the revision
    /// so readers reload unconditionally.
    fn spawn_watch_loop(&self, settings: CoordinationSettings) {
        let key = self.record_key();
        let client = self.client.clone();
        let notify = self.notify.clone();
        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                let mut client = client.clone();
                match client.watch(key.as_str(), None).await {
                    Ok((_watcher, mut stream)) => {
                        attempt = 0;
                        notify.send_modify(|rev| *rev += 1);
                        loop {
                            match stream.message().await {
                                Ok(Some(response)) => {
                                    if !response.events().is_empty() {
                                        notify.send_modify(|rev| *rev += 1);
                                    }
                                }
                                Ok(None) => {
                                    tracing::warn!(key = %key, "config watch stream closed");
                                    break;
                                }
                                Err(err) => {
                                    tracing::warn!(key = %key, error = %err, "config watch failed");
                                    break;
                                }
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(key = %key, error = %err, "config watch subscription failed");
                    }
                }
                let backoff = settings.reconnect.backoff_for_attempt(attempt);
                attempt = attempt.saturating_add(1);
                tokio::time::sleep(backoff).await;
            }
        });
    }
}

#[async_trait]
impl ConfigBackend for EtcdConfigBackend {
    async fn load(&self) -> Result<Option<Vec<u8>>> {
        let mut client = self.client.clone();
        let key = self.record_key();
        let response = client
            .get(key.as_str(), None)
            .await
            .map_err(|err| Error::unavailable(format!("reading `{key}`: {err}")))?;
        Ok(response.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn store(&self, payload: Vec<u8>) -> Result<()> {
        let mut client = self.client.clone();
        let key = self.record_key();
        client
            .put(key.as_str(), payload, None)
            .await
            .map_err(|err| Error::unavailable(format!("writing `{key}`: {err}")))?;
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.notify.subscribe()
    }
}

/// In-memory config store used by tests and embedded deployments. Sharing
/// one instance across coordinator restarts models the durable record.
pub struct MemoryConfigBackend {
    payload: Mutex<Option<Vec<u8>>>,
    notify: watch::Sender<u64>,
}

impl MemoryConfigBackend {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            payload: Mutex::new(None),
            notify: watch::channel(0).0,
        })
    }
}

#[async_trait]
impl ConfigBackend for MemoryConfigBackend {
    async fn load(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.payload.lock().clone())
    }

    async fn store(&self, payload: Vec<u8>) -> Result<()> {
        *self.payload.lock() = Some(payload);
        self.notify.send_modify(|rev| *rev += 1);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.notify.subscribe()
    }
}
