//! TorusDB gateway: the stateless front door accepting client traffic,
//! routing writes, fanning out reads, and driving online resharding.

pub mod error;
pub mod handlers;
pub mod state;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::sync::watch;
use torusdb_cluster::{ClusterView, ConfigBackend, EtcdConfigBackend, HealthMonitor};
use torusdb_client::ShardClientPool;
use torusdb_coordinator::{ControlPlane, Coordinator, ReshardingEngine};
use torusdb_core::{Error, Result, Settings};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Wires the full coordinator stack over a config backend, talking to
/// shards over HTTP.
pub async fn build_state(
    settings: &Settings,
    backend: Arc<dyn ConfigBackend>,
) -> Result<AppState> {
    let pool = Arc::new(ShardClientPool::over_http(std::time::Duration::from_millis(
        settings.search.rpc_deadline_ms,
    ))?);
    build_state_with_pool(settings, backend, pool).await
}

/// Same wiring with an injected client pool; tests use in-memory shards.
pub async fn build_state_with_pool(
    settings: &Settings,
    backend: Arc<dyn ConfigBackend>,
    pool: Arc<ShardClientPool>,
) -> Result<AppState> {
    let view = ClusterView::bootstrap(backend).await?;
    let health = Arc::new(HealthMonitor::new(&settings.health));
    let coordinator = Coordinator::new(view.clone(), pool.clone(), health.clone(), settings);
    coordinator.clone().spawn_health_prober();

    let (stop_tx, stop_rx) = watch::channel(false);
    let engine = Arc::new(ReshardingEngine::new(
        view.clone(),
        pool,
        settings.resharding.clone(),
        stop_rx,
    ));
    let control = Arc::new(ControlPlane::new(view.clone(), engine));

    Ok(AppState {
        coordinator,
        control,
        view,
        health,
        stop: stop_tx,
    })
}

/// Builds the HTTP router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/metrics", get(handlers::health::metrics))
        .route(
            "/cluster/config",
            get(handlers::cluster::get_config).put(handlers::cluster::put_config),
        )
        .route("/cluster/status", get(handlers::cluster::cluster_status))
        .route(
            "/databases",
            get(handlers::databases::list_databases).post(handlers::databases::create_database),
        )
        .route(
            "/databases/:database_id",
            delete(handlers::databases::drop_database),
        )
        .route(
            "/databases/:database_id/vectors",
            post(handlers::vectors::add_vector),
        )
        .route(
            "/databases/:database_id/vectors/:id",
            get(handlers::vectors::get_vector).delete(handlers::vectors::delete_vector),
        )
        .route(
            "/databases/:database_id/search",
            post(handlers::vectors::search),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Connects to the coordination service, builds the app, and serves until
/// shutdown. On ctrl-c the resharding stop signal is raised and the
/// replication pool drained before exit.
pub async fn run_server(settings: Settings) -> Result<()> {
    let backend = EtcdConfigBackend::connect(&settings.coordination).await?;
    let state = build_state(&settings, backend).await?;
    let stop = state.stop.clone();
    let coordinator = state.coordinator.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&settings.gateway.listen_addr)
        .await
        .map_err(|err| {
            Error::internal(format!(
                "binding {}: {err}",
                settings.gateway.listen_addr
            ))
        })?;
    tracing::info!(addr = %settings.gateway.listen_addr, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested; stopping resharding jobs");
            let _ = stop.send(true);
        })
        .await
        .map_err(|err| Error::internal(format!("server terminated: {err}")))?;

    coordinator.replication().quiesce().await;
    Ok(())
}
