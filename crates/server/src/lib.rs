//! HTTP surface and channel endpoint for the Elytra control plane.
//!
//! Architecture role:
//! - REST adapter over the catalog and coordinator (no state of its own)
//! - WebSocket handshake and per-connection pump/writer tasks
//! - periodic liveness and reaper tasks
//!
//! Key modules:
//! - [`routes`]
//! - [`channel`]
//! - [`tasks`]

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use elytra_catalog::DatasetCatalog;
use elytra_control::{ConnectionRegistry, CoordinatorConfig, JobCoordinator, MessageRouter};

pub mod channel;
pub mod routes;
pub mod tasks;

/// Shared application state for all request handlers.
///
/// The catalog, connection registry, and job registry are the three pieces
/// of process-wide state; they are injected here once at startup and torn
/// down with the process.
#[derive(Clone)]
pub struct AppState {
    /// Dataset catalog.
    pub catalog: Arc<DatasetCatalog>,
    /// Live connection registry.
    pub registry: Arc<ConnectionRegistry>,
    /// Job coordinator.
    pub coordinator: Arc<JobCoordinator>,
    /// Inbound frame dispatcher.
    pub router: Arc<MessageRouter>,
}

/// Wire the control-plane singletons over an existing catalog.
pub fn build_state(catalog: Arc<DatasetCatalog>, job_deadline: Option<Duration>) -> AppState {
    let registry = Arc::new(ConnectionRegistry::new());
    let coordinator = Arc::new(JobCoordinator::new(
        CoordinatorConfig { job_deadline },
        Arc::clone(&catalog),
        Arc::clone(&registry),
    ));
    let router = Arc::new(MessageRouter::new(
        Arc::clone(&registry),
        Arc::clone(&coordinator),
    ));
    AppState {
        catalog,
        registry,
        coordinator,
        router,
    }
}

/// Assemble the full application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/register-dataset", post(routes::register_dataset))
        .route("/api/datasets", get(routes::list_datasets))
        .route("/api/datasets/:id", delete(routes::delete_dataset))
        .route("/api/jobs", post(routes::submit_job))
        .route("/ws", get(channel::channel_handler))
        .route("/healthz", get(routes::healthz))
        .route("/metrics", get(routes::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
