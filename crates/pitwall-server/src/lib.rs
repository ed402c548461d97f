//! Pitwall server library logic.

pub mod api;
pub mod api_events;
pub mod config;
pub mod middleware;
pub mod retention;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use config::{Config, Environment};
use pitwall_db::LazyPool;
use pitwall_events::{
    EventStore, FailoverStore, SqliteEventStore, StorageBackend, SyncReader, VolatileEventStore,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The event store answering requests.
    pub store: Arc<dyn EventStore>,
    /// Sync reads over `store`.
    pub reader: SyncReader,
    /// Events kept per kind.
    pub retention_capacity: usize,
    /// Whether error responses may carry debug detail.
    pub environment: Environment,
}

impl AppState {
    pub fn new(store: Arc<dyn EventStore>, config: &Config) -> Self {
        Self {
            reader: SyncReader::new(Arc::clone(&store), config.sync.settings()),
            store,
            retention_capacity: config.retention.capacity,
            environment: config.server.environment,
        }
    }
}

/// Builds the event store selected by `config.storage`.
///
/// SQLite is opened lazily on first use. With `fallback_on_unavailable` the
/// durable store is wrapped so requests are served from memory while the
/// database is unreachable.
pub fn build_store(config: &Config) -> Arc<dyn EventStore> {
    let volatile = || VolatileEventStore::new(config.storage.memory_capacity);

    match config.storage.backend {
        StorageBackend::Memory => {
            let store = volatile();
            tracing::warn!(
                ceiling = store.ceiling(),
                "using volatile event store; events are lost on restart and not shared between processes"
            );
            Arc::new(store)
        }
        StorageBackend::Sqlite => {
            let durable = SqliteEventStore::new(LazyPool::new(
                &config.database.path,
                config.database.runtime_settings(),
            ));
            if config.storage.fallback_on_unavailable {
                Arc::new(FailoverStore::new(
                    durable,
                    volatile(),
                    config.storage.probe_interval(),
                ))
            } else {
                Arc::new(durable)
            }
        }
    }
}

/// Health check handler.
///
/// Returns `200 OK` with server status, version, and the storage backend
/// currently answering requests.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "storage": state.store.backend().as_str(),
    }))
}

/// Maximum accepted request body size (64 KiB).
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/events",
            post(api_events::write_event_handler)
                .get(api_events::sync_events_handler)
                .fallback(api::method_not_allowed_handler),
        )
        .route(
            "/api/events/recent",
            get(api_events::recent_events_handler).fallback(api::method_not_allowed_handler),
        )
        .fallback(api::not_found_handler)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(axum::middleware::from_fn(middleware::cors_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
