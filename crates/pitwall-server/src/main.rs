//! Pitwall server binary.
//!
//! Starts an axum HTTP server with structured logging, lazy event store
//! initialization, a retention sweep, and graceful shutdown on SIGTERM/SIGINT.

use pitwall_server::{app, build_store, config, retention, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("PITWALL_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration, the server cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        environment = ?config.server.environment,
        "resolved startup configuration path"
    );

    let store = build_store(&config);

    // Touch the store once so migrations and any outage surface at startup.
    let probe = Arc::clone(&store);
    match tokio::task::spawn_blocking(move || probe.count(None)).await {
        Ok(Ok(count)) => tracing::info!(
            backend = store.backend().as_str(),
            events = count,
            "event store ready"
        ),
        Ok(Err(e)) => tracing::error!(error = %e, "event store not reachable at startup"),
        Err(e) => tracing::error!(error = %e, "event store probe panicked"),
    }

    tokio::spawn(retention::start_retention_task(
        Arc::clone(&store),
        config.retention.capacity,
        config.retention.sweep_interval_seconds,
    ));

    let app = app(AppState::new(store, &config));
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting pitwall server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address, is another process using this port?");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("pitwall server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
