//! Per-kind retention: inline trimming after writes and a periodic sweep.

use pitwall_events::{EventKind, EventStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Trims `kind` back to `capacity` after a write.
///
/// Best-effort: the write has already succeeded, so a failure is logged and
/// the stream may sit above its cap until the next write or sweep.
pub fn trim_after_write(store: &dyn EventStore, kind: EventKind, capacity: usize) {
    match store.trim(kind, capacity) {
        Ok(0) => {}
        Ok(deleted) => {
            tracing::debug!(kind = kind.as_str(), deleted, capacity, "trimmed event stream");
        }
        Err(e) => {
            tracing::warn!(
                kind = kind.as_str(),
                capacity,
                error = %e,
                "retention trim failed after write"
            );
        }
    }
}

/// Trims every kind once; returns the number of events deleted.
pub fn sweep(store: &dyn EventStore, capacity: usize) -> usize {
    let mut total = 0;
    for kind in EventKind::ALL {
        match store.trim(kind, capacity) {
            Ok(deleted) => total += deleted,
            Err(e) => {
                tracing::error!(kind = kind.as_str(), error = %e, "retention sweep failed");
            }
        }
    }
    total
}

/// Starts a background task that periodically trims each kind to `capacity`.
///
/// This task runs indefinitely. An `interval_seconds` of zero returns
/// immediately.
///
/// # Arguments
///
/// * `store` - The event store to trim.
/// * `capacity` - Events kept per kind.
/// * `interval_seconds` - Time in seconds to wait between sweeps.
pub async fn start_retention_task(
    store: Arc<dyn EventStore>,
    capacity: usize,
    interval_seconds: u64,
) {
    if interval_seconds == 0 {
        tracing::info!("retention sweep disabled, relying on inline trimming");
        return;
    }

    let interval = Duration::from_secs(interval_seconds);
    tracing::info!(interval_seconds, capacity, "starting event retention task");

    loop {
        sleep(interval).await;

        let store = Arc::clone(&store);
        let result = tokio::task::spawn_blocking(move || sweep(store.as_ref(), capacity)).await;

        match result {
            Ok(0) => tracing::debug!("no events beyond retention cap"),
            Ok(count) => tracing::info!(count, "deleted events beyond retention cap"),
            Err(e) => {
                tracing::error!(error = %e, "retention task panicked or was cancelled");
            }
        }
    }
}
