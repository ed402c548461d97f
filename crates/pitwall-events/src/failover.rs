//! Degraded-mode failover from a durable store to a volatile one.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::StoreError;
use crate::event::{EventKind, NewEvent, TelemetryEvent};
use crate::memory::VolatileEventStore;
use crate::store::{EventStore, StorageBackend};

#[derive(Debug, Clone, Copy)]
struct Outage {
    since: Instant,
    last_probe: Instant,
}

/// Wraps a durable store and falls back to a [`VolatileEventStore`] while the
/// durable store is unreachable.
///
/// Only [`StoreError::Unavailable`] triggers the fallback; every other error
/// is returned unchanged. While degraded, the durable store is probed again
/// at most once per `probe_interval`.
///
/// Entering degraded mode, each write served from the fallback, and the
/// eventual recovery are all logged with `consistency_gap = true`: ids issued
/// by the fallback start at 1 in every process and can collide with or trail
/// the durable sequence, and events written during the outage are not copied
/// back.
#[derive(Debug)]
pub struct FailoverStore<D> {
    durable: D,
    fallback: VolatileEventStore,
    probe_interval: Duration,
    outage: Mutex<Option<Outage>>,
}

impl<D: EventStore> FailoverStore<D> {
    /// Creates a failover wrapper around `durable`.
    pub fn new(durable: D, fallback: VolatileEventStore, probe_interval: Duration) -> Self {
        Self {
            durable,
            fallback,
            probe_interval,
            outage: Mutex::new(None),
        }
    }

    /// Whether requests are currently served by the fallback.
    pub fn is_degraded(&self) -> bool {
        self.lock_outage().is_some()
    }

    fn lock_outage(&self) -> MutexGuard<'_, Option<Outage>> {
        self.outage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn should_probe(&self) -> bool {
        match *self.lock_outage() {
            None => true,
            Some(outage) => outage.last_probe.elapsed() >= self.probe_interval,
        }
    }

    fn record_failure(&self, operation: &'static str, error: &StoreError) {
        let now = Instant::now();
        let mut outage = self.lock_outage();
        match outage.as_mut() {
            Some(current) => current.last_probe = now,
            None => {
                tracing::warn!(
                    operation,
                    error = %error,
                    consistency_gap = true,
                    "durable event store unreachable, entering degraded mode"
                );
                *outage = Some(Outage {
                    since: now,
                    last_probe: now,
                });
            }
        }
    }

    fn record_success(&self) {
        if let Some(outage) = self.lock_outage().take() {
            tracing::warn!(
                outage_secs = outage.since.elapsed().as_secs(),
                fallback_ids_issued = self.fallback.issued_ids(),
                consistency_gap = true,
                "durable event store recovered; ids issued in degraded mode may collide with durable ids"
            );
        }
    }

    /// Runs `op` against the durable store, or the fallback when the durable
    /// store is unreachable or still inside its probe back-off.
    fn route<T>(
        &self,
        operation: &'static str,
        op: impl Fn(&dyn EventStore) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        if self.should_probe() {
            match op(&self.durable) {
                Ok(value) => {
                    self.record_success();
                    return Ok(value);
                }
                Err(e) if e.is_unavailable() => self.record_failure(operation, &e),
                Err(e) => return Err(e),
            }
        }
        tracing::debug!(operation, "serving from volatile fallback store");
        op(&self.fallback)
    }
}

impl<D: EventStore> EventStore for FailoverStore<D> {
    fn backend(&self) -> StorageBackend {
        if self.is_degraded() {
            self.fallback.backend()
        } else {
            self.durable.backend()
        }
    }

    fn append(&self, event: &NewEvent) -> Result<TelemetryEvent, StoreError> {
        let stored = self.route("append", |store| store.append(event))?;
        if self.is_degraded() {
            tracing::warn!(
                id = stored.id,
                kind = stored.kind().as_str(),
                consistency_gap = true,
                "event stored in volatile fallback only"
            );
        }
        Ok(stored)
    }

    fn range_after(
        &self,
        kind: Option<EventKind>,
        since_id: i64,
        limit: usize,
    ) -> Result<Vec<TelemetryEvent>, StoreError> {
        self.route("range_after", |store| store.range_after(kind, since_id, limit))
    }

    fn latest(
        &self,
        kind: Option<EventKind>,
        limit: usize,
    ) -> Result<Vec<TelemetryEvent>, StoreError> {
        self.route("latest", |store| store.latest(kind, limit))
    }

    fn count(&self, kind: Option<EventKind>) -> Result<usize, StoreError> {
        self.route("count", |store| store.count(kind))
    }

    fn trim(&self, kind: EventKind, capacity: usize) -> Result<usize, StoreError> {
        self.route("trim", |store| store.trim(kind, capacity))
    }
}
