//! Watermark-based incremental sync.
//!
//! A consumer starts without a watermark and receives the most recent page.
//! From then on it passes the highest id it has seen as `since` and receives
//! every newer event, a bounded page at a time. A page shorter than the
//! maximum means the consumer has caught up.

use std::sync::Arc;

use crate::error::StoreError;
use crate::event::{EventKind, TelemetryEvent};
use crate::store::EventStore;

/// Page sizes for sync reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Events returned to a consumer without a watermark.
    pub initial_page: usize,
    /// Upper bound on events returned per poll.
    pub max_page: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            initial_page: 20,
            max_page: 100,
        }
    }
}

/// Answers sync polls against an [`EventStore`].
#[derive(Clone)]
pub struct SyncReader {
    store: Arc<dyn EventStore>,
    settings: SyncSettings,
}

impl SyncReader {
    /// Creates a reader. Page sizes below one are raised to one.
    pub fn new(store: Arc<dyn EventStore>, settings: SyncSettings) -> Self {
        let settings = SyncSettings {
            initial_page: settings.initial_page.max(1),
            max_page: settings.max_page.max(1),
        };
        Self { store, settings }
    }

    /// The page sizes in effect.
    pub fn settings(&self) -> SyncSettings {
        self.settings
    }

    /// Returns the events a consumer holding watermark `since` has not seen.
    ///
    /// - `since` absent, zero, or negative: the newest `initial_page` events,
    ///   oldest first.
    /// - `since > 0`: up to `max_page` events with `id > since`, ascending.
    ///
    /// # Errors
    ///
    /// Propagates `StoreError` from the underlying store.
    pub fn sync(
        &self,
        kind: Option<EventKind>,
        since: Option<i64>,
    ) -> Result<Vec<TelemetryEvent>, StoreError> {
        match since.filter(|watermark| *watermark > 0) {
            None => self.store.latest(kind, self.settings.initial_page),
            Some(watermark) => self
                .store
                .range_after(kind, watermark, self.settings.max_page),
        }
    }

    /// The newest `limit` events across both kinds, newest first.
    ///
    /// `limit` is clamped to `1..=max_page`.
    ///
    /// # Errors
    ///
    /// Propagates `StoreError` from the underlying store.
    pub fn recent(&self, limit: usize) -> Result<Vec<TelemetryEvent>, StoreError> {
        let limit = limit.clamp(1, self.settings.max_page);
        let mut events = self.store.latest(None, limit)?;
        events.reverse();
        Ok(events)
    }

    /// Whether `page`, returned by a watermark poll, means the consumer is
    /// caught up.
    pub fn is_caught_up(&self, page: &[TelemetryEvent]) -> bool {
        page.len() < self.settings.max_page
    }
}

/// The watermark a consumer should send next after receiving `page`.
pub fn next_watermark(current: i64, page: &[TelemetryEvent]) -> i64 {
    page.iter().map(|event| event.id).fold(current, i64::max)
}
