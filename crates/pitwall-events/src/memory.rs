//! Volatile, process-local event store.
//!
//! A ring buffer with a hard ceiling: once full, every append evicts the
//! oldest event regardless of kind. Ids come from a [`FallbackCounter`], so
//! this store is only ever correct for a single process and is meant for
//! degraded operation and local development, never as the primary store of a
//! deployment.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::allocator::FallbackCounter;
use crate::error::StoreError;
use crate::event::{store_timestamp, EventKind, NewEvent, TelemetryEvent};
use crate::retention;
use crate::store::{EventStore, StorageBackend};

/// Default hard ceiling on buffered events.
pub const DEFAULT_MEMORY_CAPACITY: usize = 1_000;

/// In-memory [`EventStore`].
#[derive(Debug)]
pub struct VolatileEventStore {
    events: Mutex<VecDeque<TelemetryEvent>>,
    ids: FallbackCounter,
    ceiling: usize,
}

impl VolatileEventStore {
    /// Creates an empty store that never holds more than `ceiling` events.
    pub fn new(ceiling: usize) -> Self {
        let ceiling = ceiling.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(ceiling.min(DEFAULT_MEMORY_CAPACITY))),
            ids: FallbackCounter::new(),
            ceiling,
        }
    }

    /// The hard ceiling on buffered events.
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// How many ids this store has handed out so far.
    pub fn issued_ids(&self) -> i64 {
        self.ids.peek() - 1
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<TelemetryEvent>> {
        // Every mutation leaves the buffer consistent, so a poisoned lock is safe to reuse.
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn matching(
        events: &VecDeque<TelemetryEvent>,
        kind: Option<EventKind>,
    ) -> impl Iterator<Item = &TelemetryEvent> {
        events
            .iter()
            .filter(move |event| kind.map_or(true, |kind| event.kind() == kind))
    }
}

impl Default for VolatileEventStore {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}

impl EventStore for VolatileEventStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Memory
    }

    fn append(&self, event: &NewEvent) -> Result<TelemetryEvent, StoreError> {
        let mut events = self.lock();
        // Id and timestamp are taken under the lock so buffer order is id order.
        let stored = TelemetryEvent::from_new(self.ids.next_id(), store_timestamp(), event);
        events.push_back(stored.clone());
        while events.len() > self.ceiling {
            if let Some(evicted) = events.pop_front() {
                tracing::debug!(id = evicted.id, "volatile store full, evicted oldest event");
            }
        }
        Ok(stored)
    }

    fn range_after(
        &self,
        kind: Option<EventKind>,
        since_id: i64,
        limit: usize,
    ) -> Result<Vec<TelemetryEvent>, StoreError> {
        let events = self.lock();
        let mut page: Vec<_> = Self::matching(&events, kind)
            .filter(|event| event.id > since_id)
            .cloned()
            .collect();
        page.sort_by_key(|event| event.id);
        page.truncate(limit);
        if kind.is_none() {
            page.sort_by_key(|event| (event.timestamp, event.id));
        }
        Ok(page)
    }

    fn latest(
        &self,
        kind: Option<EventKind>,
        limit: usize,
    ) -> Result<Vec<TelemetryEvent>, StoreError> {
        let events = self.lock();
        let mut page: Vec<_> = Self::matching(&events, kind).cloned().collect();
        page.sort_by_key(|event| std::cmp::Reverse((event.timestamp, event.id)));
        page.truncate(limit);
        page.reverse();
        Ok(page)
    }

    fn count(&self, kind: Option<EventKind>) -> Result<usize, StoreError> {
        Ok(Self::matching(&self.lock(), kind).count())
    }

    fn trim(&self, kind: EventKind, capacity: usize) -> Result<usize, StoreError> {
        Ok(retention::trim_buffer(&mut self.lock(), kind, capacity))
    }
}
