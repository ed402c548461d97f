//! Telemetry event ingestion and incremental sync for Pitwall.
//!
//! Speed violations and tyre changes reported by the simulation client flow
//! through this crate:
//!
//! 1. [`decode`] classifies the raw JSON payload and validates it.
//! 2. [`EventStore::append`] assigns the next id from the shared sequence
//!    (see [`allocator`]) and a store timestamp, and persists the event.
//! 3. [`EventStore::trim`] keeps each kind within its retention cap.
//! 4. [`SyncReader::sync`] serves consumers polling with a watermark.
//!
//! # Event kinds
//!
//! | Kind | Shape signal | Required fields |
//! |------|--------------|-----------------|
//! | `speedViolation` | `speed` + `excessAmount` | `vehicleName`, `speed`, `excessAmount` |
//! | `tyreChange` | `tyreType` | `vehicleName`, `tyreType` |
//!
//! Both kinds draw ids from one sequence, so ids are unique across the whole
//! stream and a single watermark covers both kinds.
//!
//! # Storage
//!
//! | Store | Use |
//! |-------|-----|
//! | [`SqliteEventStore`] | Durable primary store. |
//! | [`VolatileEventStore`] | Bounded in-process ring buffer. |
//! | [`FailoverStore`] | Durable store with the volatile one as degraded-mode fallback. |
//!
//! # Usage
//!
//! ```rust,ignore
//! use pitwall_events::{decode, EventStore, SqliteEventStore, SyncReader, SyncSettings};
//!
//! let store = Arc::new(SqliteEventStore::new(lazy_pool));
//! let event = store.append(&decode(&body)?)?;
//! store.trim(event.kind(), 500)?;
//!
//! let reader = SyncReader::new(store, SyncSettings::default());
//! let page = reader.sync(None, Some(event.id - 1))?;
//! ```

pub mod allocator;
mod classify;
mod error;
mod event;
mod failover;
mod memory;
pub mod retention;
mod store;
mod sync;

pub use classify::{classify, decode};
pub use error::{ClassifyError, StoreError};
pub use event::{
    EventKind, EventPayload, NewEvent, ParseEventKindError, TelemetryEvent, UNSPECIFIED_ZONE,
};
pub use failover::FailoverStore;
pub use memory::{VolatileEventStore, DEFAULT_MEMORY_CAPACITY};
pub use store::{EventStore, SqliteEventStore, StorageBackend};
pub use sync::{next_watermark, SyncReader, SyncSettings};

#[cfg(test)]
mod tests;
