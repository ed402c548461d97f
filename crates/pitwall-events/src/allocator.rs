//! Identity allocation for event streams.
//!
//! The durable allocator keeps one counter row per stream in `id_sequences`
//! and advances it with a single upsert statement, so two writers can never
//! observe the same value. Both event kinds draw from [`SHARED_STREAM`].
//!
//! [`FallbackCounter`] serves the volatile store. It starts at 1 in every
//! process and knows nothing about ids already persisted, so ids it hands out
//! while the durable store is unreachable can collide with or trail durable
//! ids once the store comes back.

use std::sync::atomic::{AtomicI64, Ordering};

use rusqlite::{params, Connection};

use crate::error::StoreError;

/// The id sequence shared by speed violations and tyre changes.
pub const SHARED_STREAM: &str = "telemetry";

/// Returns the next id for `stream`.
///
/// The result is strictly greater than every id this counter has issued and
/// every id present in `telemetry_events`, including after a restart or a
/// database restored from a backup without its counter row. Call inside the
/// transaction that inserts the event so an aborted insert also rolls the
/// counter back.
///
/// # Errors
///
/// Returns `StoreError` on SQL failure.
pub fn next_id(conn: &Connection, stream: &str) -> Result<i64, StoreError> {
    let id = conn.query_row(
        "INSERT INTO id_sequences (stream, last_id)
         VALUES (?1, (SELECT COALESCE(MAX(id), 0) + 1 FROM telemetry_events))
         ON CONFLICT (stream) DO UPDATE
            SET last_id = MAX(id_sequences.last_id + 1, excluded.last_id)
         RETURNING last_id",
        params![stream],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// In-process id counter for degraded mode. Seeded at 1.
#[derive(Debug)]
pub struct FallbackCounter {
    next: AtomicI64,
}

impl FallbackCounter {
    /// Creates a counter whose first id is 1.
    pub fn new() -> Self {
        Self {
            next: AtomicI64::new(1),
        }
    }

    /// Hands out the next id.
    pub fn next_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// The id the next call to [`FallbackCounter::next_id`] will return.
    pub fn peek(&self) -> i64 {
        self.next.load(Ordering::SeqCst)
    }
}

impl Default for FallbackCounter {
    fn default() -> Self {
        Self::new()
    }
}
