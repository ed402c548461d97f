//! The event store interface and its durable SQLite implementation.
//!
//! All writes go through [`EventStore::append`], which assigns the store
//! timestamp and an id from the allocator and persists the event. Reads are
//! id-range queries ([`EventStore::range_after`]) and newest-page queries
//! ([`EventStore::latest`]).
//!
//! Store methods are blocking. Async callers run them on
//! `tokio::task::spawn_blocking`.

use pitwall_db::{DbConnection, LazyPool};
use rusqlite::{params, Connection, Params, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::allocator::{self, SHARED_STREAM};
use crate::error::StoreError;
use crate::event::{
    decode_timestamp, encode_timestamp, store_timestamp, EventKind, EventPayload, NewEvent,
    TelemetryEvent,
};
use crate::retention;

/// Which kind of storage is answering requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Durable SQLite database.
    #[default]
    Sqlite,
    /// Volatile, process-local ring buffer.
    Memory,
}

impl StorageBackend {
    /// Returns the canonical label for this backend.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
        }
    }
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown storage backend: {other}")),
        }
    }
}

/// Append-only, id-ordered storage for telemetry events.
///
/// A `kind` of `None` addresses both kinds merged.
pub trait EventStore: Send + Sync {
    /// The backend currently serving requests.
    fn backend(&self) -> StorageBackend;

    /// Stores `event`, returning it with its assigned id and timestamp.
    fn append(&self, event: &NewEvent) -> Result<TelemetryEvent, StoreError>;

    /// Up to `limit` events with `id > since_id`, lowest ids first.
    ///
    /// With no kind filter the page is chosen by id and then ordered by
    /// timestamp, id breaking ties.
    fn range_after(
        &self,
        kind: Option<EventKind>,
        since_id: i64,
        limit: usize,
    ) -> Result<Vec<TelemetryEvent>, StoreError>;

    /// The newest `limit` events by timestamp, returned oldest first.
    fn latest(
        &self,
        kind: Option<EventKind>,
        limit: usize,
    ) -> Result<Vec<TelemetryEvent>, StoreError>;

    /// Number of stored events.
    fn count(&self, kind: Option<EventKind>) -> Result<usize, StoreError>;

    /// Deletes the oldest events of `kind` beyond `capacity`; returns how many.
    fn trim(&self, kind: EventKind, capacity: usize) -> Result<usize, StoreError>;
}

/// Durable event store backed by SQLite.
///
/// The connection pool is built on first use. Whenever an operation finds
/// the database unreachable the pool is discarded and rebuilt by the next
/// call.
#[derive(Debug)]
pub struct SqliteEventStore {
    db: LazyPool,
    stream: &'static str,
}

impl SqliteEventStore {
    /// Creates a store over `db`. Nothing is opened until the first call.
    pub fn new(db: LazyPool) -> Self {
        Self {
            db,
            stream: SHARED_STREAM,
        }
    }

    /// Runs `op` on a pooled connection, discarding the pool if the database
    /// turns out to be unreachable.
    fn with_conn<T>(
        &self,
        op: impl FnOnce(&DbConnection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let result = self
            .db
            .get()
            .map_err(StoreError::from)
            .and_then(|conn| op(&conn));
        if let Err(ref e) = result {
            if e.is_unavailable() {
                tracing::warn!(path = self.db.path(), error = %e, "durable event store unreachable");
                self.db.invalidate();
            }
        }
        result
    }
}

impl EventStore for SqliteEventStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Sqlite
    }

    fn append(&self, event: &NewEvent) -> Result<TelemetryEvent, StoreError> {
        self.with_conn(|conn| insert_event(conn, self.stream, event))
    }

    fn range_after(
        &self,
        kind: Option<EventKind>,
        since_id: i64,
        limit: usize,
    ) -> Result<Vec<TelemetryEvent>, StoreError> {
        let limit = sql_limit(limit);
        self.with_conn(|conn| match kind {
            Some(kind) => fetch_events(
                conn,
                "SELECT id, vehicle_name, recorded_at, payload_json
                 FROM telemetry_events
                 WHERE kind = ?1 AND id > ?2
                 ORDER BY id ASC
                 LIMIT ?3",
                params![kind.as_str(), since_id, limit],
            ),
            None => {
                let mut events = fetch_events(
                    conn,
                    "SELECT id, vehicle_name, recorded_at, payload_json
                     FROM telemetry_events
                     WHERE id > ?1
                     ORDER BY id ASC
                     LIMIT ?2",
                    params![since_id, limit],
                )?;
                events.sort_by(|a, b| (a.timestamp, a.id).cmp(&(b.timestamp, b.id)));
                Ok(events)
            }
        })
    }

    fn latest(
        &self,
        kind: Option<EventKind>,
        limit: usize,
    ) -> Result<Vec<TelemetryEvent>, StoreError> {
        let limit = sql_limit(limit);
        let mut events = self.with_conn(|conn| match kind {
            Some(kind) => fetch_events(
                conn,
                "SELECT id, vehicle_name, recorded_at, payload_json
                 FROM telemetry_events
                 WHERE kind = ?1
                 ORDER BY recorded_at DESC, id DESC
                 LIMIT ?2",
                params![kind.as_str(), limit],
            ),
            None => fetch_events(
                conn,
                "SELECT id, vehicle_name, recorded_at, payload_json
                 FROM telemetry_events
                 ORDER BY recorded_at DESC, id DESC
                 LIMIT ?1",
                params![limit],
            ),
        })?;
        events.reverse();
        Ok(events)
    }

    fn count(&self, kind: Option<EventKind>) -> Result<usize, StoreError> {
        let count: i64 = self.with_conn(|conn| {
            let count = match kind {
                Some(kind) => conn.query_row(
                    "SELECT COUNT(*) FROM telemetry_events WHERE kind = ?1",
                    params![kind.as_str()],
                    |row| row.get(0),
                )?,
                None => conn.query_row("SELECT COUNT(*) FROM telemetry_events", [], |row| {
                    row.get(0)
                })?,
            };
            Ok(count)
        })?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn trim(&self, kind: EventKind, capacity: usize) -> Result<usize, StoreError> {
        self.with_conn(|conn| retention::trim(conn, kind, capacity))
    }
}

/// Allocates an id and inserts `event` in one immediate transaction.
///
/// The timestamp is taken after the write lock is held, so timestamp order
/// follows id order for every writer sharing the database.
fn insert_event(
    conn: &Connection,
    stream: &str,
    event: &NewEvent,
) -> Result<TelemetryEvent, StoreError> {
    let payload_json = serde_json::to_string(&event.payload)?;

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let id = allocator::next_id(&tx, stream)?;
    let timestamp = store_timestamp();

    tx.execute(
        "INSERT INTO telemetry_events (id, kind, vehicle_name, recorded_at, payload_json)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            id,
            event.kind().as_str(),
            event.vehicle_name,
            encode_timestamp(&timestamp),
            payload_json,
        ],
    )?;
    tx.commit()?;

    Ok(TelemetryEvent::from_new(id, timestamp, event))
}

fn fetch_events<P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<TelemetryEvent>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut events = Vec::new();
    for row in rows {
        let (id, vehicle_name, recorded_at, payload_json) = row?;
        let timestamp = decode_timestamp(&recorded_at).ok_or_else(|| {
            StoreError::Corrupt(format!("event {id} has unreadable timestamp {recorded_at:?}"))
        })?;
        let payload: EventPayload = serde_json::from_str(&payload_json)?;
        events.push(TelemetryEvent {
            id,
            vehicle_name,
            timestamp,
            payload,
        });
    }

    Ok(events)
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
