//! Unit tests for event storage, id allocation, retention, and sync.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use pitwall_db::{DbRuntimeSettings, LazyPool};
use rusqlite::Connection;
use tempfile::TempDir;

use crate::allocator::{self, FallbackCounter, SHARED_STREAM};
use crate::error::StoreError;
use crate::event::{EventKind, EventPayload, NewEvent, UNSPECIFIED_ZONE};
use crate::failover::FailoverStore;
use crate::memory::VolatileEventStore;
use crate::store::{EventStore, SqliteEventStore, StorageBackend};
use crate::sync::{next_watermark, SyncReader, SyncSettings};

fn lazy_pool(dir: &TempDir) -> LazyPool {
    let path = dir.path().join("events.db");
    LazyPool::new(path.to_str().unwrap(), DbRuntimeSettings::default())
}

fn durable_store(dir: &TempDir) -> SqliteEventStore {
    SqliteEventStore::new(lazy_pool(dir))
}

fn speed_violation(vehicle: &str, speed: f64) -> NewEvent {
    NewEvent {
        vehicle_name: vehicle.to_string(),
        payload: EventPayload::SpeedViolation {
            speed,
            excess_amount: speed - 60.0,
            zone: UNSPECIFIED_ZONE.to_string(),
        },
    }
}

fn tyre_change(vehicle: &str, tyre: &str) -> NewEvent {
    NewEvent {
        vehicle_name: vehicle.to_string(),
        payload: EventPayload::TyreChange {
            tyre_type: tyre.to_string(),
            pit_box: None,
        },
    }
}

fn ids(events: &[crate::event::TelemetryEvent]) -> Vec<i64> {
    events.iter().map(|event| event.id).collect()
}

fn migrated_connection() -> Connection {
    let conn = Connection::open_in_memory().expect("should open in-memory db");
    pitwall_db::run_migrations(&conn).expect("migrations should succeed");
    conn
}

// ── Allocator ────────────────────────────────────────────────────────

#[test]
fn next_id_starts_at_one() {
    let conn = migrated_connection();
    assert_eq!(allocator::next_id(&conn, SHARED_STREAM).unwrap(), 1);
    assert_eq!(allocator::next_id(&conn, SHARED_STREAM).unwrap(), 2);
}

#[test]
fn next_id_clears_rows_written_without_a_counter() {
    let conn = migrated_connection();
    conn.execute(
        "INSERT INTO telemetry_events (id, kind, vehicle_name, recorded_at, payload_json)
         VALUES (41, 'tyreChange', 'Car1', '2026-01-01T00:00:00.000000Z',
                 '{\"kind\":\"tyreChange\",\"tyreType\":\"soft\"}')",
        [],
    )
    .expect("should insert legacy row");

    assert_eq!(allocator::next_id(&conn, SHARED_STREAM).unwrap(), 42);
}

#[test]
fn next_id_never_moves_backwards_after_deletes() {
    let conn = migrated_connection();
    for _ in 0..5 {
        allocator::next_id(&conn, SHARED_STREAM).unwrap();
    }
    conn.execute("DELETE FROM telemetry_events", [])
        .expect("should delete");

    assert_eq!(allocator::next_id(&conn, SHARED_STREAM).unwrap(), 6);
}

#[test]
fn fallback_counter_is_seeded_at_one() {
    let counter = FallbackCounter::new();
    assert_eq!(counter.peek(), 1);
    assert_eq!(counter.next_id(), 1);
    assert_eq!(counter.next_id(), 2);
    assert_eq!(counter.peek(), 3);
}

// ── Durable store ────────────────────────────────────────────────────

#[test]
fn append_assigns_shared_ids_across_kinds() {
    let dir = TempDir::new().unwrap();
    let store = durable_store(&dir);

    let first = store.append(&speed_violation("Car1", 80.0)).unwrap();
    let second = store.append(&tyre_change("Car2", "soft")).unwrap();
    let third = store.append(&speed_violation("Car3", 95.0)).unwrap();

    assert_eq!((first.id, second.id, third.id), (1, 2, 3));
    assert_eq!(second.kind(), EventKind::TyreChange);
    assert!(first.timestamp <= second.timestamp);
    assert!(second.timestamp <= third.timestamp);
}

#[test]
fn appended_event_round_trips_through_storage() {
    let dir = TempDir::new().unwrap();
    let store = durable_store(&dir);

    let written = store
        .append(&NewEvent {
            vehicle_name: "Car7".to_string(),
            payload: EventPayload::TyreChange {
                tyre_type: "intermediate".to_string(),
                pit_box: Some("B2".to_string()),
            },
        })
        .unwrap();

    let read = store.range_after(None, 0, 10).unwrap();
    assert_eq!(read, vec![written]);
}

#[test]
fn ids_continue_after_reopening_the_database() {
    let dir = TempDir::new().unwrap();
    {
        let store = durable_store(&dir);
        store.append(&speed_violation("Car1", 80.0)).unwrap();
        store.append(&speed_violation("Car1", 81.0)).unwrap();
    }

    let reopened = durable_store(&dir);
    let next = reopened.append(&tyre_change("Car2", "hard")).unwrap();
    assert_eq!(next.id, 3);
}

#[test]
fn concurrent_writers_never_share_an_id() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(durable_store(&dir));

    let handles: Vec<_> = (0..4)
        .map(|writer| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                (0..25)
                    .map(|n| {
                        store
                            .append(&speed_violation(&format!("Car{writer}"), 70.0 + n as f64))
                            .expect("append should succeed")
                            .id
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        let ids = handle.join().expect("writer thread panicked");
        assert!(
            ids.windows(2).all(|pair| pair[0] < pair[1]),
            "ids seen by one writer must increase"
        );
        all.extend(ids);
    }

    let unique: HashSet<_> = all.iter().copied().collect();
    assert_eq!(unique.len(), 100);
    assert_eq!(all.iter().copied().max(), Some(100));
}

#[test]
fn range_after_returns_exactly_newer_events() {
    let dir = TempDir::new().unwrap();
    let store = durable_store(&dir);
    for n in 0..6 {
        store.append(&speed_violation("Car1", 70.0 + n as f64)).unwrap();
    }

    let page = store.range_after(None, 3, 100).unwrap();
    assert_eq!(ids(&page), vec![4, 5, 6]);

    let again = store.range_after(None, 3, 100).unwrap();
    assert_eq!(page, again, "repeated reads must be identical");
}

#[test]
fn range_after_filters_by_kind_and_respects_limit() {
    let dir = TempDir::new().unwrap();
    let store = durable_store(&dir);
    for n in 0..4 {
        store.append(&speed_violation("Car1", 70.0 + n as f64)).unwrap();
        store.append(&tyre_change("Car2", "soft")).unwrap();
    }

    let tyres = store.range_after(Some(EventKind::TyreChange), 0, 100).unwrap();
    assert_eq!(ids(&tyres), vec![2, 4, 6, 8]);

    let limited = store.range_after(Some(EventKind::SpeedViolation), 1, 2).unwrap();
    assert_eq!(ids(&limited), vec![3, 5]);
}

#[test]
fn latest_returns_newest_page_in_ascending_order() {
    let dir = TempDir::new().unwrap();
    let store = durable_store(&dir);
    for n in 0..8 {
        store.append(&speed_violation("Car1", 70.0 + n as f64)).unwrap();
    }

    let page = store.latest(None, 3).unwrap();
    assert_eq!(ids(&page), vec![6, 7, 8]);
}

#[test]
fn count_is_per_kind() {
    let dir = TempDir::new().unwrap();
    let store = durable_store(&dir);
    store.append(&speed_violation("Car1", 80.0)).unwrap();
    store.append(&tyre_change("Car2", "soft")).unwrap();
    store.append(&tyre_change("Car3", "wet")).unwrap();

    assert_eq!(store.count(None).unwrap(), 3);
    assert_eq!(store.count(Some(EventKind::SpeedViolation)).unwrap(), 1);
    assert_eq!(store.count(Some(EventKind::TyreChange)).unwrap(), 2);
}

// ── Retention ────────────────────────────────────────────────────────

#[test]
fn trim_keeps_the_most_recent_events() {
    let dir = TempDir::new().unwrap();
    let store = durable_store(&dir);
    for n in 0..10 {
        store.append(&speed_violation("Car1", 70.0 + n as f64)).unwrap();
    }

    let deleted = store.trim(EventKind::SpeedViolation, 4).unwrap();
    assert_eq!(deleted, 6);

    let remaining = store.range_after(None, 0, 100).unwrap();
    assert_eq!(ids(&remaining), vec![7, 8, 9, 10]);
}

#[test]
fn trim_under_capacity_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let store = durable_store(&dir);
    store.append(&speed_violation("Car1", 80.0)).unwrap();

    assert_eq!(store.trim(EventKind::SpeedViolation, 5).unwrap(), 0);
    assert_eq!(store.count(None).unwrap(), 1);
}

#[test]
fn trim_leaves_other_kinds_alone() {
    let dir = TempDir::new().unwrap();
    let store = durable_store(&dir);
    for _ in 0..3 {
        store.append(&tyre_change("Car2", "soft")).unwrap();
    }
    for n in 0..3 {
        store.append(&speed_violation("Car1", 70.0 + n as f64)).unwrap();
    }

    store.trim(EventKind::SpeedViolation, 1).unwrap();

    assert_eq!(store.count(Some(EventKind::TyreChange)).unwrap(), 3);
    assert_eq!(
        ids(&store.range_after(Some(EventKind::SpeedViolation), 0, 10).unwrap()),
        vec![6]
    );
}

#[test]
fn trim_orders_by_timestamp_before_id() {
    let conn = migrated_connection();
    // id 1 is newer than id 2; id 2 must go first.
    conn.execute_batch(
        "INSERT INTO telemetry_events (id, kind, vehicle_name, recorded_at, payload_json) VALUES
            (1, 'tyreChange', 'Car1', '2026-01-01T00:00:05.000000Z', '{\"kind\":\"tyreChange\",\"tyreType\":\"soft\"}'),
            (2, 'tyreChange', 'Car1', '2026-01-01T00:00:01.000000Z', '{\"kind\":\"tyreChange\",\"tyreType\":\"soft\"}'),
            (3, 'tyreChange', 'Car1', '2026-01-01T00:00:05.000000Z', '{\"kind\":\"tyreChange\",\"tyreType\":\"soft\"}');",
    )
    .expect("should insert rows");

    let deleted = crate::retention::trim(&conn, EventKind::TyreChange, 1).unwrap();
    assert_eq!(deleted, 2);

    let survivor: i64 = conn
        .query_row("SELECT id FROM telemetry_events", [], |row| row.get(0))
        .expect("one row should remain");
    assert_eq!(survivor, 3);
}

// ── Volatile store ───────────────────────────────────────────────────

#[test]
fn volatile_store_evicts_at_its_ceiling() {
    let store = VolatileEventStore::new(3);
    for n in 0..5 {
        store.append(&speed_violation("Car1", 70.0 + n as f64)).unwrap();
    }

    assert_eq!(store.ceiling(), 3);
    assert_eq!(store.count(None).unwrap(), 3);
    assert_eq!(ids(&store.range_after(None, 0, 10).unwrap()), vec![3, 4, 5]);
    assert_eq!(store.issued_ids(), 5);
    assert_eq!(VolatileEventStore::new(0).ceiling(), 1);
}

#[test]
fn volatile_store_matches_durable_query_semantics() {
    let store = VolatileEventStore::default();
    for n in 0..4 {
        store.append(&speed_violation("Car1", 70.0 + n as f64)).unwrap();
        store.append(&tyre_change("Car2", "soft")).unwrap();
    }

    assert_eq!(
        ids(&store.range_after(Some(EventKind::TyreChange), 2, 100).unwrap()),
        vec![4, 6, 8]
    );
    assert_eq!(ids(&store.latest(None, 3).unwrap()), vec![6, 7, 8]);

    assert_eq!(store.trim(EventKind::SpeedViolation, 1).unwrap(), 3);
    assert_eq!(
        ids(&store.range_after(Some(EventKind::SpeedViolation), 0, 100).unwrap()),
        vec![7]
    );
    assert_eq!(store.backend(), StorageBackend::Memory);
}

// ── Failover ─────────────────────────────────────────────────────────

#[test]
fn failover_serves_writes_while_durable_store_is_unreachable() {
    let dir = TempDir::new().unwrap();
    let db_dir = dir.path().join("not-yet");
    let path = db_dir.join("events.db");
    let durable = SqliteEventStore::new(LazyPool::new(
        path.to_str().unwrap(),
        DbRuntimeSettings {
            connect_timeout_ms: 100,
            ..DbRuntimeSettings::default()
        },
    ));
    let store = FailoverStore::new(durable, VolatileEventStore::new(10), Duration::ZERO);

    let degraded = store.append(&speed_violation("Car1", 80.0)).unwrap();
    assert_eq!(degraded.id, 1, "fallback ids are seeded at 1");
    assert!(store.is_degraded());
    assert_eq!(store.backend(), StorageBackend::Memory);
    assert_eq!(ids(&store.range_after(None, 0, 10).unwrap()), vec![1]);

    std::fs::create_dir_all(&db_dir).unwrap();

    let recovered = store.append(&tyre_change("Car2", "soft")).unwrap();
    assert!(!store.is_degraded());
    assert_eq!(store.backend(), StorageBackend::Sqlite);
    // The durable sequence knows nothing about the fallback's id 1.
    assert_eq!(recovered.id, 1);
}

#[test]
fn failover_respects_probe_interval() {
    let dir = TempDir::new().unwrap();
    let db_dir = dir.path().join("later");
    let durable = SqliteEventStore::new(LazyPool::new(
        db_dir.join("events.db").to_str().unwrap(),
        DbRuntimeSettings {
            connect_timeout_ms: 100,
            ..DbRuntimeSettings::default()
        },
    ));
    let store = FailoverStore::new(
        durable,
        VolatileEventStore::new(10),
        Duration::from_secs(3_600),
    );

    store.append(&speed_violation("Car1", 80.0)).unwrap();
    std::fs::create_dir_all(&db_dir).unwrap();

    // Still inside the back-off window, so the durable store is not retried.
    store.append(&speed_violation("Car1", 81.0)).unwrap();
    assert!(store.is_degraded());
    assert_eq!(store.count(None).unwrap(), 2);
}

#[test]
fn lock_contention_is_not_an_outage() {
    let busy = rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
        None,
    );
    assert!(matches!(StoreError::from(busy), StoreError::Database(_)));

    let locked = rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
        None,
    );
    assert!(!StoreError::from(locked).is_unavailable());

    let cannot_open = rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
        None,
    );
    assert!(StoreError::from(cannot_open).is_unavailable());

    let constraint = rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
        None,
    );
    assert!(!StoreError::from(constraint).is_unavailable());
}

#[test]
fn failover_surfaces_busy_writes_without_degrading() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.db");
    let settings = DbRuntimeSettings {
        busy_timeout_ms: 50,
        ..DbRuntimeSettings::default()
    };
    let store = FailoverStore::new(
        SqliteEventStore::new(LazyPool::new(path.to_str().unwrap(), settings)),
        VolatileEventStore::default(),
        Duration::ZERO,
    );
    assert_eq!(store.append(&speed_violation("Car1", 80.0)).unwrap().id, 1);

    let holder = Connection::open(&path).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE").unwrap();

    let err = store.append(&tyre_change("Car2", "soft")).unwrap_err();
    assert!(matches!(err, StoreError::Database(_)));
    assert!(!store.is_degraded());

    holder.execute_batch("COMMIT").unwrap();
    assert_eq!(store.append(&tyre_change("Car2", "soft")).unwrap().id, 2);
    assert_eq!(store.backend(), StorageBackend::Sqlite);
}

// ── Sync ─────────────────────────────────────────────────────────────

fn reader_over(store: Arc<dyn EventStore>, initial_page: usize, max_page: usize) -> SyncReader {
    SyncReader::new(
        store,
        SyncSettings {
            initial_page,
            max_page,
        },
    )
}

#[test]
fn sync_without_watermark_returns_latest_page() {
    let store: Arc<dyn EventStore> = Arc::new(VolatileEventStore::default());
    for n in 0..30 {
        store.append(&speed_violation("Car1", 70.0 + n as f64)).unwrap();
    }
    let reader = reader_over(store, 20, 100);

    let page = reader.sync(None, None).unwrap();
    assert_eq!(ids(&page), (11..=30).collect::<Vec<_>>());
    assert_eq!(reader.sync(None, Some(0)).unwrap(), page);
    assert_eq!(reader.sync(None, Some(-4)).unwrap(), page);
}

#[test]
fn sync_pages_until_caught_up() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn EventStore> = Arc::new(durable_store(&dir));
    for n in 0..25 {
        store.append(&speed_violation("Car1", 70.0 + n as f64)).unwrap();
    }
    let reader = reader_over(store, 5, 10);

    let mut watermark = 0;
    let mut seen = Vec::new();
    loop {
        let since = (watermark > 0).then_some(watermark);
        let page = reader.sync(None, since).unwrap();
        watermark = next_watermark(watermark, &page);
        seen.extend(ids(&page));
        if reader.is_caught_up(&page) {
            break;
        }
    }

    // The first poll had no watermark and returned the latest 5.
    assert_eq!(seen.first(), Some(&21));
    assert_eq!(watermark, 25);
}

#[test]
fn sync_with_watermark_walks_the_full_history() {
    let dir = TempDir::new().unwrap();
    let store: Arc<dyn EventStore> = Arc::new(durable_store(&dir));
    for n in 0..25 {
        store.append(&tyre_change(&format!("Car{n}"), "soft")).unwrap();
    }
    let reader = reader_over(store, 5, 10);

    let mut watermark = 1;
    let mut seen = vec![1];
    let mut polls = 0;
    loop {
        let page = reader.sync(Some(EventKind::TyreChange), Some(watermark)).unwrap();
        polls += 1;
        watermark = next_watermark(watermark, &page);
        seen.extend(ids(&page));
        if reader.is_caught_up(&page) {
            break;
        }
    }

    assert_eq!(seen, (1..=25).collect::<Vec<_>>());
    assert_eq!(polls, 3);
}

#[test]
fn reader_raises_empty_pages_to_one() {
    let reader = reader_over(Arc::new(VolatileEventStore::default()), 0, 0);
    assert_eq!(
        reader.settings(),
        SyncSettings {
            initial_page: 1,
            max_page: 1,
        }
    );
}

#[test]
fn recent_is_newest_first_and_clamped() {
    let store: Arc<dyn EventStore> = Arc::new(VolatileEventStore::default());
    for n in 0..5 {
        store.append(&speed_violation("Car1", 70.0 + n as f64)).unwrap();
    }
    let reader = reader_over(store, 20, 3);

    assert_eq!(ids(&reader.recent(2).unwrap()), vec![5, 4]);
    assert_eq!(ids(&reader.recent(50).unwrap()), vec![5, 4, 3]);
    assert_eq!(ids(&reader.recent(0).unwrap()), vec![5]);
}

// ── Serialization ────────────────────────────────────────────────────

#[test]
fn events_serialize_with_wire_field_names() {
    let store = VolatileEventStore::default();
    let event = store.append(&speed_violation("Car1", 80.0)).unwrap();

    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["id"], 1);
    assert_eq!(json["kind"], "speedViolation");
    assert_eq!(json["vehicleName"], "Car1");
    assert_eq!(json["speed"].as_f64(), Some(80.0));
    assert_eq!(json["excessAmount"].as_f64(), Some(20.0));
    assert_eq!(json["zone"], UNSPECIFIED_ZONE);

    let timestamp = json["timestamp"].as_str().expect("timestamp is a string");
    assert!(timestamp.ends_with('Z'));
    assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
}

#[test]
fn tyre_change_omits_absent_box() {
    let store = VolatileEventStore::default();
    let event = store.append(&tyre_change("Car2", "soft")).unwrap();

    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["kind"], "tyreChange");
    assert_eq!(json["tyreType"], "soft");
    assert!(json.get("box").is_none());
}
