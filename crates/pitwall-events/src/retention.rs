//! Retention trimming: keep only the newest `capacity` events of a kind.
//!
//! Oldest means earliest `timestamp`, with the lower id going first on ties.

use std::collections::{HashSet, VecDeque};

use rusqlite::{params, Connection, Transaction, TransactionBehavior};

use crate::error::StoreError;
use crate::event::{EventKind, TelemetryEvent};

/// Deletes the oldest events of `kind` beyond `capacity` in one transaction.
///
/// Returns the number of events deleted.
///
/// # Errors
///
/// Returns `StoreError` on SQL failure; nothing is deleted in that case.
pub fn trim(conn: &Connection, kind: EventKind, capacity: usize) -> Result<usize, StoreError> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM telemetry_events WHERE kind = ?1",
        params![kind.as_str()],
        |row| row.get(0),
    )?;
    let capacity = i64::try_from(capacity).unwrap_or(i64::MAX);
    let excess = count - capacity;
    if excess <= 0 {
        return Ok(0);
    }

    let deleted = tx.execute(
        "DELETE FROM telemetry_events
         WHERE id IN (
            SELECT id FROM telemetry_events
            WHERE kind = ?1
            ORDER BY recorded_at ASC, id ASC
            LIMIT ?2
         )",
        params![kind.as_str(), excess],
    )?;
    tx.commit()?;

    tracing::debug!(kind = kind.as_str(), deleted, "trimmed event stream");
    Ok(deleted)
}

/// In-memory counterpart of [`trim`] for the volatile store.
pub(crate) fn trim_buffer(
    events: &mut VecDeque<TelemetryEvent>,
    kind: EventKind,
    capacity: usize,
) -> usize {
    let mut candidates: Vec<_> = events
        .iter()
        .filter(|event| event.kind() == kind)
        .map(|event| (event.timestamp, event.id))
        .collect();
    if candidates.len() <= capacity {
        return 0;
    }

    candidates.sort_unstable();
    let excess = candidates.len() - capacity;
    let doomed: HashSet<i64> = candidates
        .into_iter()
        .take(excess)
        .map(|(_, id)| id)
        .collect();

    events.retain(|event| !doomed.contains(&event.id));
    doomed.len()
}
