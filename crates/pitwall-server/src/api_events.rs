//! Telemetry event API handlers.
//!
//! Provides:
//! - `POST /api/events`: classify, store, and trim one event
//! - `GET /api/events`: watermark sync, optionally filtered by kind
//! - `GET /api/events/recent`: newest events across both kinds

use crate::api::ApiError;
use crate::retention::trim_after_write;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, QueryRejection},
        Extension, Query,
    },
    response::{IntoResponse, Response},
    Json,
};
use pitwall_events::{decode, next_watermark, EventKind, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Response header carrying the watermark to send on the next poll.
pub const NEXT_SINCE_HEADER: &str = "x-next-since";

/// Response body for a stored event.
#[derive(Debug, Serialize, Deserialize)]
pub struct WriteResponse {
    pub success: bool,
    /// The id assigned to the event.
    pub id: i64,
}

/// Query parameters for `GET /api/events`.
#[derive(Debug, Deserialize)]
pub struct SyncQuery {
    /// Highest id already seen; absent or `0` requests the initial page.
    pub since: Option<String>,
    /// Restrict results to `speedViolation` or `tyreChange`.
    #[serde(rename = "kindFilter", alias = "kind")]
    pub kind_filter: Option<String>,
}

/// Query parameters for `GET /api/events/recent`.
#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<String>,
}

fn parse_since(raw: Option<&str>) -> Result<Option<i64>, ApiError> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("invalid since: {value}"))),
    }
}

fn parse_kind(raw: Option<&str>) -> Result<Option<EventKind>, ApiError> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|e: pitwall_events::ParseEventKindError| ApiError::BadRequest(e.to_string())),
    }
}

/// Handler for `POST /api/events`.
///
/// The body is read raw so malformed JSON, and a body over the size limit,
/// get the same `{"error": ...}` response shape as an unrecognized payload.
/// Retention runs after the append in the same blocking task; a failed trim
/// does not fail the write.
pub async fn write_event_handler(
    Extension(state): Extension<Arc<AppState>>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<WriteResponse>, ApiError> {
    let body = body?;
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))?;

    let event = decode(&payload).map_err(|e| {
        tracing::debug!(error = %e, "rejected telemetry payload");
        ApiError::BadRequest(e.to_string())
    })?;

    let environment = state.environment;
    let stored = tokio::task::spawn_blocking(move || {
        let stored = state.store.append(&event)?;
        trim_after_write(state.store.as_ref(), stored.kind(), state.retention_capacity);
        Ok::<_, StoreError>(stored)
    })
    .await
    .map_err(|e| ApiError::internal(environment, "task join error", e))?
    .map_err(|e| ApiError::internal(environment, "failed to store event", e))?;

    tracing::info!(
        id = stored.id,
        kind = stored.kind().as_str(),
        vehicle = %stored.vehicle_name,
        "telemetry event stored"
    );

    Ok(Json(WriteResponse {
        success: true,
        id: stored.id,
    }))
}

/// Handler for `GET /api/events`.
///
/// Returns a JSON array of events and sets [`NEXT_SINCE_HEADER`] to the
/// highest id the client has now seen.
pub async fn sync_events_handler(
    Extension(state): Extension<Arc<AppState>>,
    params: Result<Query<SyncQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = params?;
    let since = parse_since(params.since.as_deref())?;
    let kind = parse_kind(params.kind_filter.as_deref())?;

    let environment = state.environment;
    let events = tokio::task::spawn_blocking(move || state.reader.sync(kind, since))
        .await
        .map_err(|e| ApiError::internal(environment, "task join error", e))?
        .map_err(|e| ApiError::internal(environment, "failed to read events", e))?;

    let watermark = next_watermark(since.unwrap_or(0).max(0), &events);
    Ok(([(NEXT_SINCE_HEADER, watermark.to_string())], Json(events)).into_response())
}

/// Handler for `GET /api/events/recent`.
///
/// Newest first. Without a `limit` this returns one initial sync page;
/// `limit` is clamped to the sync page maximum.
pub async fn recent_events_handler(
    Extension(state): Extension<Arc<AppState>>,
    params: Result<Query<RecentQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = params?;
    let limit = match params.limit.as_deref().map(str::trim) {
        None | Some("") => state.reader.settings().initial_page,
        Some(value) => value
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("invalid limit: {value}")))?,
    };

    let environment = state.environment;
    let events = tokio::task::spawn_blocking(move || state.reader.recent(limit))
        .await
        .map_err(|e| ApiError::internal(environment, "task join error", e))?
        .map_err(|e| ApiError::internal(environment, "failed to read events", e))?;

    Ok(Json(events).into_response())
}
