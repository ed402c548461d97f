//! Event kind, payload, and record types for the telemetry stream.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Zone recorded for speed violations whose producer did not name one.
pub const UNSPECIFIED_ZONE: &str = "unspecified";

/// The two kinds of telemetry event the stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A vehicle exceeded the speed limit of a zone.
    #[serde(rename = "speedViolation")]
    SpeedViolation,
    /// A vehicle had its tyres changed.
    #[serde(rename = "tyreChange")]
    TyreChange,
}

impl EventKind {
    /// Every kind, in classification order.
    pub const ALL: [EventKind; 2] = [EventKind::SpeedViolation, EventKind::TyreChange];

    /// Returns the wire tag for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SpeedViolation => "speedViolation",
            Self::TyreChange => "tyreChange",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = ParseEventKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "speedViolation" => Ok(Self::SpeedViolation),
            "tyreChange" => Ok(Self::TyreChange),
            _ => Err(ParseEventKindError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown event kind tag.
#[derive(Debug, Clone)]
pub struct ParseEventKindError(pub String);

impl std::fmt::Display for ParseEventKindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unknown event kind: {}. Expected one of: speedViolation, tyreChange",
            self.0
        )
    }
}

impl std::error::Error for ParseEventKindError {}

/// Kind-specific fields of an event.
///
/// Serialised with the `kind` tag inline, and stored verbatim in the
/// `payload_json` column of `telemetry_events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EventPayload {
    /// A speed violation.
    #[serde(rename = "speedViolation")]
    SpeedViolation {
        /// Measured speed.
        speed: f64,
        /// How far above the limit the vehicle was.
        #[serde(rename = "excessAmount")]
        excess_amount: f64,
        /// Zone the violation happened in; [`UNSPECIFIED_ZONE`] when unknown.
        zone: String,
    },

    /// A tyre change.
    #[serde(rename = "tyreChange")]
    TyreChange {
        /// Compound fitted, e.g. `soft`.
        #[serde(rename = "tyreType")]
        tyre_type: String,
        /// Pit box the change happened in.
        #[serde(rename = "box", default, skip_serializing_if = "Option::is_none")]
        pit_box: Option<String>,
    },
}

impl EventPayload {
    /// Returns the kind this payload belongs to.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::SpeedViolation { .. } => EventKind::SpeedViolation,
            Self::TyreChange { .. } => EventKind::TyreChange,
        }
    }
}

/// A validated event that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    /// Name of the reporting vehicle.
    pub vehicle_name: String,
    /// Kind-specific fields.
    pub payload: EventPayload,
}

impl NewEvent {
    /// Returns the kind of this event.
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// A stored event. Immutable once its id is assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Position in the shared id sequence.
    pub id: i64,
    /// Name of the reporting vehicle.
    #[serde(rename = "vehicleName")]
    pub vehicle_name: String,
    /// When the store accepted the event.
    pub timestamp: DateTime<Utc>,
    /// Kind-specific fields, including the `kind` tag.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl TelemetryEvent {
    /// Returns the kind of this event.
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub(crate) fn from_new(id: i64, timestamp: DateTime<Utc>, event: &NewEvent) -> Self {
        Self {
            id,
            vehicle_name: event.vehicle_name.clone(),
            timestamp,
            payload: event.payload.clone(),
        }
    }
}

/// Current time at the precision stored in the database.
pub(crate) fn store_timestamp() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 encoding; sorts lexicographically in time order.
pub(crate) fn encode_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}
