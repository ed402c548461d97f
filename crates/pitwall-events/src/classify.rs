//! Inbound payload classification and validation.
//!
//! Classification and validation are separate steps. [`classify`] only looks
//! at which shape-signalling fields are present, testing the shapes in a fixed
//! order, so the outcome never depends on the order fields appear in the JSON
//! object. [`decode`] then validates the fields that shape requires.
//!
//! Shapes, in order:
//!
//! | Order | Signal | Kind |
//! |-------|--------|------|
//! | 1 | `speed` and `excessAmount` (or `excess`) both non-null | `speedViolation` |
//! | 2 | `tyreType` non-null | `tyreChange` |
//!
//! A payload carrying both signals is a speed violation.

use serde_json::{Map, Value};

use crate::error::ClassifyError;
use crate::event::{EventKind, EventPayload, NewEvent, UNSPECIFIED_ZONE};

type Object = Map<String, Value>;

/// Shape predicates in evaluation order.
const SHAPES: &[(EventKind, fn(&Object) -> bool)] = &[
    (EventKind::SpeedViolation, is_speed_violation),
    (EventKind::TyreChange, is_tyre_change),
];

fn present(obj: &Object, key: &str) -> bool {
    obj.get(key).is_some_and(|value| !value.is_null())
}

/// Producers send the excess either as `excessAmount` or as `excess`.
fn excess_field(obj: &Object) -> Option<&Value> {
    ["excessAmount", "excess"]
        .into_iter()
        .filter_map(|key| obj.get(key))
        .find(|value| !value.is_null())
}

fn is_speed_violation(obj: &Object) -> bool {
    present(obj, "speed") && excess_field(obj).is_some()
}

fn is_tyre_change(obj: &Object) -> bool {
    present(obj, "tyreType")
}

/// Decides which kind of event `payload` represents.
///
/// # Errors
///
/// Returns `ClassifyError::Unrecognized` if `payload` is not an object or
/// matches no known shape.
pub fn classify(payload: &Value) -> Result<EventKind, ClassifyError> {
    let obj = payload.as_object().ok_or(ClassifyError::Unrecognized)?;
    SHAPES
        .iter()
        .find(|(_, matches)| matches(obj))
        .map(|(kind, _)| *kind)
        .ok_or(ClassifyError::Unrecognized)
}

/// Classifies `payload` and validates the fields its kind requires.
///
/// # Errors
///
/// - `ClassifyError::Unrecognized` if no shape matches.
/// - `ClassifyError::MissingFields` if a required field is absent or empty.
/// - `ClassifyError::InvalidField` if a field has the wrong type or a
///   non-positive measurement.
pub fn decode(payload: &Value) -> Result<NewEvent, ClassifyError> {
    let kind = classify(payload)?;
    let obj = payload.as_object().ok_or(ClassifyError::Unrecognized)?;

    let vehicle_name = required_string(obj, "vehicleName", kind)?;

    let payload = match kind {
        EventKind::SpeedViolation => EventPayload::SpeedViolation {
            speed: positive_number(obj.get("speed"), "speed", kind)?,
            excess_amount: positive_number(excess_field(obj), "excessAmount", kind)?,
            zone: optional_string(obj, "zone")?.unwrap_or_else(|| UNSPECIFIED_ZONE.to_string()),
        },
        EventKind::TyreChange => {
            let pit_box = match optional_string(obj, "box")? {
                Some(pit_box) => Some(pit_box),
                None => optional_string(obj, "zone")?,
            };
            EventPayload::TyreChange {
                tyre_type: required_string(obj, "tyreType", kind)?,
                pit_box,
            }
        }
    };

    Ok(NewEvent {
        vehicle_name,
        payload,
    })
}

fn required_string(
    obj: &Object,
    field: &'static str,
    kind: EventKind,
) -> Result<String, ClassifyError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(ClassifyError::MissingFields(kind)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(ClassifyError::MissingFields(kind)),
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(_) => Err(ClassifyError::InvalidField {
            field,
            reason: "expected a string".to_string(),
        }),
    }
}

fn optional_string(obj: &Object, field: &'static str) -> Result<Option<String>, ClassifyError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(ClassifyError::InvalidField {
            field,
            reason: "expected a string".to_string(),
        }),
    }
}

fn positive_number(
    value: Option<&Value>,
    field: &'static str,
    kind: EventKind,
) -> Result<f64, ClassifyError> {
    let value = match value {
        None | Some(Value::Null) => return Err(ClassifyError::MissingFields(kind)),
        Some(value) => value,
    };
    let number = value.as_f64().ok_or_else(|| ClassifyError::InvalidField {
        field,
        reason: "expected a number".to_string(),
    })?;
    if !number.is_finite() || number <= 0.0 {
        return Err(ClassifyError::InvalidField {
            field,
            reason: format!("must be greater than zero, got {number}"),
        });
    }
    Ok(number)
}
