//! Structural validation of decoded values against the registered schemas.
//!
//! Pure and synchronous. The version tag is read before anything else so an
//! unknown generation fails fast with its own error, distinct from a known
//! generation carrying a malformed payload.

use ciborium::value::Value;

use crate::envelope::{Envelope, Payload, SchemaRegistry};
use crate::types::{Primitive, Row, ValidationError};

type Validated<T> = std::result::Result<T, ValidationError>;

/// Keys of the version 1 payload union, in discrimination order.
const V1_KEYS: &[&str] = &["vehicles", "simpleStops", "stopIds", "route", "stopTrips"];

/// Validate a decoded value as an envelope of any registered version.
pub fn validate(registry: &SchemaRegistry, value: &Value) -> Validated<Envelope> {
    let entries = value
        .as_map()
        .ok_or_else(|| ValidationError::shape("$", "map", describe(value)))?;

    let version = match field(entries, "v") {
        None => return Err(ValidationError::MissingVersion),
        Some(Value::Integer(i)) => i128::from(*i),
        Some(other) => return Err(ValidationError::shape("v", "integer", describe(other))),
    };
    let validator = u64::try_from(version)
        .ok()
        .and_then(|v| registry.validator(v).map(|f| (v, f)));
    let Some((version, validate_payload)) = validator else {
        return Err(ValidationError::UnsupportedVersion { version });
    };

    let timestamp = match field(entries, "ts") {
        None => None,
        Some(v) => Some(number(v, "ts")?),
    };

    let data = field(entries, "d").ok_or_else(|| ValidationError::shape("d", "payload", "nothing"))?;
    let data = validate_payload(data, "d")?;

    Ok(Envelope {
        version,
        timestamp,
        data,
    })
}

/// Payload validator for protocol generation 1.
///
/// Accepts the current union (`vehicles`, `simpleStops`, `stopIds`+`route`,
/// `stopTrips`) plus the shapes earlier producers emitted under the same tag:
/// numeric ids inside vehicle tuples and a bare number meaning "no update".
pub fn validate_v1_payload(value: &Value, path: &str) -> Validated<Payload> {
    if let Some(n) = as_number(value) {
        return Ok(Payload::NoUpdate(n));
    }

    let entries = value
        .as_map()
        .ok_or_else(|| ValidationError::shape(path, "payload map or number", describe(value)))?;

    let present: Vec<&str> = V1_KEYS
        .iter()
        .copied()
        .filter(|k| field(entries, k).is_some())
        .collect();

    // stopIds and route together form a single union member
    let mut members: Vec<String> = Vec::new();
    for key in &present {
        match *key {
            "stopIds" | "route" => {
                if !members.iter().any(|m| m == "stopIds+route") {
                    members.push("stopIds+route".into());
                }
            }
            other => members.push(other.to_string()),
        }
    }

    match members.len() {
        0 => {
            return Err(ValidationError::shape(
                path,
                "one of vehicles, simpleStops, stopIds+route, stopTrips",
                "no recognized key",
            ))
        }
        1 => {}
        _ => {
            return Err(ValidationError::MultiplePayloads {
                path: path.to_string(),
                keys: members,
            })
        }
    }

    match members[0].as_str() {
        "vehicles" => {
            let p = child(path, "vehicles");
            rows(field(entries, "vehicles"), &p).map(Payload::Vehicles)
        }
        "simpleStops" => {
            let p = child(path, "simpleStops");
            rows(field(entries, "simpleStops"), &p).map(Payload::SimpleStops)
        }
        "stopTrips" => {
            let p = child(path, "stopTrips");
            texts(field(entries, "stopTrips"), &p).map(Payload::StopTrips)
        }
        _ => {
            let ids_path = child(path, "stopIds");
            let route_path = child(path, "route");
            let (Some(ids), Some(route)) = (field(entries, "stopIds"), field(entries, "route"))
            else {
                let missing = if present.contains(&"stopIds") { &route_path } else { &ids_path };
                return Err(ValidationError::shape(missing, "array", "nothing"));
            };
            Ok(Payload::Route {
                stop_ids: texts(Some(ids), &ids_path)?,
                route: points(route, &route_path)?,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Shape helpers
// ---------------------------------------------------------------------------

fn field<'a>(entries: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    entries
        .iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .map(|(_, v)| v)
}

fn child(path: &str, key: &str) -> String {
    format!("{path}.{key}")
}

fn index(path: &str, i: usize) -> String {
    format!("{path}[{i}]")
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(i128::from(*i) as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn number(value: &Value, path: &str) -> Validated<f64> {
    as_number(value).ok_or_else(|| ValidationError::shape(path, "number", describe(value)))
}

fn array<'a>(value: Option<&'a Value>, path: &str) -> Validated<&'a Vec<Value>> {
    match value {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(ValidationError::shape(path, "array", describe(other))),
        None => Err(ValidationError::shape(path, "array", "nothing")),
    }
}

fn primitive(value: &Value, path: &str) -> Validated<Primitive> {
    match value {
        Value::Text(s) => Ok(Primitive::Text(s.clone())),
        Value::Float(f) => Ok(Primitive::Float(*f)),
        Value::Integer(i) => i64::try_from(i128::from(*i))
            .map(Primitive::Int)
            .map_err(|_| ValidationError::shape(path, "64-bit integer", "out of range integer")),
        other => Err(ValidationError::shape(path, "text or number", describe(other))),
    }
}

/// Array of compact tuples. Arity is the codec's concern, not checked here.
fn rows(value: Option<&Value>, path: &str) -> Validated<Vec<Row>> {
    array(value, path)?
        .iter()
        .enumerate()
        .map(|(i, row)| -> Validated<Row> {
            let row_path = index(path, i);
            array(Some(row), &row_path)?
                .iter()
                .enumerate()
                .map(|(j, v)| primitive(v, &index(&row_path, j)))
                .collect()
        })
        .collect()
}

fn texts(value: Option<&Value>, path: &str) -> Validated<Vec<String>> {
    array(value, path)?
        .iter()
        .enumerate()
        .map(|(i, v)| match v {
            Value::Text(s) => Ok(s.clone()),
            other => Err(ValidationError::shape(&index(path, i), "text", describe(other))),
        })
        .collect()
}

fn points(value: &Value, path: &str) -> Validated<Vec<[f64; 2]>> {
    array(Some(value), path)?
        .iter()
        .enumerate()
        .map(|(i, v)| -> Validated<[f64; 2]> {
            let point_path = index(path, i);
            match array(Some(v), &point_path)?.as_slice() {
                [lat, lng] => Ok([
                    number(lat, &index(&point_path, 0))?,
                    number(lng, &index(&point_path, 1))?,
                ]),
                other => Err(ValidationError::shape(
                    &point_path,
                    "[lat, lng] pair",
                    format!("array of {}", other.len()),
                )),
            }
        })
        .collect()
}

/// Human-readable name of a value's type for diagnostics.
fn describe(value: &Value) -> String {
    match value {
        Value::Integer(_) => "integer".into(),
        Value::Float(_) => "float".into(),
        Value::Text(_) => "text".into(),
        Value::Bytes(_) => "bytes".into(),
        Value::Bool(_) => "bool".into(),
        Value::Null => "null".into(),
        Value::Tag(tag, _) => format!("tag {tag}"),
        Value::Array(items) => format!("array of {}", items.len()),
        Value::Map(_) => "map".into(),
        _ => "unknown".into(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
