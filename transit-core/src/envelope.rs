//! Versioned message envelope and the per-version payload union.
//!
//! Every wire message is `{v, ts?, d}`. The version tag selects a payload
//! validator from a `SchemaRegistry`; the payload itself is a closed union
//! discriminated by which key is present, never by an explicit tag.

use std::collections::BTreeMap;

use ciborium::value::Value;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::types::{epoch_millis_now, FeedError, Result, Row, ValidationError};

/// The only protocol generation currently emitted by producers.
pub const PROTOCOL_V1: u64 = 1;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A decoded, validated wire message. Transient: unpack `data` and drop it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(rename = "v")]
    pub version: u64,
    /// Producer timestamp, epoch milliseconds.
    #[serde(rename = "ts", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(rename = "d")]
    pub data: Payload,
}

impl Envelope {
    pub const fn new(version: u64, data: Payload) -> Self {
        Envelope {
            version,
            timestamp: None,
            data,
        }
    }

    pub fn with_timestamp(self, timestamp: f64) -> Self {
        Envelope {
            timestamp: Some(timestamp),
            ..self
        }
    }

    pub fn with_timestamp_now(self) -> Self {
        self.with_timestamp(epoch_millis_now())
    }

    /// Encode in the compact binary object format used on the wire.
    ///
    /// Producer-side helper; the consumer pipeline only ever decodes.
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| FeedError::Serialize(e.to_string()))?;
        Ok(buf)
    }
}

// ---------------------------------------------------------------------------
// Payload union
// ---------------------------------------------------------------------------

/// Every payload shape accepted by any supported generation.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// `[id, routeId, tripId, lat, lng]` tuples.
    Vehicles(Vec<Row>),
    /// `[id, name, lat, lng]` tuples.
    SimpleStops(Vec<Row>),
    /// Route polyline keyed by the ordered stops it serves.
    Route {
        stop_ids: Vec<String>,
        route: Vec<[f64; 2]>,
    },
    /// Trip ids serving a stop.
    StopTrips(Vec<String>),
    /// Bare-number sentinel from earlier producers: nothing changed.
    NoUpdate(f64),
}

impl Payload {
    /// Wire key(s) naming this union member.
    pub fn key(&self) -> &'static str {
        match self {
            Payload::Vehicles(_) => "vehicles",
            Payload::SimpleStops(_) => "simpleStops",
            Payload::Route { .. } => "stopIds+route",
            Payload::StopTrips(_) => "stopTrips",
            Payload::NoUpdate(_) => "sentinel",
        }
    }

    /// Number of records carried.
    pub fn len(&self) -> usize {
        match self {
            Payload::Vehicles(rows) | Payload::SimpleStops(rows) => rows.len(),
            Payload::Route { route, .. } => route.len(),
            Payload::StopTrips(ids) => ids.len(),
            Payload::NoUpdate(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Payload::Vehicles(rows) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("vehicles", rows)?;
                map.end()
            }
            Payload::SimpleStops(rows) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("simpleStops", rows)?;
                map.end()
            }
            Payload::Route { stop_ids, route } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("stopIds", stop_ids)?;
                map.serialize_entry("route", route)?;
                map.end()
            }
            Payload::StopTrips(ids) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("stopTrips", ids)?;
                map.end()
            }
            Payload::NoUpdate(n) => serializer.serialize_f64(*n),
        }
    }
}

// ---------------------------------------------------------------------------
// Schema registry
// ---------------------------------------------------------------------------

/// Validates the `d` member of an envelope. `path` is the location of `d`.
pub type PayloadValidator = fn(&Value, &str) -> std::result::Result<Payload, ValidationError>;

/// Known protocol generations and the payload validator for each.
#[derive(Clone)]
pub struct SchemaRegistry {
    schemas: BTreeMap<u64, PayloadValidator>,
}

impl SchemaRegistry {
    /// An empty registry. Every message is rejected as unsupported.
    pub fn new() -> Self {
        SchemaRegistry {
            schemas: BTreeMap::new(),
        }
    }

    /// Register (or replace) the payload validator for `version`.
    pub fn register(&mut self, version: u64, validator: PayloadValidator) -> &mut Self {
        self.schemas.insert(version, validator);
        self
    }

    pub fn validator(&self, version: u64) -> Option<PayloadValidator> {
        self.schemas.get(&version).copied()
    }

    pub fn supports(&self, version: u64) -> bool {
        self.schemas.contains_key(&version)
    }

    /// Registered versions in ascending order.
    pub fn versions(&self) -> Vec<u64> {
        self.schemas.keys().copied().collect()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        let mut registry = SchemaRegistry::new();
        registry.register(PROTOCOL_V1, crate::validate::validate_v1_payload);
        registry
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("versions", &self.versions())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
