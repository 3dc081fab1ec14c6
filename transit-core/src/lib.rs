//! transit-core: Pure decode + reconciliation library for the live transit feed.
//!
//! No async, no I/O beyond the config file. Bytes go in through
//! [`Pipeline::process`], a validated [`Envelope`] comes out, and a
//! [`Tracker`] folds envelopes into per-entity state keyed by id.

pub mod codec;
pub mod config;
pub mod entity;
pub mod envelope;
pub mod geo;
pub mod pipeline;
pub mod tracker;
pub mod types;
pub mod validate;

// Re-export commonly used types at crate root
pub use entity::{Change, Entity, RouteShape, Stop, Tracked, Vehicle};
pub use envelope::{Envelope, Payload, SchemaRegistry, PROTOCOL_V1};
pub use geo::LatLng;
pub use pipeline::{Outcome, Pipeline, Timings};
pub use tracker::{TrackEvent, Tracker, Update};
pub use types::*;
