//! Domain entities built from validated payload rows.
//!
//! Entities are plain owned records. Reconciliation mutates a tracked
//! instance in place so anything the renderer attached to it (a map marker,
//! say) survives the update. The view handle lives beside the entity in
//! `Tracked`, never inside its type.

use serde::Serialize;

use crate::codec::{FromRow, RowReader, RowSchema, STOP_ROW, VEHICLE_ROW};
use crate::geo::{movement_angle, LatLng};
use crate::types::CodecError;

/// Outcome of reconciling a fresh instance into a tracked one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Position changed.
    Moved,
    /// Position unchanged, some other attribute changed.
    Updated,
    Unchanged,
}

/// Identity + update contract shared by every entity kind.
pub trait Entity: FromRow {
    /// Prefix of the external view key.
    const KIND: &'static str;

    fn id(&self) -> &str;

    fn position(&self) -> LatLng;

    /// Merge a freshly decoded instance with the same identity into `self`.
    fn reconcile(&mut self, fresh: Self) -> Change;

    /// Deterministic key the renderer uses to find or create a view handle.
    fn view_key(&self) -> String {
        format!("{}-{}", Self::KIND, self.id())
    }

    fn distance_from(&self, other: &LatLng) -> f64 {
        self.position().distance_to(other)
    }
}

// ---------------------------------------------------------------------------
// Vehicle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: String,
    pub route_id: String,
    pub trip_id: String,
    #[serde(rename = "latitude")]
    pub lat: f64,
    #[serde(rename = "longitude")]
    pub lng: f64,
    /// Heading in signed radians; derived from consecutive positions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub move_angle: Option<f64>,
}

impl FromRow for Vehicle {
    const SCHEMA: &'static RowSchema = &VEHICLE_ROW;

    fn from_reader(reader: &RowReader<'_>) -> Result<Self, CodecError> {
        Ok(Vehicle {
            id: reader.text(0),
            route_id: reader.text(1),
            trip_id: reader.text(2),
            lat: reader.number(3)?,
            lng: reader.number(4)?,
            move_angle: reader.optional_number(5)?,
        })
    }
}

impl Entity for Vehicle {
    const KIND: &'static str = "vehicle";

    fn id(&self) -> &str {
        &self.id
    }

    fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }

    fn reconcile(&mut self, fresh: Vehicle) -> Change {
        let derived = movement_angle(&self.position(), &fresh.position());
        let moved = derived.is_some();

        // An explicitly transmitted angle wins; otherwise keep the last one
        // when the vehicle reports the same position twice.
        if let Some(angle) = fresh.move_angle.or(derived) {
            self.move_angle = Some(angle);
        }

        let attributes_changed = self.route_id != fresh.route_id || self.trip_id != fresh.trip_id;
        self.lat = fresh.lat;
        self.lng = fresh.lng;
        self.route_id = fresh.route_id;
        self.trip_id = fresh.trip_id;

        if moved {
            Change::Moved
        } else if attributes_changed {
            Change::Updated
        } else {
            Change::Unchanged
        }
    }
}

// ---------------------------------------------------------------------------
// Stop
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stop {
    pub id: String,
    pub name: String,
    #[serde(rename = "latitude")]
    pub lat: f64,
    #[serde(rename = "longitude")]
    pub lng: f64,
}

impl FromRow for Stop {
    const SCHEMA: &'static RowSchema = &STOP_ROW;

    fn from_reader(reader: &RowReader<'_>) -> Result<Self, CodecError> {
        Ok(Stop {
            id: reader.text(0),
            name: reader.text(1),
            lat: reader.number(2)?,
            lng: reader.number(3)?,
        })
    }
}

impl Entity for Stop {
    const KIND: &'static str = "stop";

    fn id(&self) -> &str {
        &self.id
    }

    fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }

    fn reconcile(&mut self, fresh: Stop) -> Change {
        let moved = self.lat != fresh.lat || self.lng != fresh.lng;
        let renamed = self.name != fresh.name;
        self.name = fresh.name;
        self.lat = fresh.lat;
        self.lng = fresh.lng;

        if moved {
            Change::Moved
        } else if renamed {
            Change::Updated
        } else {
            Change::Unchanged
        }
    }
}

// ---------------------------------------------------------------------------
// Route shape
// ---------------------------------------------------------------------------

/// Polyline of a route together with the stops it serves, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteShape {
    pub stop_ids: Vec<String>,
    pub points: Vec<LatLng>,
}

impl RouteShape {
    pub fn new(stop_ids: Vec<String>, route: &[[f64; 2]]) -> Self {
        RouteShape {
            stop_ids,
            points: route.iter().copied().map(LatLng::from).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tracked
// ---------------------------------------------------------------------------

/// An entity as held by the tracker, plus the renderer's view handle.
///
/// `H` is opaque to this crate. It is attached by the renderer and carried
/// unchanged across every reconciliation.
#[derive(Debug, Clone)]
pub struct Tracked<E, H> {
    pub entity: E,
    view: Option<H>,
    /// Tracker generation in which this entity was last reported.
    pub last_seen: u64,
}

impl<E: Entity, H> Tracked<E, H> {
    pub fn new(entity: E, generation: u64) -> Self {
        Tracked {
            entity,
            view: None,
            last_seen: generation,
        }
    }

    pub fn view_key(&self) -> String {
        self.entity.view_key()
    }

    /// Attach a view handle, returning any previously attached one.
    pub fn attach_view(&mut self, view: H) -> Option<H> {
        self.view.replace(view)
    }

    pub fn detach_view(&mut self) -> Option<H> {
        self.view.take()
    }

    pub fn view(&self) -> Option<&H> {
        self.view.as_ref()
    }

    pub fn view_mut(&mut self) -> Option<&mut H> {
        self.view.as_mut()
    }

    pub fn has_view(&self) -> bool {
        self.view.is_some()
    }

    pub(crate) fn reconcile(&mut self, fresh: E, generation: u64) -> Change {
        self.last_seen = generation;
        self.entity.reconcile(fresh)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
