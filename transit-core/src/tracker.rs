//! Identity-preserving reconciliation of decoded payloads.
//!
//! Pure logic, no I/O and no rendering. `Tracker::apply` turns a validated
//! envelope into entity updates and returns `TrackEvent`s that tell the
//! renderer which view handles to create, move, or refresh.
//!
//! Tracks: vehicles and stops by id, the most recent route shape, the most
//! recent stop-trip list, and message counters.

use std::collections::HashMap;

use serde::Serialize;

use crate::codec::decode_rows;
use crate::entity::{Change, Entity, RouteShape, Stop, Tracked, Vehicle};
use crate::envelope::{Envelope, Payload};
use crate::geo::LatLng;
use crate::types::CodecError;

// ---------------------------------------------------------------------------
// Interpreted update
// ---------------------------------------------------------------------------

/// A payload with every row decoded into its entity type.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Vehicles(Vec<Vehicle>),
    Stops(Vec<Stop>),
    Route(RouteShape),
    StopTrips(Vec<String>),
    NoUpdate,
}

/// Decode all rows of an envelope. Nothing is constructed unless every row
/// decodes.
pub fn interpret(envelope: &Envelope) -> Result<Update, CodecError> {
    Ok(match &envelope.data {
        Payload::Vehicles(rows) => Update::Vehicles(decode_rows(rows)?),
        Payload::SimpleStops(rows) => Update::Stops(decode_rows(rows)?),
        Payload::Route { stop_ids, route } => Update::Route(RouteShape::new(stop_ids.clone(), route)),
        Payload::StopTrips(trips) => Update::StopTrips(trips.clone()),
        Payload::NoUpdate(_) => Update::NoUpdate,
    })
}

// ---------------------------------------------------------------------------
// Track events (output)
// ---------------------------------------------------------------------------

/// Events emitted for the renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackEvent {
    /// First sighting; the renderer should create a view for `view_key`.
    NewVehicle { id: String, view_key: String },
    VehicleMoved {
        id: String,
        view_key: String,
        move_angle: Option<f64>,
    },
    /// Route or trip changed without a position change.
    VehicleUpdated { id: String, view_key: String },
    /// Seen again with identical values; only `last_seen` advanced.
    VehicleUnchanged { id: String, view_key: String },
    NewStop { id: String, view_key: String },
    StopMoved { id: String, view_key: String },
    /// Name changed in place.
    StopUpdated { id: String, view_key: String },
    StopUnchanged { id: String, view_key: String },
    RouteReplaced { stops: usize, points: usize },
    StopTripsReplaced { trips: usize },
    NoUpdate,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Owns every tracked entity. `H` is the renderer's view handle type.
///
/// Reconciliation takes `&mut self`, so two payloads can never interleave
/// their updates to the same identity.
#[derive(Debug)]
pub struct Tracker<H> {
    pub vehicles: HashMap<String, Tracked<Vehicle, H>>,
    pub stops: HashMap<String, Tracked<Stop, H>>,
    pub route: Option<RouteShape>,
    pub stop_trips: Option<Vec<String>>,

    /// Incremented once per applied message.
    pub generation: u64,

    // Counters
    pub total_messages: u64,
    pub applied_messages: u64,
    pub rejected_messages: u64,
}

impl<H> Default for Tracker<H> {
    fn default() -> Self {
        Tracker::new()
    }
}

impl<H> Tracker<H> {
    pub fn new() -> Self {
        Tracker {
            vehicles: HashMap::new(),
            stops: HashMap::new(),
            route: None,
            stop_trips: None,
            generation: 0,
            total_messages: 0,
            applied_messages: 0,
            rejected_messages: 0,
        }
    }

    /// Reconcile one validated envelope.
    ///
    /// On a codec error nothing is mutated: the previous state stays on
    /// screen ("no update this cycle").
    pub fn apply(&mut self, envelope: &Envelope) -> Result<Vec<TrackEvent>, CodecError> {
        self.total_messages += 1;
        let update = match interpret(envelope) {
            Ok(u) => u,
            Err(e) => {
                self.rejected_messages += 1;
                return Err(e);
            }
        };

        self.applied_messages += 1;
        self.generation += 1;
        let generation = self.generation;
        let mut events = Vec::new();

        match update {
            Update::Vehicles(vehicles) => {
                for vehicle in vehicles {
                    events.push(reconcile_vehicle(&mut self.vehicles, vehicle, generation));
                }
            }
            Update::Stops(stops) => {
                for stop in stops {
                    events.push(reconcile_stop(&mut self.stops, stop, generation));
                }
            }
            Update::Route(shape) => {
                events.push(TrackEvent::RouteReplaced {
                    stops: shape.stop_ids.len(),
                    points: shape.points.len(),
                });
                self.route = Some(shape);
            }
            Update::StopTrips(trips) => {
                events.push(TrackEvent::StopTripsReplaced { trips: trips.len() });
                self.stop_trips = Some(trips);
            }
            Update::NoUpdate => events.push(TrackEvent::NoUpdate),
        }

        Ok(events)
    }

    /// Count a message that was rejected before it reached reconciliation.
    pub fn record_rejected(&mut self) {
        self.total_messages += 1;
        self.rejected_messages += 1;
    }

    pub fn vehicle(&self, id: &str) -> Option<&Tracked<Vehicle, H>> {
        self.vehicles.get(id)
    }

    pub fn vehicle_mut(&mut self, id: &str) -> Option<&mut Tracked<Vehicle, H>> {
        self.vehicles.get_mut(id)
    }

    pub fn stop(&self, id: &str) -> Option<&Tracked<Stop, H>> {
        self.stops.get(id)
    }

    pub fn stop_mut(&mut self, id: &str) -> Option<&mut Tracked<Stop, H>> {
        self.stops.get_mut(id)
    }

    /// All vehicles, most recently reported first, ties broken by id.
    pub fn vehicles_sorted(&self) -> Vec<&Tracked<Vehicle, H>> {
        let mut vehicles: Vec<_> = self.vehicles.values().collect();
        vehicles.sort_by(|a, b| {
            b.last_seen
                .cmp(&a.last_seen)
                .then_with(|| a.entity.id.cmp(&b.entity.id))
        });
        vehicles
    }

    /// All stops, ordered by name then id.
    pub fn stops_sorted(&self) -> Vec<&Tracked<Stop, H>> {
        let mut stops: Vec<_> = self.stops.values().collect();
        stops.sort_by(|a, b| {
            a.entity
                .name
                .cmp(&b.entity.name)
                .then_with(|| a.entity.id.cmp(&b.entity.id))
        });
        stops
    }

    /// Closest tracked stop to `point`.
    pub fn nearest_stop(&self, point: &LatLng) -> Option<&Tracked<Stop, H>> {
        self.stops.values().min_by(|a, b| {
            a.entity
                .distance_from(point)
                .total_cmp(&b.entity.distance_from(point))
        })
    }

    /// Remove vehicles not reported in the last `max_missed` applied
    /// messages. Opt-in: the tracker never expires anything on its own.
    ///
    /// Returns the removed entries so their view handles can be disposed.
    pub fn prune_vehicles_unseen(&mut self, max_missed: u64) -> Vec<Tracked<Vehicle, H>> {
        prune(&mut self.vehicles, self.generation, max_missed)
    }

    /// Same as `prune_vehicles_unseen`, for stops.
    pub fn prune_stops_unseen(&mut self, max_missed: u64) -> Vec<Tracked<Stop, H>> {
        prune(&mut self.stops, self.generation, max_missed)
    }
}

/// Free functions so the map borrow stays disjoint from the counters.
fn reconcile_vehicle<H>(
    tracked: &mut HashMap<String, Tracked<Vehicle, H>>,
    fresh: Vehicle,
    generation: u64,
) -> TrackEvent {
    let id = fresh.id.clone();
    let view_key = fresh.view_key();

    match tracked.get_mut(&id) {
        None => {
            tracked.insert(id.clone(), Tracked::new(fresh, generation));
            TrackEvent::NewVehicle { id, view_key }
        }
        Some(existing) => match existing.reconcile(fresh, generation) {
            Change::Moved => TrackEvent::VehicleMoved {
                id,
                view_key,
                move_angle: existing.entity.move_angle,
            },
            Change::Updated => TrackEvent::VehicleUpdated { id, view_key },
            Change::Unchanged => TrackEvent::VehicleUnchanged { id, view_key },
        },
    }
}

fn reconcile_stop<H>(
    tracked: &mut HashMap<String, Tracked<Stop, H>>,
    fresh: Stop,
    generation: u64,
) -> TrackEvent {
    let id = fresh.id.clone();
    let view_key = fresh.view_key();

    match tracked.get_mut(&id) {
        None => {
            tracked.insert(id.clone(), Tracked::new(fresh, generation));
            TrackEvent::NewStop { id, view_key }
        }
        Some(existing) => match existing.reconcile(fresh, generation) {
            Change::Moved => TrackEvent::StopMoved { id, view_key },
            Change::Updated => TrackEvent::StopUpdated { id, view_key },
            Change::Unchanged => TrackEvent::StopUnchanged { id, view_key },
        },
    }
}

fn prune<E: Entity, H>(
    tracked: &mut HashMap<String, Tracked<E, H>>,
    generation: u64,
    max_missed: u64,
) -> Vec<Tracked<E, H>> {
    let stale: Vec<String> = tracked
        .iter()
        .filter(|(_, t)| generation.saturating_sub(t.last_seen) > max_missed)
        .map(|(k, _)| k.clone())
        .collect();
    stale.iter().filter_map(|k| tracked.remove(k)).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::PROTOCOL_V1;
    use crate::types::{Primitive, Row};
    use std::f64::consts::FRAC_PI_2;

    fn vehicle_row(id: &str, lat: f64, lng: f64) -> Row {
        vec![id.into(), "r1".into(), "t1".into(), lat.into(), lng.into()]
    }

    fn vehicles(rows: Vec<Row>) -> Envelope {
        Envelope::new(PROTOCOL_V1, Payload::Vehicles(rows))
    }

    fn stops(rows: Vec<Row>) -> Envelope {
        Envelope::new(PROTOCOL_V1, Payload::SimpleStops(rows))
    }

    fn stop_row(id: &str, name: &str, lat: f64, lng: f64) -> Row {
        vec![id.into(), name.into(), lat.into(), lng.into()]
    }

    #[test]
    fn test_first_sighting() {
        let mut tracker: Tracker<()> = Tracker::new();
        let events = tracker
            .apply(&vehicles(vec![vehicle_row("v1", 45.8, 16.0)]))
            .unwrap();

        assert_eq!(
            events,
            vec![TrackEvent::NewVehicle {
                id: "v1".into(),
                view_key: "vehicle-v1".into(),
            }]
        );
        let v = &tracker.vehicle("v1").unwrap().entity;
        assert_eq!(v.lat, 45.8);
        assert_eq!(v.lng, 16.0);
        assert_eq!(v.move_angle, None);
        assert!(!tracker.vehicle("v1").unwrap().has_view());
    }

    #[test]
    fn test_move_preserves_view_handle() {
        let mut tracker: Tracker<&'static str> = Tracker::new();
        tracker
            .apply(&vehicles(vec![vehicle_row("v1", 45.0, 15.0)]))
            .unwrap();
        tracker.vehicle_mut("v1").unwrap().attach_view("marker-1");

        let events = tracker
            .apply(&vehicles(vec![vehicle_row("v1", 45.001, 15.0)]))
            .unwrap();
        assert_eq!(
            events,
            vec![TrackEvent::VehicleMoved {
                id: "v1".into(),
                view_key: "vehicle-v1".into(),
                move_angle: Some(FRAC_PI_2),
            }]
        );

        let tracked = tracker.vehicle("v1").unwrap();
        assert_eq!(tracked.view(), Some(&"marker-1"));
        assert_eq!(tracked.entity.lat, 45.001);
        assert_eq!(tracked.entity.move_angle, Some(FRAC_PI_2));
    }

    #[test]
    fn test_repeat_position_keeps_angle() {
        let mut tracker: Tracker<()> = Tracker::new();
        tracker.apply(&vehicles(vec![vehicle_row("v1", 45.0, 15.0)])).unwrap();
        tracker.apply(&vehicles(vec![vehicle_row("v1", 45.001, 15.0)])).unwrap();
        let events = tracker
            .apply(&vehicles(vec![vehicle_row("v1", 45.001, 15.0)]))
            .unwrap();

        assert_eq!(
            events,
            vec![TrackEvent::VehicleUnchanged {
                id: "v1".into(),
                view_key: "vehicle-v1".into(),
            }]
        );
        assert_eq!(tracker.vehicle("v1").unwrap().last_seen, 3);
        assert_eq!(
            tracker.vehicle("v1").unwrap().entity.move_angle,
            Some(FRAC_PI_2)
        );
    }

    #[test]
    fn test_short_row_leaves_state_untouched() {
        let mut tracker: Tracker<()> = Tracker::new();
        tracker.apply(&vehicles(vec![vehicle_row("v1", 45.0, 15.0)])).unwrap();

        let bad = vehicles(vec![
            vehicle_row("v1", 46.0, 16.0),
            vec!["v2".into(), "r1".into()],
        ]);
        let err = tracker.apply(&bad).unwrap_err();
        assert!(matches!(err, CodecError::Arity { index: 1, .. }));

        assert_eq!(tracker.vehicles.len(), 1);
        assert_eq!(tracker.vehicle("v1").unwrap().entity.lat, 45.0);
        assert_eq!(tracker.rejected_messages, 1);
        assert_eq!(tracker.applied_messages, 1);
        assert_eq!(tracker.total_messages, 2);
        assert_eq!(tracker.generation, 1);
    }

    #[test]
    fn test_coercion_error_leaves_state_untouched() {
        let mut tracker: Tracker<()> = Tracker::new();
        let bad = vehicles(vec![vec![
            "v1".into(),
            "r1".into(),
            "t1".into(),
            "north".into(),
            16.0.into(),
        ]]);
        assert!(matches!(
            tracker.apply(&bad).unwrap_err(),
            CodecError::Coercion { field: "lat", .. }
        ));
        assert!(tracker.vehicles.is_empty());
    }

    #[test]
    fn test_absent_entities_untouched() {
        let mut tracker: Tracker<()> = Tracker::new();
        tracker
            .apply(&vehicles(vec![
                vehicle_row("v1", 45.0, 15.0),
                vehicle_row("v2", 45.1, 15.1),
            ]))
            .unwrap();
        tracker.apply(&vehicles(vec![vehicle_row("v1", 45.2, 15.0)])).unwrap();

        assert_eq!(tracker.vehicles.len(), 2);
        assert_eq!(tracker.vehicle("v2").unwrap().entity.lat, 45.1);
        assert_eq!(tracker.vehicle("v2").unwrap().last_seen, 1);
        assert_eq!(tracker.vehicle("v1").unwrap().last_seen, 2);
    }

    #[test]
    fn test_stops() {
        let mut tracker: Tracker<u8> = Tracker::new();
        let events = tracker
            .apply(&stops(vec![stop_row("s1", "Dubrava", 45.83, 16.06)]))
            .unwrap();
        assert_eq!(
            events,
            vec![TrackEvent::NewStop {
                id: "s1".into(),
                view_key: "stop-s1".into(),
            }]
        );
        tracker.stop_mut("s1").unwrap().attach_view(3);

        let events = tracker
            .apply(&stops(vec![stop_row("s1", "Dubrava (okretište)", 45.83, 16.06)]))
            .unwrap();
        assert!(matches!(events[0], TrackEvent::StopUpdated { .. }));
        let stop = tracker.stop("s1").unwrap();
        assert_eq!(stop.entity.name, "Dubrava (okretište)");
        assert_eq!(stop.view(), Some(&3));

        let events = tracker
            .apply(&stops(vec![stop_row("s1", "Dubrava (okretište)", 45.84, 16.06)]))
            .unwrap();
        assert!(matches!(events[0], TrackEvent::StopMoved { .. }));

        let events = tracker
            .apply(&stops(vec![stop_row("s1", "Dubrava (okretište)", 45.84, 16.06)]))
            .unwrap();
        assert!(matches!(events[0], TrackEvent::StopUnchanged { .. }));
    }

    #[test]
    fn test_route_or_trip_change_is_an_update() {
        let mut tracker: Tracker<()> = Tracker::new();
        tracker.apply(&vehicles(vec![vehicle_row("v1", 45.0, 15.0)])).unwrap();
        let events = tracker
            .apply(&vehicles(vec![vec![
                "v1".into(),
                "r2".into(),
                "t9".into(),
                45.0.into(),
                15.0.into(),
            ]]))
            .unwrap();
        assert!(matches!(events[0], TrackEvent::VehicleUpdated { .. }));
        assert_eq!(tracker.vehicle("v1").unwrap().entity.route_id, "r2");
    }

    #[test]
    fn test_route_and_stop_trips() {
        let mut tracker: Tracker<()> = Tracker::new();
        let events = tracker
            .apply(&Envelope::new(
                PROTOCOL_V1,
                Payload::Route {
                    stop_ids: vec!["s1".into(), "s2".into()],
                    route: vec![[45.8, 15.9], [45.81, 15.92], [45.82, 15.95]],
                },
            ))
            .unwrap();
        assert_eq!(events, vec![TrackEvent::RouteReplaced { stops: 2, points: 3 }]);
        assert_eq!(tracker.route.as_ref().unwrap().points.len(), 3);

        let events = tracker
            .apply(&Envelope::new(
                PROTOCOL_V1,
                Payload::StopTrips(vec!["t1".into(), "t2".into()]),
            ))
            .unwrap();
        assert_eq!(events, vec![TrackEvent::StopTripsReplaced { trips: 2 }]);
        assert_eq!(tracker.stop_trips.as_deref().unwrap(), ["t1", "t2"]);
    }

    #[test]
    fn test_no_update_sentinel() {
        let mut tracker: Tracker<()> = Tracker::new();
        tracker.apply(&vehicles(vec![vehicle_row("v1", 45.0, 15.0)])).unwrap();
        let events = tracker
            .apply(&Envelope::new(PROTOCOL_V1, Payload::NoUpdate(0.0)))
            .unwrap();
        assert_eq!(events, vec![TrackEvent::NoUpdate]);
        assert_eq!(tracker.vehicles.len(), 1);
    }

    #[test]
    fn test_record_rejected() {
        let mut tracker: Tracker<()> = Tracker::new();
        tracker.apply(&vehicles(vec![vehicle_row("v1", 45.0, 15.0)])).unwrap();
        tracker.record_rejected();
        assert_eq!(tracker.total_messages, 2);
        assert_eq!(tracker.applied_messages, 1);
        assert_eq!(tracker.rejected_messages, 1);
        assert_eq!(tracker.generation, 1);
    }

    #[test]
    fn test_legacy_numeric_ids_match_string_ids() {
        let mut tracker: Tracker<()> = Tracker::new();
        let legacy = vehicles(vec![vec![
            Primitive::Int(42),
            Primitive::Int(6),
            "t1".into(),
            45.0.into(),
            15.0.into(),
        ]]);
        tracker.apply(&legacy).unwrap();
        let events = tracker
            .apply(&vehicles(vec![vehicle_row("42", 45.1, 15.0)]))
            .unwrap();
        assert!(matches!(events[0], TrackEvent::VehicleMoved { .. }));
        assert_eq!(tracker.vehicles.len(), 1);
    }

    #[test]
    fn test_prune_unseen() {
        let mut tracker: Tracker<u32> = Tracker::new();
        tracker
            .apply(&vehicles(vec![
                vehicle_row("v1", 45.0, 15.0),
                vehicle_row("v2", 45.1, 15.1),
            ]))
            .unwrap();
        tracker.vehicle_mut("v2").unwrap().attach_view(22);
        tracker.apply(&vehicles(vec![vehicle_row("v1", 45.0, 15.0)])).unwrap();
        tracker.apply(&vehicles(vec![vehicle_row("v1", 45.0, 15.0)])).unwrap();

        assert!(tracker.prune_vehicles_unseen(2).is_empty());
        let removed = tracker.prune_vehicles_unseen(1);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].entity.id, "v2");
        assert_eq!(removed[0].view(), Some(&22));
        assert_eq!(tracker.vehicles.len(), 1);
        assert!(tracker.prune_stops_unseen(0).is_empty());
    }

    #[test]
    fn test_sorted_views_and_nearest_stop() {
        let mut tracker: Tracker<()> = Tracker::new();
        tracker
            .apply(&stops(vec![
                stop_row("s2", "Zagreb", 45.81, 15.98),
                stop_row("s1", "Avenue Mall", 45.78, 15.95),
            ]))
            .unwrap();
        let names: Vec<_> = tracker
            .stops_sorted()
            .iter()
            .map(|s| s.entity.name.as_str())
            .collect();
        assert_eq!(names, vec!["Avenue Mall", "Zagreb"]);

        let nearest = tracker.nearest_stop(&LatLng::new(45.80, 15.97)).unwrap();
        assert_eq!(nearest.entity.id, "s2");

        tracker.apply(&vehicles(vec![vehicle_row("b", 45.0, 15.0)])).unwrap();
        tracker.apply(&vehicles(vec![vehicle_row("a", 45.0, 15.0)])).unwrap();
        let ids: Vec<_> = tracker
            .vehicles_sorted()
            .iter()
            .map(|v| v.entity.id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_interpret_does_not_need_tracker() {
        let update = interpret(&vehicles(vec![vehicle_row("v1", 45.8, 16.0)])).unwrap();
        let Update::Vehicles(v) = update else {
            panic!("expected vehicles");
        };
        assert_eq!(v[0].id, "v1");
    }
}
