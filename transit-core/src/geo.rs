//! Plain-degree coordinate helpers. No projection or normalization.

use serde::Serialize;

/// A WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub const fn new(lat: f64, lng: f64) -> Self {
        LatLng { lat, lng }
    }

    /// Planar distance in degrees. Good enough for ranking nearby stops
    /// inside a single city; not a geodesic.
    pub fn distance_to(&self, other: &LatLng) -> f64 {
        ((self.lat - other.lat).powi(2) + (self.lng - other.lng).powi(2)).sqrt()
    }
}

impl From<[f64; 2]> for LatLng {
    fn from([lat, lng]: [f64; 2]) -> Self {
        LatLng { lat, lng }
    }
}

/// Heading of travel from `from` to `to`, in signed radians.
///
/// `atan2(Δlat, Δlng)`: 0 points along increasing longitude, π/2 along
/// increasing latitude. `None` when the position did not change.
pub fn movement_angle(from: &LatLng, to: &LatLng) -> Option<f64> {
    let dlat = to.lat - from.lat;
    let dlng = to.lng - from.lng;
    if dlat == 0.0 && dlng == 0.0 {
        return None;
    }
    Some(dlat.atan2(dlng))
}
