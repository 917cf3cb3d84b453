//! Great-circle geofencing.

use serde::{Deserialize, Serialize};

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Decimal-degree coordinate as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Latitude within [-90, 90] and longitude within [-180, 180].
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Haversine great-circle distance in metres.
pub fn haversine_distance_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_phi = (b.latitude - a.latitude).to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let h = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Result of a geofence admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeofenceResult {
    pub inside: bool,
    pub distance_m: f64,
}

impl GeofenceResult {
    /// Distance rounded to the nearest metre, as reported to the subject.
    pub fn rounded_distance_m(&self) -> u64 {
        self.distance_m.round() as u64
    }
}

/// Circular admission zone around a fixed reference point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub center: GeoPoint,
    pub radius_m: f64,
}

impl Geofence {
    pub const fn new(center: GeoPoint, radius_m: f64) -> Self {
        Self { center, radius_m }
    }

    /// Admit `position` when it lies within (or exactly on) the radius.
    pub fn check(&self, position: GeoPoint) -> GeofenceResult {
        let distance_m = haversine_distance_m(position, self.center);
        GeofenceResult {
            inside: distance_m <= self.radius_m,
            distance_m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAMPUS: GeoPoint = GeoPoint::new(23.218421, 77.390896);

    /// Point `metres` due north of `origin`. Along a meridian the haversine
    /// distance is exactly `R * dphi`.
    fn north_of(origin: GeoPoint, metres: f64) -> GeoPoint {
        let d_lat = (metres / EARTH_RADIUS_M).to_degrees();
        GeoPoint::new(origin.latitude + d_lat, origin.longitude)
    }

    #[test]
    fn test_identical_points_zero_distance() {
        assert_eq!(haversine_distance_m(CAMPUS, CAMPUS), 0.0);
    }

    #[test]
    fn test_symmetric() {
        let other = GeoPoint::new(23.259933, 77.412613);
        let ab = haversine_distance_m(CAMPUS, other);
        let ba = haversine_distance_m(other, CAMPUS);
        assert!((ab - ba).abs() < 1e-9);
    }

    #[test]
    fn test_known_distance() {
        // One degree of longitude on the equator: R * pi / 180
        let d = haversine_distance_m(GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 1.0));
        assert!((d - 111_194.93).abs() < 0.1, "got {d}");
    }

    #[test]
    fn test_same_point_passes() {
        let fence = Geofence::new(CAMPUS, 500.0);
        let result = fence.check(CAMPUS);
        assert!(result.inside);
        assert_eq!(result.rounded_distance_m(), 0);
    }

    #[test]
    fn test_600m_fails_and_reports_600() {
        let fence = Geofence::new(CAMPUS, 500.0);
        let result = fence.check(north_of(CAMPUS, 600.0));
        assert!(!result.inside);
        assert_eq!(result.rounded_distance_m(), 600);
    }

    #[test]
    fn test_inside_radius_passes() {
        let fence = Geofence::new(CAMPUS, 500.0);
        let result = fence.check(north_of(CAMPUS, 350.0));
        assert!(result.inside);
        assert_eq!(result.rounded_distance_m(), 350);
    }

    #[test]
    fn test_radius_is_inclusive() {
        let edge = north_of(CAMPUS, 500.0);
        let fence = Geofence::new(CAMPUS, haversine_distance_m(CAMPUS, edge));
        assert!(fence.check(edge).inside);

        let just_short = Geofence::new(CAMPUS, haversine_distance_m(CAMPUS, edge) - 1e-6);
        assert!(!just_short.check(edge).inside);
    }

    #[test]
    fn test_point_validity() {
        assert!(CAMPUS.is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, -180.5).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
    }
}
