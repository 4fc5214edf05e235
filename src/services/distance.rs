//! Great-circle distance between two coordinates

use crate::domain::types::GeoPoint;

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine surface distance in meters
///
/// Inputs are expected within [-90, 90] x [-180, 180]; range validation is
/// the caller's job. The haversine term is clamped so rounding near
/// antipodal points cannot push `asin` out of its domain.
#[inline]
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.clamp(0.0, 1.0).sqrt().asin()
}

/// Distance between two optional positions; `None` when either is missing
#[inline]
pub fn distance_between(a: Option<GeoPoint>, b: Option<GeoPoint>) -> Option<f64> {
    Some(haversine_m(a?, b?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_point_is_zero() {
        let p = GeoPoint::new(52.37, 4.89);
        assert_eq!(haversine_m(p, p), 0.0);
    }

    #[test]
    fn test_one_degree_of_latitude() {
        let d = haversine_m(GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 0.0));
        let expected = EARTH_RADIUS_M * 1f64.to_radians();
        assert!((d - expected).abs() < 1e-6, "got {d}");
    }

    #[test]
    fn test_known_city_pair() {
        // Amsterdam Centraal to Rotterdam Centraal, roughly 58.5 km
        let d = haversine_m(GeoPoint::new(52.3791, 4.9003), GeoPoint::new(51.9244, 4.4695));
        assert!((d - 58_480.0).abs() < 100.0, "got {d}");
    }

    #[test]
    fn test_symmetric() {
        let a = GeoPoint::new(48.85, 2.35);
        let b = GeoPoint::new(40.71, -74.0);
        assert_eq!(haversine_m(a, b), haversine_m(b, a));
    }

    #[test]
    fn test_antipodal_points_stay_finite() {
        let d = haversine_m(GeoPoint::new(90.0, 0.0), GeoPoint::new(-90.0, 180.0));
        assert!(d.is_finite());
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_M).abs() < 1.0);
    }

    #[test]
    fn test_missing_position() {
        let p = Some(GeoPoint::new(1.0, 1.0));
        assert_eq!(distance_between(p, None), None);
        assert_eq!(distance_between(None, p), None);
        assert_eq!(distance_between(p, p), Some(0.0));
    }
}
