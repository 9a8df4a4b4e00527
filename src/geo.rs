//! Shared geodesy: great-circle distance and coarse grid quantization
//!
//! Every distance decision in the system (cluster matching, proximity
//! warnings) goes through `haversine_m` so the pipeline is deterministic
//! for identical double-precision inputs.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A WGS-84 coordinate pair in decimal degrees.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// All coordinate values are finite
    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }
}

/// Haversine great-circle distance in meters.
///
/// Symmetric, zero for coincident points. NaN coordinates yield infinity so
/// malformed locations never match any cluster.
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    if !a.is_finite() || !b.is_finite() {
        return f64::INFINITY;
    }
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();
    EARTH_RADIUS_M * c
}

/// Coarse grid cell identifier for neighborhood-scoped locking.
///
/// Cells are quantized in decimal degrees. The cell size must be much larger
/// than the cluster matching radius so that near-simultaneous reports of one
/// hazard almost always land in the same cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridCell {
    pub lat_idx: i64,
    pub lon_idx: i64,
}

/// Quantize a point into its grid cell at the given cell size (degrees).
pub fn grid_cell(p: GeoPoint, cell_deg: f64) -> GridCell {
    GridCell {
        lat_idx: (p.lat / cell_deg).floor() as i64,
        lon_idx: (p.lon / cell_deg).floor() as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_same_point() {
        let p = GeoPoint::new(59.437, 24.7536);
        assert_eq!(haversine_m(p, p), 0.0);
    }

    #[test]
    fn test_haversine_symmetric() {
        let a = GeoPoint::new(59.437, 24.7536);
        let b = GeoPoint::new(59.44, 24.76);
        assert_eq!(haversine_m(a, b), haversine_m(b, a));
    }

    #[test]
    fn test_one_degree_latitude_is_about_111_km() {
        let a = GeoPoint::new(59.0, 24.0);
        let b = GeoPoint::new(60.0, 24.0);
        let d = haversine_m(a, b);
        let expected = 111_195.0; // one degree of arc on the mean sphere
        assert!(
            (d - expected).abs() / expected < 0.01,
            "distance {d} m not within 1% of {expected} m"
        );
    }

    #[test]
    fn test_nan_coordinates_never_match() {
        let a = GeoPoint::new(f64::NAN, 24.0);
        let b = GeoPoint::new(59.0, 24.0);
        assert_eq!(haversine_m(a, b), f64::INFINITY);
    }

    #[test]
    fn test_nearby_points_share_grid_cell() {
        // ~22 m apart at this latitude, cell size ~1.1 km
        let a = GeoPoint::new(59.4370, 24.7536);
        let b = GeoPoint::new(59.4372, 24.7536);
        assert_eq!(grid_cell(a, 0.01), grid_cell(b, 0.01));
    }
}
