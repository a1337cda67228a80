//! Great-circle distance and bearing on a spherical Earth

use crate::domain::types::Coordinates;

/// IUGG mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Haversine distance in meters between two valid coordinates
#[must_use]
pub fn distance_m(a: Coordinates, b: Coordinates) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lon = (b.lon - a.lon).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    // clamp guards against h drifting past 1.0 for antipodal points
    let c = 2.0 * h.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

/// Initial bearing from `a` to `b` in degrees, normalized to [0, 360)
#[must_use]
pub fn bearing_deg(a: Coordinates, b: Coordinates) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lon = (b.lon - a.lon).to_radians();

    let y = delta_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lon.cos();

    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Meters covered by one degree of latitude
#[inline]
pub fn meters_per_degree_lat() -> f64 {
    EARTH_RADIUS_M.to_radians()
}
