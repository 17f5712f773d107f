//! Spherical geodesy helpers shared by the hybrid query and drift
//! integration paths.

/// Mean Earth radius in nautical miles.
pub const EARTH_RADIUS_NM: f64 = 3440.065;

/// Metres per nautical mile.
pub const METERS_PER_NM: f64 = 1852.0;

/// Knots per metre-per-second.
pub const MPS_TO_KTS: f64 = 1.943_844;

/// Great-circle distance between two positions in nautical miles.
///
/// Haversine keeps its accuracy from sub-nm harbor scale out past
/// ocean-basin scale, which is the full range the hybrid query sees.
pub fn haversine_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_NM * c
}

/// Displace a position by north/east offsets given in nautical miles.
///
/// Local-tangent-plane approximation: valid for the short per-step
/// displacements produced by drift integration (a few nm per hour), not for
/// basin-scale jumps. Longitude is wrapped to [-180, 180).
pub fn offset_position_nm(lat: f64, lon: f64, north_nm: f64, east_nm: f64) -> (f64, f64) {
    let new_lat = (lat + north_nm / 60.0).clamp(-90.0, 90.0);
    // One minute of longitude shrinks with the cosine of latitude; use the
    // midpoint latitude so long integrations do not skew poleward.
    let mid_lat = ((lat + new_lat) / 2.0).to_radians();
    let cos_lat = mid_lat.cos().max(1e-6);
    let mut new_lon = lon + east_nm / (60.0 * cos_lat);
    while new_lon >= 180.0 {
        new_lon -= 360.0;
    }
    while new_lon < -180.0 {
        new_lon += 360.0;
    }
    (new_lat, new_lon)
}

/// Convert a velocity in m/s held for `dt_secs` into nautical miles.
pub fn displacement_nm(velocity_mps: f64, dt_secs: f64) -> f64 {
    velocity_mps * dt_secs / METERS_PER_NM
}
