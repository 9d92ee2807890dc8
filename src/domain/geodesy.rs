//! Pure geodesy helpers: great-circle distance, finite-difference speed
//! and human-readable duration formatting

use crate::domain::types::{LatLng, LocationSample};

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two coordinates in meters (haversine)
pub fn distance_m(a: LatLng, b: LatLng) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Instantaneous speed between two samples in m/s
///
/// Returns 0 when there is no previous sample or timestamps are
/// non-increasing.
pub fn speed_mps(prev: Option<&LocationSample>, curr: &LocationSample) -> f64 {
    let Some(prev) = prev else {
        return 0.0;
    };
    if curr.timestamp <= prev.timestamp {
        return 0.0;
    }
    let elapsed_s = (curr.timestamp - prev.timestamp) as f64 / 1000.0;
    distance_m(prev.location, curr.location) / elapsed_s
}

/// Format a duration in seconds as a human-readable string
///
/// Under 60 s the value stays in seconds; under 3600 s it is reported in
/// rounded minutes; anything longer in rounded hours. Exactly 60 s is
/// "1 minute", exactly 3600 s is "1 hour".
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        pluralize(seconds.round() as i64, "second")
    } else if seconds < 3600.0 {
        pluralize((seconds / 60.0).round() as i64, "minute")
    } else {
        pluralize((seconds / 3600.0).round() as i64, "hour")
    }
}

fn pluralize(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit}")
    } else {
        format!("{n} {unit}s")
    }
}
