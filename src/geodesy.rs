//! Great-circle helpers on WGS84 coordinates (spherical Earth).

use crate::models::Coordinates;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6_371.0;

impl Coordinates {
    /// Great-circle distance to another point in kilometres (haversine).
    pub fn distance_km(&self, other: &Coordinates) -> f64 {
        // ---
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().min(1.0).asin();

        EARTH_RADIUS_KM * c
    }

    /// Initial great-circle bearing towards `other`, in degrees `[0, 360)`.
    pub fn bearing_to(&self, other: &Coordinates) -> f64 {
        // ---
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let y = dlon.sin() * lat2.cos();
        let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();

        normalize_degrees(y.atan2(x).to_degrees())
    }

    /// Point reached after travelling `distance_km` along `bearing` degrees.
    pub fn destination(&self, bearing: f64, distance_km: f64) -> Coordinates {
        // ---
        let delta = distance_km / EARTH_RADIUS_KM;
        let theta = bearing.to_radians();
        let lat1 = self.latitude.to_radians();
        let lon1 = self.longitude.to_radians();

        let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos()).asin();
        let lon2 = lon1
            + (theta.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());

        let longitude = (lon2.to_degrees() + 540.0).rem_euclid(360.0) - 180.0;
        Coordinates::new(lat2.to_degrees(), longitude)
    }
}

/// Wrap any angle into `[0, 360)`.
pub fn normalize_degrees(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negatives
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Smallest absolute difference between two bearings, in `[0, 180]`.
pub fn angle_difference(a: f64, b: f64) -> f64 {
    let diff = (normalize_degrees(a) - normalize_degrees(b)).abs();
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}
