//! Great-circle helpers.

const EARTH_RADIUS_NM: f64 = 3440.065;
const EARTH_RADIUS_KM: f64 = 6371.0;

fn central_angle(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Haversine distance in nautical miles.
pub fn haversine_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    EARTH_RADIUS_NM * central_angle(lat1, lon1, lat2, lon2)
}

/// Haversine distance in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    EARTH_RADIUS_KM * central_angle(lat1, lon1, lat2, lon2)
}

/// Initial bearing from the first point to the second, 0..360 degrees.
pub fn initial_bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dlon = (lon2 - lon1).to_radians();
    let y = dlon.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlon.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Round a track to one decimal place.
pub fn round_track(track: f64) -> f32 {
    ((track * 10.0).round() / 10.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_same_point() {
        assert!(haversine_nm(35.0, -82.0, 35.0, -82.0).abs() < 0.001);
        assert!(haversine_km(35.0, -82.0, 35.0, -82.0).abs() < 0.001);
    }

    #[test]
    fn test_haversine_known_distance() {
        // Asheville to Charlotte, about 81 nm
        let d = haversine_nm(35.4362, -82.5418, 35.2140, -80.9431);
        assert!((d - 81.0).abs() < 3.0, "got {d}");
        let km = haversine_km(35.4362, -82.5418, 35.2140, -80.9431);
        assert!((km - d * 1.852).abs() < 1.0);
    }

    #[test]
    fn test_initial_bearing_cardinals() {
        assert!((initial_bearing(0.0, 0.0, 1.0, 0.0) - 0.0).abs() < 0.01);
        assert!((initial_bearing(0.0, 0.0, 0.0, 1.0) - 90.0).abs() < 0.01);
        assert!((initial_bearing(1.0, 0.0, 0.0, 0.0) - 180.0).abs() < 0.01);
        assert!((initial_bearing(0.0, 1.0, 0.0, 0.0) - 270.0).abs() < 0.01);
    }

    #[test]
    fn test_round_track() {
        assert_eq!(round_track(89.96), 90.0);
        assert_eq!(round_track(12.34), 12.3);
    }
}
