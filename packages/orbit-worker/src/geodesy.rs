//! geodesy.rs — WGS-84 transforms
//!
//! Pure math shared by the orbit kernel: geodetic↔ECEF conversion, the
//! x-axis rotation that inclines an orbital plane, and longitude wrapping
//! into `[-180, 180]`.

use nalgebra::{Rotation3, Vector3};

// WGS 84
pub const E_MAX_RADIUS_KM: f64 = 6378.137;
pub const E_MIN_RADIUS_KM: f64 = 6356.752314245;
pub const STD_GRAVITY: f64 = 9.80665; // m/s²

const WGS84_A_M: f64 = E_MAX_RADIUS_KM * 1000.0;
const WGS84_B_M: f64 = E_MIN_RADIUS_KM * 1000.0;

/// First eccentricity squared.
fn e2() -> f64 {
    1.0 - (WGS84_B_M * WGS84_B_M) / (WGS84_A_M * WGS84_A_M)
}

/// Wrap a longitude (degrees) into `[-180, 180]`.
pub fn wrap_longitude(lon: f64) -> f64 {
    let mut lon = lon % 360.0;
    if lon > 180.0 {
        lon -= 360.0;
    } else if lon < -180.0 {
        lon += 360.0;
    }
    lon
}

/// Geodetic `(lat°, lon°, height m above the ellipsoid)` → ECEF meters.
pub fn geodetic_to_ecef(lat_deg: f64, lon_deg: f64, height_m: f64) -> Vector3<f64> {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();

    let n = WGS84_A_M / (1.0 - e2() * sin_lat * sin_lat).sqrt();
    Vector3::new(
        (n + height_m) * cos_lat * cos_lon,
        (n + height_m) * cos_lat * sin_lon,
        (n * (1.0 - e2()) + height_m) * sin_lat,
    )
}

/// ECEF meters → geodetic `(lat°, lon°, height m)`.
///
/// Fixed-point iteration on the latitude; converges well below 1 µm for the
/// whole LEO envelope. Non-finite input propagates to non-finite output so
/// the caller can detect a degenerate transform.
pub fn ecef_to_geodetic(v: &Vector3<f64>) -> (f64, f64, f64) {
    let (x, y, z) = (v.x, v.y, v.z);
    let p = x.hypot(y);
    let lon = y.atan2(x);

    // On (or numerically at) the polar axis the longitude is arbitrary.
    if p < 1e-9 {
        let lat = if z >= 0.0 {
            std::f64::consts::FRAC_PI_2
        } else {
            -std::f64::consts::FRAC_PI_2
        };
        return (lat.to_degrees(), lon.to_degrees(), z.abs() - WGS84_B_M);
    }

    let mut lat = z.atan2(p * (1.0 - e2()));
    let mut height = 0.0;
    for _ in 0..12 {
        let sin_lat = lat.sin();
        let n = WGS84_A_M / (1.0 - e2() * sin_lat * sin_lat).sqrt();
        height = p / lat.cos() - n;
        let next = (z / p / (1.0 - e2() * n / (n + height))).atan();
        if (next - lat).abs() < 1e-13 {
            lat = next;
            break;
        }
        lat = next;
    }

    (lat.to_degrees(), lon.to_degrees(), height)
}

/// Rotate an ECEF point about the x-axis (inclines the orbital plane).
pub fn rotate_about_x(v: &Vector3<f64>, angle_rad: f64) -> Vector3<f64> {
    Rotation3::from_axis_angle(&Vector3::x_axis(), angle_rad) * v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_longitudes() {
        assert_eq!(wrap_longitude(0.0), 0.0);
        assert_eq!(wrap_longitude(180.0), 180.0);
        assert_eq!(wrap_longitude(190.0), -170.0);
        assert_eq!(wrap_longitude(-190.0), 170.0);
        assert_eq!(wrap_longitude(365.0), 5.0);
        assert_eq!(wrap_longitude(725.0), 5.0);
    }

    #[test]
    fn ecef_roundtrip_within_a_micron() {
        // Heights cover the LEO envelope plus the kernel's inflated radius.
        for &lat in &[-89.0, -45.0, -0.1, 0.0, 23.4, 45.0, 89.0] {
            for &lon in &[-179.9, -90.0, 0.0, 5.0, 90.0, 179.9] {
                for &h in &[200_000.0, 800_000.0, 2_000_000.0, 7_178_137.0] {
                    let ecef = geodetic_to_ecef(lat, lon, h);
                    let (lat2, lon2, h2) = ecef_to_geodetic(&ecef);
                    let back = geodetic_to_ecef(lat2, lon2, h2);
                    let err = (back - ecef).norm();
                    assert!(err < 1e-6, "roundtrip {err} m at ({lat}, {lon}, {h})");
                }
            }
        }
    }

    #[test]
    fn equator_reference_point() {
        let ecef = geodetic_to_ecef(0.0, 0.0, 0.0);
        assert!((ecef.x - E_MAX_RADIUS_KM * 1000.0).abs() < 1e-6);
        assert!(ecef.y.abs() < 1e-6);
        assert!(ecef.z.abs() < 1e-6);
    }

    #[test]
    fn polar_heights() {
        let ecef = geodetic_to_ecef(90.0, 0.0, 1000.0);
        let (lat, _, h) = ecef_to_geodetic(&ecef);
        assert!((lat - 90.0).abs() < 1e-9);
        assert!((h - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn x_rotation_inclines_the_plane() {
        // A point on the y-axis rotated 90° about x lands on the z-axis.
        let v = Vector3::new(0.0, 1000.0, 0.0);
        let rotated = rotate_about_x(&v, std::f64::consts::FRAC_PI_2);
        assert!(rotated.y.abs() < 1e-9);
        assert!((rotated.z - 1000.0).abs() < 1e-9);

        // Points on the rotation axis are fixed.
        let axis_point = Vector3::new(123.0, 0.0, 0.0);
        let fixed = rotate_about_x(&axis_point, 1.0);
        assert!((fixed - axis_point).norm() < 1e-12);
    }
}
