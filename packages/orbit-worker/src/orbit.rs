//! orbit.rs — circular-orbit sample kernel
//!
//! Generates per-tick geodetic positions and velocity vectors for an
//! equidistant satellite on an inclined circular orbit. Stateless with
//! respect to the outside world: a track is constructed from the frozen
//! constellation geometry and stepped locally.
//!
//! The per-tick construction: take an equatorial point at the satellite's
//! current baseline longitude and a tangential companion 5° ahead, rotate
//! both into the inclined plane via ECEF, re-wrap the longitude with the
//! plane offset plus accumulated Earth-rotation drift, and scale the unit
//! vector between the two rotated points by the orbital speed.

use nalgebra::Vector3;

use crate::geodesy::{
    ecef_to_geodetic, geodetic_to_ecef, rotate_about_x, wrap_longitude, E_MAX_RADIUS_KM,
    STD_GRAVITY,
};

/// Longitudinal lead of the tangential companion point (degrees).
const TANGENT_LEAD_DEG: f64 = 5.0;

const SECS_PER_DAY: f64 = 24.0 * 60.0 * 60.0;

// ── Constellation geometry ────────────────────────────────────────────────────

/// Immutable after start: the constellation's shape and timing.
#[derive(Debug, Clone)]
pub struct Geometry {
    pub num_planes: u32,
    pub num_sats: u32,
    /// Inclination range (degrees), interpolated across planes
    pub inclination: (f64, f64),
    /// Starting-longitude range (degrees), interpolated across planes
    pub longitude: (f64, f64),
    /// Altitude above the equatorial radius (km)
    pub altitude_km: f64,
    /// Simulated-seconds-per-wall-second factor applied to geometry advance
    pub time_multiplier: f64,
}

impl Geometry {
    /// Tangential speed (km/s) for a circular orbit: `v = √(g·r)` with the
    /// equatorial orbit as reference.
    pub fn orbital_speed_kps(&self) -> f64 {
        (STD_GRAVITY * (self.altitude_km + E_MAX_RADIUS_KM) * 1000.0).sqrt() / 1000.0
    }

    /// Orbital circumference (km).
    pub fn orbital_distance_km(&self) -> f64 {
        std::f64::consts::TAU * (self.altitude_km + E_MAX_RADIUS_KM)
    }

    /// Inter-satellite displacement along the orbit (km).
    pub fn sat_separation_km(&self) -> f64 {
        self.orbital_distance_km() / self.num_sats as f64
    }

    /// Linear interpolation of the inclination across planes; a single
    /// plane takes the low bound.
    pub fn plane_inclination_deg(&self, plane: u32) -> f64 {
        interpolate(self.inclination, plane, self.num_planes)
    }

    pub fn plane_longitude_offset_deg(&self, plane: u32) -> f64 {
        interpolate(self.longitude, plane, self.num_planes)
    }

    /// `--info` diagnostic block.
    pub fn info_text(&self) -> String {
        format!(
            "Information\n  tangential speed (kps): {}\n  orbital distance (km): {}\n  inter-satellite displacement (km): {}",
            self.orbital_speed_kps(),
            self.orbital_distance_km(),
            self.sat_separation_km()
        )
    }
}

fn interpolate((lo, hi): (f64, f64), plane: u32, num_planes: u32) -> f64 {
    if num_planes > 1 {
        lo + (plane - 1) as f64 * (hi - lo) / (num_planes - 1) as f64
    } else {
        lo
    }
}

// ── Per-satellite track ───────────────────────────────────────────────────────

/// One computed sample: geodetic position plus the ECEF velocity vector.
#[derive(Debug, Clone, Copy)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
    pub alt_km: f64,
    pub delx: f64,
    pub dely: f64,
    pub delz: f64,
}

/// Stepping state for one `(plane, ordinal, interval)` producer.
#[derive(Debug, Clone)]
pub struct OrbitTrack {
    inc_deg: f64,
    lon_off_deg: f64,
    /// Baseline longitude advance per tick (degrees)
    del_lon_deg: f64,
    /// Earth-rotation longitude drift per tick (degrees)
    del_rot_deg: f64,
    speed_kps: f64,
    /// Geocentric construction radius passed through the transform (m)
    radius_m: f64,
    cur_lon_deg: f64,
    rot_lon_deg: f64,
}

impl OrbitTrack {
    pub fn new(geometry: &Geometry, plane: u32, ordinal: u32, interval: f64) -> Self {
        let inc_deg = geometry.plane_inclination_deg(plane);
        let speed_kps = geometry.orbital_speed_kps();

        // Simulated seconds per tick drive both longitude deltas.
        let del_time = interval * geometry.time_multiplier;
        let del_dist_km = speed_kps * del_time;

        Self {
            inc_deg,
            lon_off_deg: geometry.plane_longitude_offset_deg(plane),
            del_lon_deg: 360.0 * del_dist_km / geometry.orbital_distance_km(),
            del_rot_deg: 360.0 * inc_deg.to_radians().sin() * del_time / SECS_PER_DAY,
            speed_kps,
            radius_m: (E_MAX_RADIUS_KM + geometry.altitude_km) * 1000.0,
            cur_lon_deg: (ordinal - 1) as f64 * 360.0 / geometry.num_sats as f64,
            rot_lon_deg: 0.0,
        }
    }

    /// Compute the sample for the current tick. `None` when the transform
    /// degenerates (non-finite round-trip) — the producer ends cleanly.
    pub fn sample(&self) -> Option<GeoPoint> {
        let rep_lon = wrap_longitude(self.cur_lon_deg);
        let rep_lon_v = wrap_longitude(rep_lon + TANGENT_LEAD_DEG);
        let radius_v = self.radius_m * TANGENT_LEAD_DEG.to_radians().cos();

        let (lat, lon, height, ecef) = self.transform_point(rep_lon, self.radius_m)?;
        let (_, _, _, ecef_v) = self.transform_point(rep_lon_v, radius_v)?;

        // Velocity: unit vector toward the tangential companion, scaled to
        // the orbital speed.
        let delta: Vector3<f64> = ecef_v - ecef;
        let dist = delta.norm();
        if dist == 0.0 || !dist.is_finite() {
            return None;
        }
        let vel = delta * (self.speed_kps / dist);

        Some(GeoPoint {
            lat,
            lon,
            alt_km: height / 1000.0 - E_MAX_RADIUS_KM,
            delx: vel.x,
            dely: vel.y,
            delz: vel.z,
        })
    }

    /// Incline, then offset: equatorial `(lon, 0, radius)` through the
    /// plane rotation, re-wrapped with the plane offset plus rotation drift.
    /// Returns the geodetic result and its ECEF coordinates.
    fn transform_point(&self, lon_deg: f64, radius_m: f64) -> Option<(f64, f64, f64, Vector3<f64>)> {
        let (mut lat, mut lon, mut height) = (0.0, lon_deg, radius_m);

        if self.inc_deg != 0.0 {
            let ecef = geodetic_to_ecef(lat, lon, height);
            let rotated = rotate_about_x(&ecef, self.inc_deg.to_radians());
            let (lat_r, lon_r, height_r) = ecef_to_geodetic(&rotated);
            if !(lat_r.is_finite() && lon_r.is_finite() && height_r.is_finite()) {
                return None;
            }
            lat = lat_r;
            lon = lon_r;
            height = height_r;
        }

        lon = wrap_longitude(lon + self.lon_off_deg + self.rot_lon_deg);
        let ecef = geodetic_to_ecef(lat, lon, height);
        Some((lat, lon, height, ecef))
    }

    /// Advance the baseline longitude and rotation drift by one tick.
    pub fn advance(&mut self) {
        self.cur_lon_deg = wrap_longitude(self.cur_lon_deg + self.del_lon_deg);
        self.rot_lon_deg += self.del_rot_deg;
    }
}
