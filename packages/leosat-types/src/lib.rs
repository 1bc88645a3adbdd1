//! # leosat-types
//!
//! Shared data model for the LeoSat constellation suite.
//!
//! These types are used by:
//! - `controller`: registration table keys, command filters, bus payloads
//! - `packages/orbit-worker`: geo samples, endpoint schedules, HIL identity
//! - `packages/leosat-bus`: topic names and JSON payload shapes
//!
//! ## Conventions
//!
//! - **Plane / ordinal** are 1-based (`1 ≤ plane ≤ num_planes`,
//!   `1 ≤ ordinal ≤ num_sats`).
//! - **Interval** is a sampling period in seconds, strictly positive, fixed
//!   at configuration time. It participates in key identity bit-for-bit.
//! - Wire payloads are JSON objects; field names match the legacy REST and
//!   bus contract (`start-time`, `num-sats`, ...).

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod config;
pub mod filter;

pub use filter::{BoundFilter, FilterError};

// ── Bus topics ────────────────────────────────────────────────────────────────

/// Topic names published by the controller and filtered by byte-prefix on the
/// subscriber side.
pub mod topics {
    pub const START: &str = "start";
    pub const STOP: &str = "stop";
    pub const DEBUG: &str = "debug";
    pub const EXFILT: &str = "exfilt";
    pub const THIRD_PARTY: &str = "thirdParty";
}

// ── Sidecar colors ────────────────────────────────────────────────────────────

/// Marker colors attached to geo samples by sidecar state (Tailwind background
/// classes consumed by the map/table visualization sinks).
pub mod colors {
    pub const DEBUG: &str = "bg-yellow-500";
    pub const EXFILT: &str = "bg-red-500";
    pub const DEBUG_AND_EXFILT: &str = "bg-pink-500";
    pub const HIL: &str = "bg-green-500";
}

// ── Satellite interval key ────────────────────────────────────────────────────

/// Unit of registration: one producer per `(plane, ordinal, interval)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SatIntervalKey {
    pub plane: u32,
    pub ordinal: u32,
    pub interval: f64,
}

impl SatIntervalKey {
    pub fn new(plane: u32, ordinal: u32, interval: f64) -> Self {
        Self { plane, ordinal, interval }
    }

    /// `PP_SS` form used by the controller's info report.
    pub fn plane_ordinal_tag(&self) -> String {
        format!("{:02}_{:02}", self.plane, self.ordinal)
    }

    /// `leosat-PP-SS` label carried in every geo sample.
    pub fn label(&self) -> String {
        format!("leosat-{:02}-{:02}", self.plane, self.ordinal)
    }
}

// Intervals come from configuration, never from arithmetic, so comparing the
// exact bit pattern is well-defined and lets the key live in hash maps.
impl PartialEq for SatIntervalKey {
    fn eq(&self, other: &Self) -> bool {
        self.plane == other.plane
            && self.ordinal == other.ordinal
            && self.interval.to_bits() == other.interval.to_bits()
    }
}

impl Eq for SatIntervalKey {}

impl std::hash::Hash for SatIntervalKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.plane.hash(state);
        self.ordinal.hash(state);
        self.interval.to_bits().hash(state);
    }
}

impl fmt::Display for SatIntervalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.plane, self.ordinal, self.interval)
    }
}

// ── Interval map key ──────────────────────────────────────────────────────────

/// A positive, finite sampling interval usable as an ordered map key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalKey(f64);

impl IntervalKey {
    pub fn new(secs: f64) -> Option<Self> {
        (secs.is_finite() && secs > 0.0).then_some(Self(secs))
    }

    pub fn get(&self) -> f64 {
        self.0
    }
}

impl Eq for IntervalKey {}

impl PartialOrd for IntervalKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IntervalKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl std::hash::Hash for IntervalKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl fmt::Display for IntervalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Endpoint schedule: sampling interval → telemetry POST targets bound to it.
pub type EndpointSchedule = BTreeMap<IntervalKey, Vec<String>>;

/// HIL table: hostname → (plane, ordinal).
pub type HilTable = BTreeMap<String, (u32, u32)>;

// ── Geo sample ────────────────────────────────────────────────────────────────

/// One telemetry record POSTed to every endpoint bound to the producing
/// thread's interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoSample {
    /// `leosat-PP-SS`
    pub label: String,
    pub plane: u32,
    pub ordinal: u32,
    pub interval: f64,
    /// Simulated seconds since the producer's first tick
    pub time: f64,
    /// Degrees, `[-90, 90]`
    pub lat: f64,
    /// Degrees, `[-180, 180]`
    pub lon: f64,
    /// Kilometers above the reference equatorial radius
    pub alt: f64,
    /// Velocity vector components (km/s, ECEF frame)
    pub delx: f64,
    pub dely: f64,
    pub delz: f64,
    /// Marker color set by sidecar state; omitted when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

// ── Bus command payload ───────────────────────────────────────────────────────

/// JSON payload shape shared by every bus topic. `plane` and `ordinal` may
/// each be absent, a scalar, or a `[lo, hi]`-style range (see
/// [`filter::BoundFilter`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandMsg {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plane: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordinal: Option<Value>,
    /// `"sat"` (or absent) routes to orbit workers, `"hil"` expands via the
    /// HIL table, `"thirdParty"` targets the third-party worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    /// Sidecar toggles default to enable when the field is absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable: Option<bool>,
    /// Substituted per-host by the controller's HIL stop expansion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Carried by the `start` topic: wall-clock seconds since the Unix epoch.
    #[serde(rename = "start-time", skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,
}

impl CommandMsg {
    pub fn enabled(&self) -> bool {
        self.enable.unwrap_or(true)
    }

    /// Class routing for orbit workers: absent or `"sat"`.
    pub fn is_sat_class(&self) -> bool {
        matches!(self.class.as_deref(), None | Some("sat"))
    }

    /// Class routing for the third-party worker: absent or `"thirdParty"`.
    pub fn is_third_party_class(&self) -> bool {
        matches!(self.class.as_deref(), None | Some("thirdParty"))
    }
}

// ── Wall clock ────────────────────────────────────────────────────────────────

/// Seconds since the Unix epoch as `f64` (start times and pacing targets are
/// compared in this unit across processes).
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sat_interval_key_identity_includes_interval_bits() {
        let a = SatIntervalKey::new(1, 2, 10.0);
        let b = SatIntervalKey::new(1, 2, 10.0);
        let c = SatIntervalKey::new(1, 2, 5.0);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = std::collections::HashSet::new();
        set.insert(a);
        set.insert(b);
        set.insert(c);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn key_labels() {
        let k = SatIntervalKey::new(3, 12, 5.0);
        assert_eq!(k.plane_ordinal_tag(), "03_12");
        assert_eq!(k.label(), "leosat-03-12");
    }

    #[test]
    fn geo_sample_omits_unset_color() {
        let sample = GeoSample {
            label: "leosat-01-01".into(),
            plane: 1,
            ordinal: 1,
            interval: 10.0,
            time: 0.0,
            lat: 0.0,
            lon: 0.0,
            alt: 800.0,
            delx: 0.0,
            dely: 0.0,
            delz: 0.0,
            color: None,
        };
        let json = serde_json::to_value(&sample).unwrap();
        assert!(json.get("color").is_none());
        assert_eq!(json["label"], "leosat-01-01");
    }

    #[test]
    fn command_msg_roundtrip() {
        let msg: CommandMsg =
            serde_json::from_str(r#"{"plane": 2, "ordinal": [1, 3], "enable": false}"#).unwrap();
        assert!(!msg.enabled());
        assert!(msg.is_sat_class());

        let start: CommandMsg = serde_json::from_str(r#"{"start-time": 1700000000.5}"#).unwrap();
        assert_eq!(start.start_time, Some(1_700_000_000.5));
    }

    #[test]
    fn interval_key_rejects_nonpositive() {
        assert!(IntervalKey::new(0.0).is_none());
        assert!(IntervalKey::new(-1.0).is_none());
        assert!(IntervalKey::new(f64::NAN).is_none());
        assert_eq!(IntervalKey::new(2.5).unwrap().get(), 2.5);
    }
}
