//! config.rs — orbit options and identity resolution
//!
//! The grid and controller option groups come from `leosat-types`; this
//! module adds the orbit-physics options shared by the worker binaries and
//! the environment-driven HIL identity lookup.

use anyhow::{bail, Context};
use leosat_types::config::{
    altitude_arg, hhmmss_arg, inclination_arg, longitude_arg, positive_float, GridOpts,
};

use crate::orbit::Geometry;

/// Orbit-physics options layered on top of the constellation grid.
#[derive(clap::Args, Debug, Clone)]
pub struct OrbitOpts {
    /// Orbital duration in simulated seconds, `[[hh:]mm:]ss`
    #[arg(short = 'D', long, value_parser = hhmmss_arg)]
    pub duration: Option<u64>,

    /// Orbit inclination (degrees), a value or range used across planes
    #[arg(long, value_parser = inclination_arg, default_value = "0.0")]
    pub inclination: (f64, f64),

    /// Starting longitude (degrees), a value or range used across planes
    #[arg(long, value_parser = longitude_arg, default_value = "0.0")]
    pub longitude: (f64, f64),

    /// Altitude in km, open range (200, 2000)
    #[arg(short = 'A', long, value_parser = altitude_arg, default_value_t = 800.0)]
    pub altitude: f64,

    /// Simulated seconds per interval second
    #[arg(short = 'T', long = "time-multiplier", value_parser = positive_float, default_value_t = 1.0)]
    pub time_multiplier: f64,

    /// Add a wall-clock column to debug CSV rows
    #[arg(short = 'R', long = "real-time")]
    pub real_time: bool,

    /// Emission start, seconds since the Unix epoch (`[[hh:]mm:]ss` form);
    /// normally supplied by the controller's start broadcast instead
    #[arg(long = "start-time", value_parser = hhmmss_arg)]
    pub start_time: Option<u64>,

    /// Output file template; `{plane}`, `{ordinal}`, `{interval}`,
    /// `{num-sats}` and `{num-planes}` are substituted
    #[arg(short = 'F', long, default_value = "sat_{plane}_{ordinal}.csv")]
    pub format: String,

    /// Display orbit diagnostics at startup
    #[arg(long)]
    pub info: bool,

    #[arg(short = 'd', long, hide = true)]
    pub debug: bool,
}

impl OrbitOpts {
    pub fn duration_secs(&self) -> Option<f64> {
        self.duration.map(|d| d as f64)
    }

    pub fn start_time_secs(&self) -> Option<f64> {
        self.start_time.map(|t| t as f64)
    }
}

/// Worker logging: env filter wins, the hidden debug flag upgrades the
/// default directive to debug level.
pub fn init_worker_logging(default_directive: &str, debug: bool) {
    let directive = if debug {
        default_directive.replace("info", "debug")
    } else {
        default_directive.to_string()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| directive.into()),
        )
        .init();
}

/// Freeze the constellation geometry from the parsed options.
pub fn geometry_from(grid: &GridOpts, orbit: &OrbitOpts) -> Geometry {
    Geometry {
        num_planes: grid.num_planes,
        num_sats: grid.num_sats,
        inclination: orbit.inclination,
        longitude: orbit.longitude,
        altitude_km: orbit.altitude,
        time_multiplier: orbit.time_multiplier,
    }
}

/// Full `(plane, ordinal)` grid for the constellation-wide worker.
pub fn grid_identities(grid: &GridOpts) -> Vec<(u32, u32)> {
    let mut identities = Vec::with_capacity((grid.num_planes * grid.num_sats) as usize);
    for plane in 1..=grid.num_planes {
        for ordinal in 1..=grid.num_sats {
            identities.push((plane, ordinal));
        }
    }
    identities
}

/// HIL identity: `PLANE`/`ORDINAL` environment overrides win, otherwise
/// `HZN_NODE_ID` is looked up in the HIL table. Missing or out-of-range
/// identity is fatal at startup.
pub fn resolve_hil_identity(grid: &GridOpts) -> anyhow::Result<(String, u32, u32)> {
    if let (Ok(plane), Ok(ordinal)) = (std::env::var("PLANE"), std::env::var("ORDINAL")) {
        let plane: u32 = plane.parse().context("PLANE environment variable")?;
        let ordinal: u32 = ordinal.parse().context("ORDINAL environment variable")?;
        check_identity(grid, plane, ordinal)?;
        let host = std::env::var("HZN_NODE_ID").unwrap_or_else(|_| "static".into());
        return Ok((host, plane, ordinal));
    }

    let Ok(node_id) = std::env::var("HZN_NODE_ID") else {
        bail!("bad or missing HZN_NODE_ID environment variable");
    };
    let Some(&(plane, ordinal)) = grid.hil_table().get(&node_id) else {
        bail!("HZN_NODE_ID \"{node_id}\" is not present in the HIL table");
    };
    check_identity(grid, plane, ordinal)?;
    Ok((node_id, plane, ordinal))
}

fn check_identity(grid: &GridOpts, plane: u32, ordinal: u32) -> anyhow::Result<()> {
    if !(1..=grid.num_planes).contains(&plane) {
        bail!("plane {plane} not in closed range (1..{})", grid.num_planes);
    }
    if !(1..=grid.num_sats).contains(&ordinal) {
        bail!("ordinal {ordinal} not in closed range (1..{})", grid.num_sats);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestArgs {
        #[command(flatten)]
        grid: GridOpts,
        #[command(flatten)]
        orbit: OrbitOpts,
    }

    #[test]
    fn orbit_defaults() {
        let args = TestArgs::parse_from(["test", "--num-sats", "7"]);
        assert_eq!(args.orbit.inclination, (0.0, 0.0));
        assert_eq!(args.orbit.altitude, 800.0);
        assert_eq!(args.orbit.time_multiplier, 1.0);
        assert_eq!(args.orbit.format, "sat_{plane}_{ordinal}.csv");
        assert_eq!(args.grid.interval, 10.0);
        assert_eq!(args.grid.num_planes, 1);
    }

    #[test]
    fn orbit_ranges_parse() {
        let args = TestArgs::parse_from([
            "test",
            "--num-sats",
            "14",
            "--num-planes",
            "2",
            "--inclination",
            "44.0..55.0",
            "--longitude",
            "0.0..35.0",
            "--duration",
            "1:00:00",
            "--start-time",
            "18:00:00",
        ]);
        assert_eq!(args.orbit.inclination, (44.0, 55.0));
        assert_eq!(args.orbit.longitude, (0.0, 35.0));
        assert_eq!(args.orbit.duration_secs(), Some(3600.0));
        assert_eq!(args.orbit.start_time_secs(), Some(64800.0));
    }

    #[test]
    fn grid_identities_cover_the_constellation() {
        let args = TestArgs::parse_from(["test", "--num-sats", "3", "--num-planes", "2"]);
        let ids = grid_identities(&args.grid);
        assert_eq!(ids.len(), 6);
        assert_eq!(ids[0], (1, 1));
        assert_eq!(ids[5], (2, 3));
    }
}
