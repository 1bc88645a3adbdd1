//! config.rs — typed argument loading for every binary in the suite
//!
//! Configuration comes from one of two places, selected by the `CLI`
//! environment variable:
//!   - `CLI` set: the process argv is parsed directly with clap;
//!   - `CLI` unset: the single positional argument names a JSON file whose
//!     keys mirror the CLI long options; the file is expanded into an argv
//!     vector and parsed by the same clap command, so both sources share one
//!     validator set.
//!
//! The value parsers below back the clap `value_parser` attributes. Each one
//! rejects with a user-facing message; configuration errors are fatal at
//! startup.

use std::collections::BTreeMap;
use std::net::ToSocketAddrs;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use crate::{EndpointSchedule, HilTable, IntervalKey};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read \"{path}\": {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("\"{path}\" is not a JSON object: {detail}")]
    BadJson { path: String, detail: String },
}

// ── Endpoint types ────────────────────────────────────────────────────────────

/// Validated `http://host:port[/path]` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpEndpoint {
    pub url: String,
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for HttpEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}

/// Validated `tcp://host:port` endpoint (bus coordination socket).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpEndpoint {
    pub url: String,
    pub host: String,
    pub port: u16,
}

impl TcpEndpoint {
    /// `host:port` form for `TcpStream::connect`.
    pub fn connect_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `0.0.0.0:port` form for the binding side.
    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

impl std::fmt::Display for TcpEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}

/// `URL[,interval]` — telemetry endpoint with an optional sampling cadence.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedEndpoint {
    pub url: String,
    pub interval: Option<f64>,
}

/// `host|plane,ordinal` (or `host|ordinal`, plane defaulting to 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HilSpec {
    pub host: String,
    pub plane: u32,
    pub ordinal: u32,
}

// ── Scalar value parsers ──────────────────────────────────────────────────────

/// Satellites / planes per plane: integer ≥ 1.
pub fn count_arg(s: &str) -> Result<u32, String> {
    let v: u32 = s.parse().map_err(|_| format!("{s} is not an integer"))?;
    if v >= 1 {
        Ok(v)
    } else {
        Err(format!("{v} < 1"))
    }
}

/// Strictly positive float (sampling interval, time multiplier).
pub fn positive_float(s: &str) -> Result<f64, String> {
    let v: f64 = s.parse().map_err(|_| format!("{s} is not a number"))?;
    if v.is_finite() && v > 0.0 {
        Ok(v)
    } else {
        Err(format!("{v} is not > 0"))
    }
}

/// Altitude in km, open range (200, 2000).
pub fn altitude_arg(s: &str) -> Result<f64, String> {
    let v: f64 = s.parse().map_err(|_| format!("{s} is not a number"))?;
    if v > 200.0 && v < 2000.0 {
        Ok(v)
    } else {
        Err(format!("{v} not in open range (200..2000)"))
    }
}

fn bounded_float(s: &str, min: f64, max: f64) -> Result<f64, String> {
    let v: f64 = s
        .trim()
        .parse()
        .map_err(|_| format!("{s} is not a number"))?;
    if v >= min && v <= max {
        Ok(v)
    } else {
        Err(format!("{v} not in closed range ({min}..{max})"))
    }
}

fn float_span(s: &str, min: f64, max: f64, ordered: bool) -> Result<(f64, f64), String> {
    for sep in [", ", ": ", ",", ":", "..", " "] {
        let parts: Vec<&str> = s.split(sep).collect();
        if parts.len() == 2 {
            let lo = bounded_float(parts[0], min, max)?;
            let hi = bounded_float(parts[1], min, max)?;
            if ordered && lo > hi {
                return Err(format!("\"{s}\" is not an ordered range"));
            }
            return Ok((lo, hi));
        }
    }
    let v = bounded_float(s, min, max)?;
    Ok((v, v))
}

/// Inclination: single value or ordered range within `[-90, 90]` degrees.
pub fn inclination_arg(s: &str) -> Result<(f64, f64), String> {
    float_span(s, -90.0, 90.0, true)
}

/// Starting longitude: single value or range within `[-180, 180]` degrees
/// (unordered — a descending span is a valid westward fan).
pub fn longitude_arg(s: &str) -> Result<(f64, f64), String> {
    float_span(s, -180.0, 180.0, false)
}

/// `[[hh:]mm:]ss` → whole seconds. Minute and second fields are bounded to
/// 0..59 when a larger unit precedes them.
pub fn hhmmss_arg(s: &str) -> Result<u64, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(format!("bad duration (\"{s}\")"));
    }

    let mut total: u64 = 0;
    for (i, part) in parts.iter().enumerate() {
        let v: u64 = part
            .trim()
            .parse()
            .map_err(|_| format!("bad duration (\"{s}\")"))?;
        if i > 0 && v > 59 {
            return Err(format!("bad duration (\"{s}\"): {v} > 59"));
        }
        total = total * 60 + v;
    }
    Ok(total)
}

// ── Endpoint parsers ──────────────────────────────────────────────────────────

fn split_endpoint(ep: &str, scheme: &str) -> Result<(String, u16), String> {
    let rest = ep
        .strip_prefix(&format!("{scheme}://"))
        .ok_or_else(|| format!("invalid \"{scheme}\" endpoint (\"{ep}\")"))?;
    let authority = rest.split('/').next().unwrap_or_default();
    let (host, port) = authority
        .split_once(':')
        .ok_or_else(|| format!("invalid \"{scheme}\" endpoint (\"{ep}\"): missing port"))?;

    let port: u16 = port
        .parse()
        .map_err(|_| format!("invalid \"{scheme}\" endpoint (\"{ep}\"): bad port"))?;
    if !(1024..=49151).contains(&port) {
        return Err(format!(
            "invalid \"{scheme}\" endpoint (\"{ep}\"): port {port} outside 1024..49151"
        ));
    }
    if host.is_empty() {
        return Err(format!("invalid \"{scheme}\" endpoint (\"{ep}\"): empty host"));
    }

    // Resolvability check; unresolvable hostnames are a startup error.
    (host, port)
        .to_socket_addrs()
        .map_err(|e| format!("invalid \"{scheme}\" endpoint (\"{ep}\"): {e}"))?;

    Ok((host.to_string(), port))
}

pub fn http_endpoint_arg(ep: &str) -> Result<HttpEndpoint, String> {
    let (host, port) = split_endpoint(ep, "http")?;
    Ok(HttpEndpoint { url: ep.to_string(), host, port })
}

pub fn tcp_endpoint_arg(ep: &str) -> Result<TcpEndpoint, String> {
    let (host, port) = split_endpoint(ep, "tcp")?;
    Ok(TcpEndpoint { url: ep.to_string(), host, port })
}

/// `URL[,interval]`.
pub fn timed_endpoint_arg(s: &str) -> Result<TimedEndpoint, String> {
    let parts: Vec<&str> = s.split(',').collect();
    match parts.len() {
        1 => {
            let ep = http_endpoint_arg(parts[0])?;
            Ok(TimedEndpoint { url: ep.url, interval: None })
        }
        2 => {
            let ep = http_endpoint_arg(parts[0])?;
            let interval = positive_float(parts[1])?;
            Ok(TimedEndpoint { url: ep.url, interval: Some(interval) })
        }
        _ => Err(format!("invalid timed HTTP endpoint (\"{s}\")")),
    }
}

/// `host|plane,ordinal` or `host|ordinal`.
pub fn hil_arg(s: &str) -> Result<HilSpec, String> {
    let (host, spec) = s
        .split_once('|')
        .ok_or_else(|| format!("invalid HIL (\"{s}\")"))?;
    let host = host.trim();
    if host.is_empty() {
        return Err(format!("invalid HIL (\"{s}\")"));
    }

    let nums: Vec<&str> = spec.split(',').collect();
    let (plane, ordinal) = match nums.len() {
        1 => (1, parse_index(nums[0], s)?),
        2 => (parse_index(nums[0], s)?, parse_index(nums[1], s)?),
        _ => return Err(format!("invalid HIL (\"{s}\")")),
    };

    Ok(HilSpec { host: host.to_string(), plane, ordinal })
}

fn parse_index(part: &str, whole: &str) -> Result<u32, String> {
    part.trim()
        .parse()
        .map_err(|_| format!("invalid HIL (\"{whole}\")"))
}

// ── Derived tables ────────────────────────────────────────────────────────────

/// Group timed endpoints by interval, defaulting to `default_interval` when
/// a URL carries no cadence of its own. Insertion order per interval is kept.
pub fn endpoint_schedule(default_interval: f64, endpoints: &[TimedEndpoint]) -> EndpointSchedule {
    let mut schedule: EndpointSchedule = BTreeMap::new();
    for ep in endpoints {
        let interval = ep.interval.unwrap_or(default_interval);
        if let Some(key) = IntervalKey::new(interval) {
            schedule.entry(key).or_default().push(ep.url.clone());
        }
    }
    schedule
}

pub fn hil_table(specs: &[HilSpec]) -> HilTable {
    specs
        .iter()
        .map(|h| (h.host.clone(), (h.plane, h.ordinal)))
        .collect()
}

// ── Shared option groups ──────────────────────────────────────────────────────

/// Constellation grid options common to the controller and every worker.
#[derive(clap::Args, Debug, Clone)]
pub struct GridOpts {
    /// Number of satellites per plane (> 0)
    #[arg(short = 'N', long = "num-sats", value_parser = count_arg)]
    pub num_sats: u32,

    /// Number of orbital planes (> 0)
    #[arg(long = "num-planes", default_value_t = 1, value_parser = count_arg)]
    pub num_planes: u32,

    /// Default sample interval in seconds
    #[arg(short = 'I', long, default_value_t = 10.0, value_parser = positive_float)]
    pub interval: f64,

    /// Position application REST endpoint, `URL[,interval]` (repeatable)
    #[arg(short = 'E', long = "endpoint", value_parser = timed_endpoint_arg)]
    pub endpoint: Vec<TimedEndpoint>,

    /// Hardware-In-the-Loop identity, `host|plane,ordinal` (repeatable)
    #[arg(short = 'H', long = "HIL", value_parser = hil_arg)]
    pub hil: Vec<HilSpec>,
}

impl GridOpts {
    pub fn schedule(&self) -> EndpointSchedule {
        endpoint_schedule(self.interval, &self.endpoint)
    }

    pub fn hil_table(&self) -> HilTable {
        hil_table(&self.hil)
    }
}

/// Controller coordination endpoints shared by workers and the controller
/// itself (which binds the same addresses it advertises).
#[derive(clap::Args, Debug, Clone)]
pub struct ControlOpts {
    /// Controller registration endpoint base, e.g. `http://10.100.100.100:16171/nodes`
    #[arg(long = "Q-endpoint", value_parser = http_endpoint_arg)]
    pub q_endpoint: HttpEndpoint,

    /// Controller coordination publication socket, e.g. `tcp://10.100.100.100:12343`
    #[arg(long = "Q-ZMQ-pub", value_parser = tcp_endpoint_arg)]
    pub q_zmq_pub: TcpEndpoint,
}

// ── CLI / JSON selection ──────────────────────────────────────────────────────

/// `CLI` present in the environment selects argv parsing over JSON files.
pub fn cli_selected() -> bool {
    std::env::var_os("CLI").is_some()
}

/// Expand a JSON configuration object into an argv vector for clap.
///
/// Keys mirror the CLI long options. Values map as:
///   - `true` → bare flag, `false`/`null` → omitted
///   - array → the flag repeated per element
///   - object (HIL maps) → `--flag host|value` per entry, arrays fanned out
///   - string/number → `--flag value`
pub fn json_to_args(prog: &str, path: &Path) -> Result<Vec<String>, ConfigError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: display.clone(),
        source,
    })?;
    let doc: Value = serde_json::from_str(&raw).map_err(|e| ConfigError::BadJson {
        path: display.clone(),
        detail: e.to_string(),
    })?;
    let obj = doc.as_object().ok_or_else(|| ConfigError::BadJson {
        path: display.clone(),
        detail: "top-level value is not an object".into(),
    })?;

    let mut argv = vec![prog.to_string()];
    for (key, value) in obj {
        let flag = format!("--{key}");
        match value {
            Value::Bool(true) => argv.push(flag),
            Value::Bool(false) | Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    argv.push(flag.clone());
                    argv.push(scalar_to_string(item));
                }
            }
            Value::Object(map) => {
                for (mk, mv) in map {
                    match mv {
                        Value::Array(items) => {
                            for item in items {
                                argv.push(flag.clone());
                                argv.push(format!("{mk}|{}", scalar_to_string(item)));
                            }
                        }
                        other => {
                            argv.push(flag.clone());
                            argv.push(format!("{mk}|{}", scalar_to_string(other)));
                        }
                    }
                }
            }
            other => {
                argv.push(flag);
                argv.push(scalar_to_string(other));
            }
        }
    }
    Ok(argv)
}

fn scalar_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse configuration for a binary: argv when `CLI` is set, otherwise the
/// JSON file named by the first positional argument. Errors print a
/// user-facing message and exit non-zero, matching clap's own behavior.
pub fn load_args<T: clap::Parser>(bin: &str) -> T {
    if cli_selected() {
        return T::parse();
    }

    let path = match std::env::args().nth(1) {
        Some(p) => p,
        None => {
            eprintln!("usage: {bin} CONFIG.json   (or set CLI=1 for command-line options)");
            std::process::exit(1);
        }
    };

    match json_to_args(bin, Path::new(&path)) {
        Ok(argv) => T::parse_from(argv),
        Err(e) => {
            eprintln!("ERROR: {e}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(hhmmss_arg("45").unwrap(), 45);
        assert_eq!(hhmmss_arg("90").unwrap(), 90); // bare seconds are unbounded
        assert_eq!(hhmmss_arg("2:05").unwrap(), 125);
        assert_eq!(hhmmss_arg("1:00:00").unwrap(), 3600);
        assert_eq!(hhmmss_arg("18:00:00").unwrap(), 64800);
        assert!(hhmmss_arg("1:99").is_err());
        assert!(hhmmss_arg("1:2:3:4").is_err());
        assert!(hhmmss_arg("abc").is_err());
    }

    #[test]
    fn spans() {
        assert_eq!(inclination_arg("44..55").unwrap(), (44.0, 55.0));
        assert_eq!(inclination_arg("90").unwrap(), (90.0, 90.0));
        assert_eq!(longitude_arg("35,0").unwrap(), (35.0, 0.0)); // unordered ok
        assert!(inclination_arg("55..44").is_err());
        assert!(inclination_arg("0..91").is_err());
        assert!(longitude_arg("-200").is_err());
    }

    #[test]
    fn altitude_open_range() {
        assert_eq!(altitude_arg("800").unwrap(), 800.0);
        assert!(altitude_arg("200").is_err());
        assert!(altitude_arg("2000").is_err());
    }

    #[test]
    fn endpoints() {
        let ep = http_endpoint_arg("http://127.0.0.1:15052/api/marker").unwrap();
        assert_eq!(ep.host, "127.0.0.1");
        assert_eq!(ep.port, 15052);

        let tcp = tcp_endpoint_arg("tcp://127.0.0.1:12343").unwrap();
        assert_eq!(tcp.connect_addr(), "127.0.0.1:12343");
        assert_eq!(tcp.bind_addr(), "0.0.0.0:12343");

        assert!(http_endpoint_arg("ftp://127.0.0.1:8080").is_err());
        assert!(http_endpoint_arg("http://127.0.0.1").is_err());
        assert!(http_endpoint_arg("http://127.0.0.1:80").is_err()); // below 1024
        assert!(tcp_endpoint_arg("tcp://127.0.0.1:60000").is_err());
    }

    #[test]
    fn timed_endpoints_and_schedule() {
        let plain = timed_endpoint_arg("http://127.0.0.1:15052/api/marker").unwrap();
        assert_eq!(plain.interval, None);
        let timed = timed_endpoint_arg("http://127.0.0.1:15053/api/marker,2.5").unwrap();
        assert_eq!(timed.interval, Some(2.5));
        assert!(timed_endpoint_arg("http://h:1,2,3").is_err());

        let schedule = endpoint_schedule(10.0, &[plain, timed.clone(), timed]);
        assert_eq!(schedule.len(), 2);
        let k10 = IntervalKey::new(10.0).unwrap();
        let k25 = IntervalKey::new(2.5).unwrap();
        assert_eq!(schedule[&k10].len(), 1);
        assert_eq!(schedule[&k25].len(), 2);
    }

    #[test]
    fn hil_specs() {
        let full = hil_arg("node-7|2,3").unwrap();
        assert_eq!((full.plane, full.ordinal), (2, 3));
        let short = hil_arg("node-7|4").unwrap();
        assert_eq!((short.plane, short.ordinal), (1, 4));
        assert!(hil_arg("node-7").is_err());
        assert!(hil_arg("|1,2").is_err());
        assert!(hil_arg("h|1,2,3").is_err());

        let table = hil_table(&[full, short]);
        assert_eq!(table["node-7"], (1, 4)); // later spec wins per host
    }

    #[test]
    fn json_expansion() {
        let dir = std::env::temp_dir().join("leosat-types-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("const.json");
        std::fs::write(
            &path,
            r#"{
                "num-sats": 3,
                "num-planes": 2,
                "real-time": true,
                "debug": false,
                "endpoint": ["http://127.0.0.1:15052/api/marker"],
                "HIL": {"node-1": "1,2", "node-2": [3, 4]}
            }"#,
        )
        .unwrap();

        let argv = json_to_args("const-sim", &path).unwrap();
        assert_eq!(argv[0], "const-sim");
        let joined = argv.join(" ");
        assert!(joined.contains("--num-sats 3"));
        assert!(joined.contains("--num-planes 2"));
        assert!(joined.contains("--real-time"));
        assert!(!joined.contains("--debug"));
        assert!(joined.contains("--endpoint http://127.0.0.1:15052/api/marker"));
        assert!(joined.contains("--HIL node-1|1,2"));
        assert!(joined.contains("--HIL node-2|3"));
        assert!(joined.contains("--HIL node-2|4"));
    }
}
