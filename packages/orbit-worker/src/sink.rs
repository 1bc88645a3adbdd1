//! sink.rs — downstream outputs for geo samples
//!
//! Three sinks hang off a producer: the regular endpoint sink (one POST per
//! configured URL, every tick), the exfiltration sidecar (an alternate POST
//! target or an external uploader command), and the per-key debug CSV
//! writer. Output failures are logged and never stop a producer.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use tracing::{debug, error, warn};

use leosat_types::{unix_now, GeoSample, SatIntervalKey};

// ── Endpoint sink ─────────────────────────────────────────────────────────────

/// POSTs one serialized sample to every URL bound to a producer's interval.
pub struct EndpointSink {
    client: reqwest::Client,
    urls: Vec<String>,
}

impl EndpointSink {
    pub fn new(client: reqwest::Client, urls: Vec<String>) -> Self {
        Self { client, urls }
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Serialize once, POST to every URL. Each POST is synchronous with
    /// respect to the producer's tick; a non-2xx or transport failure is
    /// logged and the next URL still runs.
    pub async fn post_sample(&self, sample: &GeoSample) {
        let body = match serde_json::to_vec(sample) {
            Ok(b) => b,
            Err(e) => {
                error!("sample serialize failed ({}): {e}", sample.label);
                return;
            }
        };

        for url in &self.urls {
            let request = self
                .client
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone());
            match request.send().await {
                Ok(resp) if !resp.status().is_success() => {
                    error!(
                        "endpoint {url}: HTTP {} @ t={} ({})",
                        resp.status(),
                        sample.time,
                        sample.label
                    );
                }
                Ok(_) => {}
                Err(e) => error!("endpoint {url}: {e} @ t={} ({})", sample.time, sample.label),
            }
        }
    }
}

// ── Exfiltration sidecar ──────────────────────────────────────────────────────

/// Alternate output armed by the `exfilt` topic. The constellation worker
/// POSTs the sample to a second endpoint; the HIL variant may instead run an
/// external uploader command with `{endpoint}` substituted.
pub struct ExfiltSink {
    client: reqwest::Client,
    endpoint: Option<String>,
    command: Option<String>,
}

impl ExfiltSink {
    pub fn new(client: reqwest::Client, endpoint: Option<String>, command: Option<String>) -> Self {
        Self { client, endpoint, command }
    }

    pub async fn fire(&self, sample: &GeoSample) {
        if let Some(command) = &self.command {
            self.run_uploader(command).await;
            return;
        }

        let Some(endpoint) = &self.endpoint else { return };
        match self.client.post(endpoint).json(sample).send().await {
            Ok(resp) if !resp.status().is_success() => {
                error!("exfilt {endpoint}: HTTP {} ({})", resp.status(), sample.label);
            }
            Ok(_) => {}
            Err(e) => error!("exfilt {endpoint}: {e} ({})", sample.label),
        }
    }

    /// One uploader invocation per tick while armed. The command string is
    /// whitespace-split; `{endpoint}` expands to the configured endpoint.
    async fn run_uploader(&self, command: &str) {
        let endpoint = self.endpoint.as_deref().unwrap_or_default();
        let mut parts = command
            .split_whitespace()
            .map(|p| p.replace("{endpoint}", endpoint));
        let Some(program) = parts.next() else { return };

        match tokio::process::Command::new(&program)
            .args(parts)
            .output()
            .await
        {
            Ok(out) if !out.status.success() => {
                error!("exfilt command \"{program}\" exited with {}", out.status);
            }
            Ok(_) => debug!("exfilt command \"{program}\" completed"),
            Err(e) => error!("exfilt command \"{program}\": {e}"),
        }
    }
}

// ── Debug CSV sidecar ─────────────────────────────────────────────────────────

/// Expand the `--format` output template for one key.
pub fn format_output_path(
    template: &str,
    key: &SatIntervalKey,
    num_sats: u32,
    num_planes: u32,
) -> PathBuf {
    PathBuf::from(
        template
            .replace("{plane}", &key.plane.to_string())
            .replace("{ordinal}", &key.ordinal.to_string())
            .replace("{interval}", &key.interval.to_string())
            .replace("{num-sats}", &num_sats.to_string())
            .replace("{num-planes}", &num_planes.to_string()),
    )
}

/// Lazily created per-key CSV writer. Rows are
/// `plane, ordinal, [wallclock,] time, lat, lon, alt`; the wallclock column
/// appears only in real-time mode.
pub struct DebugCsv {
    out: Option<File>,
    real_time: bool,
}

impl DebugCsv {
    pub fn create(path: &PathBuf, real_time: bool) -> Self {
        let out = match File::create(path) {
            Ok(f) => Some(f),
            Err(e) => {
                // Unwritable paths disable the sink without stopping the orbit.
                warn!("debug sink: could not create \"{}\": {e}", path.display());
                None
            }
        };
        Self { out, real_time }
    }

    pub fn write_row(&mut self, sample: &GeoSample) {
        let Some(out) = self.out.as_mut() else { return };

        let row = if self.real_time {
            format!(
                "{},{},{},{},{},{},{}\n",
                sample.plane,
                sample.ordinal,
                unix_now(),
                sample.time,
                sample.lat,
                sample.lon,
                sample.alt
            )
        } else {
            format!(
                "{},{},{},{},{},{}\n",
                sample.plane, sample.ordinal, sample.time, sample.lat, sample.lon, sample.alt
            )
        };

        if let Err(e) = out.write_all(row.as_bytes()).and_then(|_| out.flush()) {
            warn!("debug sink: write failed: {e}");
            self.out = None;
        }
    }

    /// Close the file and disable further rows.
    pub fn close(&mut self) {
        self.out = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GeoSample {
        GeoSample {
            label: "leosat-01-02".into(),
            plane: 1,
            ordinal: 2,
            interval: 10.0,
            time: 20.0,
            lat: 1.25,
            lon: -3.5,
            alt: 800.0,
            delx: 0.0,
            dely: 8.39,
            delz: 0.0,
            color: None,
        }
    }

    #[test]
    fn template_expansion() {
        let key = SatIntervalKey::new(2, 7, 5.0);
        let path = format_output_path("sat_{plane}_{ordinal}_{interval}.csv", &key, 14, 2);
        assert_eq!(path, PathBuf::from("sat_2_7_5.csv"));

        let path = format_output_path("run_{num-planes}x{num-sats}.csv", &key, 14, 2);
        assert_eq!(path, PathBuf::from("run_2x14.csv"));
    }

    #[test]
    fn csv_rows_and_close() {
        let dir = std::env::temp_dir().join("orbit-worker-sink-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("debug_rows.csv");

        let mut sink = DebugCsv::create(&path, false);
        sink.write_row(&sample());
        sink.write_row(&sample());
        sink.close();
        sink.write_row(&sample()); // ignored after close

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "1,2,20,1.25,-3.5,800");
    }

    #[test]
    fn real_time_rows_carry_a_wallclock_column() {
        let dir = std::env::temp_dir().join("orbit-worker-sink-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("debug_wallclock.csv");

        let mut sink = DebugCsv::create(&path, true);
        sink.write_row(&sample());
        drop(sink);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().next().unwrap().split(',').count(), 7);
    }

    #[test]
    fn unwritable_path_disables_quietly() {
        let mut sink = DebugCsv::create(&PathBuf::from("/definitely/not/here.csv"), false);
        sink.write_row(&sample()); // no panic
    }
}
