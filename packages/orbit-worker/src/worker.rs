//! worker.rs — producer lifecycle
//!
//! One tokio task per `(plane, ordinal, interval)`: it announces readiness,
//! blocks on the start barrier, then emits a geo sample per interval until
//! the duration elapses or its key lands in the stop set. Registration with
//! the controller is the only unbounded retry in the suite — nothing can
//! proceed without it. Everything downstream is log-and-continue.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use leosat_types::{unix_now, EndpointSchedule, GeoSample, SatIntervalKey};

use crate::orbit::{Geometry, OrbitTrack};
use crate::registry::WorkerRegistry;
use crate::sink::{format_output_path, DebugCsv, EndpointSink, ExfiltSink};

/// Backoff between registration attempts while the controller is down.
const REGISTER_RETRY: Duration = Duration::from_secs(2);

/// Barrier payload adopted from the `start` broadcast (or the CLI).
#[derive(Debug, Clone, Copy, Default)]
pub struct StartSignal {
    pub start_time: Option<f64>,
}

/// Everything a producer task needs, shared per worker process.
pub struct WorkerContext {
    pub geometry: Geometry,
    pub registry: Arc<Mutex<WorkerRegistry>>,
    pub start: watch::Receiver<Option<StartSignal>>,
    pub client: reqwest::Client,
    /// Controller base (`…/nodes`); `None` runs unregistered (standalone)
    pub nodes_url: Option<String>,
    /// Simulated-seconds cap; `None` runs until stopped
    pub duration: Option<f64>,
    /// CLI fallback when the start broadcast carries no time
    pub cli_start_time: Option<f64>,
    pub exfilt: ExfiltSink,
    /// HIL workers mark their samples green
    pub hil: bool,
}

impl WorkerContext {
    fn lock_registry(&self) -> std::sync::MutexGuard<'_, WorkerRegistry> {
        crate::registry::lock(&self.registry)
    }
}

// ── Controller registration ───────────────────────────────────────────────────

/// POST `register` until the transport succeeds; HTTP-level failures are
/// surfaced at debug level and do not block startup.
pub async fn register_with_retry(ctx: &WorkerContext, key: &SatIntervalKey) {
    let Some(base) = &ctx.nodes_url else { return };
    let url = format!("{base}/register");
    let body = json!({"plane": key.plane, "ordinal": key.ordinal, "interval": key.interval});

    loop {
        match ctx.client.post(&url).json(&body).send().await {
            Ok(resp) => {
                if !resp.status().is_success() {
                    debug!("{} register: HTTP {} ({body})", unix_now(), resp.status());
                }
                return;
            }
            Err(e) => {
                debug!("{} register: {e} ({body})", unix_now());
                tokio::time::sleep(REGISTER_RETRY).await;
            }
        }
    }
}

/// POST `unregister` once, on producer exit. Log-and-continue.
pub async fn unregister(ctx: &WorkerContext, key: &SatIntervalKey) {
    let Some(base) = &ctx.nodes_url else { return };
    let url = format!("{base}/unregister");
    let body = json!({"plane": key.plane, "ordinal": key.ordinal, "interval": key.interval});

    match ctx.client.post(&url).json(&body).send().await {
        Ok(resp) => {
            if !resp.status().is_success() {
                debug!("{} unregister: HTTP {} ({body})", unix_now(), resp.status());
            }
        }
        Err(e) => debug!("{} unregister: {e} ({body})", unix_now()),
    }
}

// ── Producer tasks ────────────────────────────────────────────────────────────

/// Spawn the POSTing producer for one key. The caller has already inserted
/// the key into the registry's task table.
pub fn spawn_producer(
    ctx: Arc<WorkerContext>,
    key: SatIntervalKey,
    urls: Vec<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_producer(&ctx, key, urls).await;
    })
}

async fn run_producer(ctx: &WorkerContext, key: SatIntervalKey, urls: Vec<String>) {
    let sink = EndpointSink::new(ctx.client.clone(), urls);

    ctx.lock_registry().mark_running(key);
    debug!("node {key}: waiting for start notification");
    let Some(signal) = await_start(ctx).await else { return };
    debug!("node {key}: start received; producing");

    let start_time = signal.start_time.or(ctx.cli_start_time);
    let mut track = OrbitTrack::new(&ctx.geometry, key.plane, key.ordinal, key.interval);
    let mut cur_time = 0.0_f64;
    // Wall-clock pacing applies only when a global start time is agreed.
    let mut want = if sink.is_empty() { None } else { start_time };

    loop {
        if let Some(end) = ctx.duration {
            if cur_time >= end {
                break;
            }
        }
        if ctx.lock_registry().is_stopped(&key) {
            break;
        }

        let produce = match want {
            Some(target) => {
                let lag = unix_now() - target;
                if lag < 0.0 {
                    // The agreed start (or this tick's slot) is still ahead.
                    tokio::time::sleep(Duration::from_secs_f64(-lag)).await;
                    continue;
                }
                // More than one interval behind: skip the emission but keep
                // advancing so a late worker converges on the shared cadence.
                lag <= key.interval
            }
            None => {
                tokio::time::sleep(Duration::from_secs_f64(key.interval)).await;
                true
            }
        };

        if produce {
            let Some(point) = track.sample() else {
                error!("node {key}: degenerate transform at t={cur_time}; stopping producer");
                break;
            };

            let mut sample = GeoSample {
                label: key.label(),
                plane: key.plane,
                ordinal: key.ordinal,
                interval: key.interval,
                time: cur_time,
                lat: point.lat,
                lon: point.lon,
                alt: point.alt_km,
                delx: point.delx,
                dely: point.dely,
                delz: point.delz,
                color: None,
            };

            let fire_exfilt = ctx.lock_registry().apply_sidecars(&key, &mut sample, ctx.hil);
            sink.post_sample(&sample).await;
            if fire_exfilt {
                ctx.exfilt.fire(&sample).await;
            }
        }

        if let Some(w) = want.as_mut() {
            *w += key.interval;
        }
        cur_time += key.interval;
        track.advance();
    }

    unregister(ctx, &key).await;
    info!("node {key}: producer finished at t={cur_time}");
}

/// Spawn the CSV-writing producer used by the standalone generator.
pub fn spawn_csv_producer(ctx: Arc<WorkerContext>, key: SatIntervalKey) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_csv_producer(&ctx, key).await;
    })
}

async fn run_csv_producer(ctx: &WorkerContext, key: SatIntervalKey) {
    let (template, real_time) = {
        let reg = ctx.lock_registry();
        (reg.format_template().to_string(), reg.real_time())
    };
    let path = format_output_path(
        &template,
        &key,
        ctx.geometry.num_sats,
        ctx.geometry.num_planes,
    );
    let mut out = DebugCsv::create(&path, real_time);

    ctx.lock_registry().mark_running(key);
    if await_start(ctx).await.is_none() {
        return;
    }

    let mut track = OrbitTrack::new(&ctx.geometry, key.plane, key.ordinal, key.interval);
    let mut cur_time = 0.0_f64;

    loop {
        if let Some(end) = ctx.duration {
            if cur_time >= end {
                break;
            }
        }
        if ctx.lock_registry().is_stopped(&key) {
            break;
        }

        let Some(point) = track.sample() else {
            error!("node {key}: degenerate transform at t={cur_time}; stopping producer");
            break;
        };
        out.write_row(&GeoSample {
            label: key.label(),
            plane: key.plane,
            ordinal: key.ordinal,
            interval: key.interval,
            time: cur_time,
            lat: point.lat,
            lon: point.lon,
            alt: point.alt_km,
            delx: point.delx,
            dely: point.dely,
            delz: point.delz,
            color: None,
        });

        cur_time += key.interval;
        track.advance();
        tokio::task::yield_now().await;
    }

    out.close();
    info!("node {key}: CSV track finished at t={cur_time}");
}

async fn await_start(ctx: &WorkerContext) -> Option<StartSignal> {
    let mut rx = ctx.start.clone();
    loop {
        if let Some(signal) = *rx.borrow_and_update() {
            return Some(signal);
        }
        if rx.changed().await.is_err() {
            return None;
        }
    }
}

// ── Process-level orchestration ───────────────────────────────────────────────

/// Insert a key into the registry's task table before its producer spawns.
pub fn add_task(ctx: &WorkerContext, key: SatIntervalKey) {
    ctx.lock_registry().add_task(key);
}

/// Spawn one producer per `(identity × interval)` and register each with the
/// controller before moving on — exactly the startup order the barrier
/// protocol expects.
pub async fn launch_grid(
    ctx: &Arc<WorkerContext>,
    identities: &[(u32, u32)],
    schedule: &EndpointSchedule,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    for &(plane, ordinal) in identities {
        for (interval, urls) in schedule {
            let key = SatIntervalKey::new(plane, ordinal, interval.get());
            ctx.lock_registry().add_task(key);
            handles.push(spawn_producer(ctx.clone(), key, urls.clone()));
            register_with_retry(ctx, &key).await;
        }
    }
    handles
}

/// Block until every spawned producer has reached its barrier wait.
pub async fn await_all_ready(ctx: &WorkerContext) {
    loop {
        let (running, total) = {
            let reg = ctx.lock_registry();
            (reg.running_count(), reg.task_count())
        };
        if running >= total {
            return;
        }
        debug!("waiting for producers ({running} < {total})");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// SIGINT/SIGTERM → cooperative stop: producers finish their current tick
/// and unregister on the way out. Opens the barrier if it never closed so
/// blocked producers can observe termination.
pub fn spawn_signal_stop(
    registry: Arc<Mutex<WorkerRegistry>>,
    start_tx: Arc<watch::Sender<Option<StartSignal>>>,
) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received — stopping producers");
        crate::registry::lock(&registry).stop_matching(|_| true);
        if start_tx.borrow().is_none() {
            start_tx.send_replace(Some(StartSignal::default()));
        }
    });
}

pub async fn wait_for_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
