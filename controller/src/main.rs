//! Constellation controller — registration barrier and command fan-out.
//!
//! Workers register one `(plane, ordinal, interval)` per producer over REST;
//! once every expected interval is present the controller broadcasts a
//! common start time on the coordination bus. Operator commands (stop,
//! debug, exfilt, thirdParty) are multiplexed over the same bus and filtered
//! by identity on the worker side.

mod handlers;
mod registry;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use leosat_bus::Publisher;
use leosat_types::config::{self, ControlOpts, GridOpts};

use handlers::AppState;
use registry::Registry;

// ─── Global startup time (for uptime reporting) ──────────────────────────────
pub static STARTUP_MS: AtomicU64 = AtomicU64::new(0);

// ─── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "leosat-controller",
    about = "LEO constellation registration barrier and command fan-out"
)]
struct Args {
    #[command(flatten)]
    grid: GridOpts,

    #[command(flatten)]
    control: ControlOpts,

    /// Logger level (e.g. "debug", "info")
    #[arg(long = "log-level")]
    log_level: Option<String>,

    /// Optional logging path (file, or directory for leosat-controller.log)
    #[arg(long = "tee-log")]
    tee_log: Option<PathBuf>,

    #[arg(short = 'd', long, hide = true)]
    debug: bool,
}

// ─── Logging ──────────────────────────────────────────────────────────────────

fn init_logging(log_level: Option<&str>, tee_log: Option<&Path>) -> anyhow::Result<()> {
    let filter = match log_level {
        Some(level) => EnvFilter::try_new(level.to_lowercase())
            .with_context(|| format!("invalid --log-level (\"{level}\")"))?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "leosat_controller=info,leosat_bus=info".into()),
    };

    let base = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    match resolve_tee_path(tee_log) {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("invalid --tee-log (\"{}\")", path.display()))?;
            base.with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
            .init();
            info!("logging to \"{}\"", path.display());
        }
        None => base.init(),
    }
    Ok(())
}

fn resolve_tee_path(tee_log: Option<&Path>) -> Option<PathBuf> {
    let path = tee_log?;
    if path.is_dir() {
        Some(path.join("leosat-controller.log"))
    } else {
        Some(path.to_path_buf())
    }
}

// ─── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    STARTUP_MS.store(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64,
        Ordering::Relaxed,
    );

    let args: Args = config::load_args("leosat-controller");
    init_logging(args.log_level.as_deref(), args.tee_log.as_deref())?;

    if args.debug {
        info!("*** DEBUG MODE ***");
    }

    // Expected barrier size: planes × sats × distinct sampling intervals.
    let schedule = args.grid.schedule();
    let num_intervals = schedule.len().max(1);
    let total = args.grid.num_planes as usize * args.grid.num_sats as usize * num_intervals;
    info!(
        "🛰  controller starting — {} planes × {} sats × {} intervals = {} expected registrations",
        args.grid.num_planes, args.grid.num_sats, num_intervals, total
    );

    // Coordination bus: bind on all interfaces at the advertised port.
    let bus = Arc::new(
        Publisher::bind(&args.control.q_zmq_pub.bind_addr())
            .await
            .context("coordination publication socket")?,
    );

    let state = AppState {
        registry: Arc::new(Mutex::new(Registry::new(
            args.grid.num_planes,
            args.grid.num_sats,
            num_intervals,
            args.grid.hil_table(),
        ))),
        bus: bus.clone(),
    };

    let app = Router::new()
        .route("/nodes/register", post(handlers::register))
        .route("/nodes/unregister", post(handlers::unregister))
        .route("/nodes/stop", post(handlers::stop).get(handlers::stop_all))
        .route("/nodes/debug", post(handlers::debug))
        .route("/nodes/exfilt", post(handlers::exfilt))
        .route(
            "/nodes/thirdParty",
            post(handlers::third_party).get(handlers::third_party_trigger),
        )
        .route("/nodes/info", get(handlers::info_report))
        .route("/nodes/_start", get(handlers::force_start))
        .route("/nodes/:action", post(handlers::unknown_action).get(handlers::unknown_action))
        .route("/teardown", get(handlers::teardown))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr = format!("0.0.0.0:{}", args.control.q_endpoint.port);
    info!("🚀 REST ingress listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("could not bind REST ingress on {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(bus))
        .await
        .context("REST server")?;

    Ok(())
}

/// SIGINT/SIGTERM teardown: close the bus publisher, then let axum drain.
/// The registration table is dropped with the process — registrations are
/// deliberately not persisted across restarts.
async fn shutdown_signal(bus: Arc<Publisher>) {
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

    info!("shutdown signal received — closing bus publisher");
    bus.close();
}
