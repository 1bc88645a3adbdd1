//! const-sim — controller-driven constellation simulation worker
//!
//! Spawns one producer per `(plane, ordinal, interval)` over the full grid,
//! registers each with the controller, and waits for the common start
//! broadcast before any telemetry flows. Sidecars (debug CSV, exfiltration)
//! toggle live over the coordination bus.

use std::sync::{Arc, Mutex};

use anyhow::bail;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use leosat_bus::Subscriber;
use leosat_types::config::{self, http_endpoint_arg, ControlOpts, GridOpts, HttpEndpoint};

use orbit_worker::config::{geometry_from, grid_identities, OrbitOpts};
use orbit_worker::listener::{self, ListenerContext, WorkerIdentity};
use orbit_worker::registry::WorkerRegistry;
use orbit_worker::sink::ExfiltSink;
use orbit_worker::worker::{self, StartSignal, WorkerContext};

#[derive(Parser, Debug)]
#[command(name = "const-sim", about = "Controller-driven LEO constellation simulation worker")]
struct Args {
    #[command(flatten)]
    grid: GridOpts,

    #[command(flatten)]
    orbit: OrbitOpts,

    #[command(flatten)]
    control: ControlOpts,

    /// Exfiltration POST endpoint (example: "http://10.100.222.111:24519/exfilt")
    #[arg(long = "exfilt-endpoint", value_parser = http_endpoint_arg)]
    exfilt_endpoint: Option<HttpEndpoint>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Args = config::load_args("const-sim");
    orbit_worker::config::init_worker_logging(
        "const_sim=info,orbit_worker=info,leosat_bus=info",
        args.orbit.debug,
    );

    let schedule = args.grid.schedule();
    if schedule.is_empty() {
        bail!("at least one --endpoint is required");
    }

    let geometry = geometry_from(&args.grid, &args.orbit);
    info!(
        "🛰  const-sim starting — {} planes × {} sats × {} intervals, alt {} km",
        args.grid.num_planes,
        args.grid.num_sats,
        schedule.len(),
        args.orbit.altitude
    );
    if args.orbit.info {
        println!("{}", geometry.info_text());
    }

    let registry = Arc::new(Mutex::new(WorkerRegistry::new(
        args.orbit.format.clone(),
        args.orbit.real_time,
        args.grid.num_planes,
        args.grid.num_sats,
    )));
    let (start_tx, start_rx) = watch::channel(None::<StartSignal>);
    let start_tx = Arc::new(start_tx);

    // Subscription first: the start broadcast must be receivable before the
    // controller can possibly fire it for our registrations.
    let mut subscription = Subscriber::connect(
        vec![args.control.q_zmq_pub.connect_addr()],
        vec![String::new()],
    );
    subscription.ready().await;
    tokio::spawn(listener::run(
        subscription,
        ListenerContext {
            registry: registry.clone(),
            start: start_tx.clone(),
            identity: WorkerIdentity::Constellation,
            num_planes: args.grid.num_planes,
            num_sats: args.grid.num_sats,
            debug_capable: listener::debug_capability(),
        },
    ));

    let client = reqwest::Client::new();
    let ctx = Arc::new(WorkerContext {
        geometry,
        registry: registry.clone(),
        start: start_rx,
        client: client.clone(),
        nodes_url: Some(args.control.q_endpoint.url.trim_end_matches('/').to_string()),
        duration: args.orbit.duration_secs(),
        cli_start_time: args.orbit.start_time_secs(),
        exfilt: ExfiltSink::new(client, args.exfilt_endpoint.map(|e| e.url), None),
        hil: false,
    });

    let identities = grid_identities(&args.grid);
    let handles = worker::launch_grid(&ctx, &identities, &schedule).await;
    worker::await_all_ready(&ctx).await;
    info!("all {} producers ready; awaiting start notification", handles.len());

    worker::spawn_signal_stop(registry, start_tx);

    for handle in handles {
        let _ = handle.await;
    }
    info!("all producers finished");
    Ok(())
}
