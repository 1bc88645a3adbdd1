//! orbit-sim — standalone orbit generator
//!
//! No controller, no coordination bus. With `--endpoint` the grid POSTs
//! telemetry directly at each interval's cadence; without it, one CSV per
//! satellite is written through the `--format` template until the duration
//! elapses (or forever).

use std::sync::{Arc, Mutex};

use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use leosat_types::config::{self, GridOpts};
use leosat_types::SatIntervalKey;

use orbit_worker::config::{geometry_from, grid_identities, OrbitOpts};
use orbit_worker::registry::WorkerRegistry;
use orbit_worker::sink::ExfiltSink;
use orbit_worker::worker::{self, StartSignal, WorkerContext};

#[derive(Parser, Debug)]
#[command(name = "orbit-sim", about = "Standalone circular-orbit telemetry generator")]
struct Args {
    #[command(flatten)]
    grid: GridOpts,

    #[command(flatten)]
    orbit: OrbitOpts,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Args = config::load_args("orbit-sim");
    orbit_worker::config::init_worker_logging("orbit_sim=info,orbit_worker=info", args.orbit.debug);
    let geometry = geometry_from(&args.grid, &args.orbit);
    if args.orbit.info {
        println!("{}", geometry.info_text());
    }

    let schedule = args.grid.schedule();
    let registry = Arc::new(Mutex::new(WorkerRegistry::new(
        args.orbit.format.clone(),
        args.orbit.real_time,
        args.grid.num_planes,
        args.grid.num_sats,
    )));

    // No barrier here: the start signal opens immediately, carrying any CLI
    // start time for pacing.
    let (start_tx, start_rx) = watch::channel(None::<StartSignal>);
    let start_tx = Arc::new(start_tx);
    start_tx.send_replace(Some(StartSignal { start_time: None }));

    let client = reqwest::Client::new();
    let ctx = Arc::new(WorkerContext {
        geometry,
        registry: registry.clone(),
        start: start_rx,
        client: client.clone(),
        nodes_url: None,
        duration: args.orbit.duration_secs(),
        cli_start_time: args.orbit.start_time_secs(),
        exfilt: ExfiltSink::new(client, None, None),
        hil: false,
    });

    let identities = grid_identities(&args.grid);
    let mut handles = Vec::new();
    if schedule.is_empty() {
        info!(
            "✏️  writing CSV tracks for {} satellites (template \"{}\")",
            identities.len(),
            args.orbit.format
        );
        for &(plane, ordinal) in &identities {
            let key = SatIntervalKey::new(plane, ordinal, args.grid.interval);
            worker::add_task(&ctx, key);
            handles.push(worker::spawn_csv_producer(ctx.clone(), key));
        }
    } else {
        info!(
            "🛰  posting telemetry for {} satellites × {} intervals",
            identities.len(),
            schedule.len()
        );
        for &(plane, ordinal) in &identities {
            for (interval, urls) in &schedule {
                let key = SatIntervalKey::new(plane, ordinal, interval.get());
                worker::add_task(&ctx, key);
                handles.push(worker::spawn_producer(ctx.clone(), key, urls.clone()));
            }
        }
    }

    worker::spawn_signal_stop(registry, start_tx);

    for handle in handles {
        let _ = handle.await;
    }
    info!("all tracks finished");
    Ok(())
}
