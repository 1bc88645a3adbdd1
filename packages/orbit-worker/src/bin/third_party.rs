//! third-party — one-shot job worker
//!
//! Shares identity resolution and bus plumbing with the HIL worker but
//! produces no orbit telemetry. Each matching `thirdParty` broadcast runs
//! the configured external job once, then the worker re-arms for the next
//! trigger. A matching `stop` (class absent or `thirdParty`) terminates it.

use clap::Parser;
use tracing::{debug, error, info};

use leosat_bus::Subscriber;
use leosat_types::config::{self, tcp_endpoint_arg, GridOpts, TcpEndpoint};
use leosat_types::{topics, BoundFilter, CommandMsg};

use orbit_worker::config::resolve_hil_identity;

#[derive(Parser, Debug)]
#[command(name = "third-party", about = "Bus-triggered one-shot job worker")]
struct Args {
    #[command(flatten)]
    grid: GridOpts,

    /// Controller coordination publication socket, e.g. `tcp://10.100.100.100:12343`
    #[arg(long = "Q-ZMQ-pub", value_parser = tcp_endpoint_arg)]
    q_zmq_pub: TcpEndpoint,

    /// External command run once per matching thirdParty trigger
    #[arg(long = "job-command")]
    job_command: String,

    #[arg(short = 'd', long, hide = true)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Args = config::load_args("third-party");
    orbit_worker::config::init_worker_logging("third_party=info,leosat_bus=info", args.debug);
    let (host, plane, ordinal) = resolve_hil_identity(&args.grid)?;
    info!("third-party worker starting — host \"{host}\" is {plane}/{ordinal}");

    let mut subscription =
        Subscriber::connect(vec![args.q_zmq_pub.connect_addr()], vec![String::new()]);
    subscription.ready().await;

    let signal = orbit_worker::worker::wait_for_signal();
    tokio::pin!(signal);

    loop {
        let message = tokio::select! {
            msg = subscription.recv() => msg,
            _ = &mut signal => {
                info!("shutdown signal received");
                return Ok(());
            }
        };
        let Some(message) = message else { return Ok(()) };

        let msg: CommandMsg = match serde_json::from_value(message.payload.clone()) {
            Ok(m) => m,
            Err(e) => {
                debug!("unusable {} payload: {e}", message.topic);
                continue;
            }
        };
        if !applies_to(&args.grid, &msg, plane, ordinal) {
            debug!("inapplicable message on {}", message.topic);
            continue;
        }

        match message.topic.as_str() {
            topics::THIRD_PARTY => {
                run_job(&args.job_command).await;
                // Re-armed: the next trigger runs the job again.
            }
            topics::STOP if msg.is_third_party_class() => {
                info!("stop received; exiting");
                return Ok(());
            }
            _ => {}
        }
    }
}

/// Same range semantics as the orbit workers: optional scalar-or-range
/// plane/ordinal fields, applicable when our pinned identity falls inside.
/// Plane gates ordinal — with no plane the ordinal field is ignored
/// entirely and the message applies.
fn applies_to(grid: &GridOpts, msg: &CommandMsg, plane: u32, ordinal: u32) -> bool {
    let Some(plane_field) = msg.plane.as_ref().filter(|v| !v.is_null()) else {
        return true;
    };

    let plane_filter = match BoundFilter::decode(Some(plane_field), grid.num_planes) {
        Ok(f) => f,
        Err(_) => return false,
    };
    if !plane_filter.contains(plane) {
        return false;
    }

    match msg.ordinal.as_ref().filter(|v| !v.is_null()) {
        None => true,
        Some(field) => match BoundFilter::decode(Some(field), grid.num_sats) {
            Ok(f) => f.contains(ordinal),
            Err(_) => false,
        },
    }
}

/// One-shot job execution; failures are logged and the worker re-arms.
async fn run_job(command: &str) {
    let mut parts = command.split_whitespace();
    let Some(program) = parts.next() else {
        error!("empty --job-command");
        return;
    };

    info!("running one-shot job \"{program}\"");
    match tokio::process::Command::new(program).args(parts).status().await {
        Ok(status) if status.success() => info!("job \"{program}\" completed"),
        Ok(status) => error!("job \"{program}\" exited with {status}"),
        Err(e) => error!("job \"{program}\": {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn grid() -> GridOpts {
        #[derive(Parser)]
        struct Wrapper {
            #[command(flatten)]
            grid: GridOpts,
        }
        Wrapper::parse_from(["t", "--num-sats", "3", "--num-planes", "2"]).grid
    }

    fn msg(v: Value) -> CommandMsg {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn applicability_ranges() {
        let grid = grid();
        assert!(applies_to(&grid, &msg(json!({})), 1, 2));
        assert!(applies_to(&grid, &msg(json!({"plane": 1})), 1, 2));
        assert!(applies_to(&grid, &msg(json!({"plane": [1, 2], "ordinal": 2})), 1, 2));
        assert!(!applies_to(&grid, &msg(json!({"plane": 2})), 1, 2));
        assert!(!applies_to(&grid, &msg(json!({"plane": 1, "ordinal": 3})), 1, 2));
    }

    #[test]
    fn ordinal_without_plane_is_ignored() {
        let grid = grid();
        // A "stop everything" broadcast with a stray (even bogus) ordinal
        // still applies to a pinned worker whose ordinal differs.
        assert!(applies_to(&grid, &msg(json!({"ordinal": 3})), 1, 2));
        assert!(applies_to(&grid, &msg(json!({"ordinal": 99})), 1, 2));
    }

    #[test]
    fn class_routing() {
        assert!(msg(json!({})).is_third_party_class());
        assert!(msg(json!({"class": "thirdParty"})).is_third_party_class());
        assert!(!msg(json!({"class": "sat"})).is_third_party_class());
    }
}
