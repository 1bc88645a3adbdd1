//! listener.rs — bus command dispatch for orbit workers
//!
//! One task per worker process drains the coordination subscription and
//! mutates the worker registry under its lock. Every failure mode here is
//! log-and-continue: a malformed payload or an inapplicable filter must
//! never take the subscription down.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info};

use leosat_bus::Subscriber;
use leosat_types::{topics, BoundFilter, CommandMsg, SatIntervalKey};

use crate::registry::WorkerRegistry;
use crate::worker::StartSignal;

/// How this process maps bus filters onto its own producers.
#[derive(Debug, Clone, Copy)]
pub enum WorkerIdentity {
    /// Constellation-wide: owns the full `(plane, ordinal)` grid.
    Constellation,
    /// HIL: owns a single `(plane, ordinal)` pinned by host identity.
    Pinned { plane: u32, ordinal: u32 },
}

pub struct ListenerContext {
    pub registry: Arc<Mutex<WorkerRegistry>>,
    pub start: Arc<watch::Sender<Option<StartSignal>>>,
    pub identity: WorkerIdentity,
    pub num_planes: u32,
    pub num_sats: u32,
    /// `SAT_DEBUG` gate for the debug sidecar
    pub debug_capable: bool,
}

/// `SAT_DEBUG ∈ {yes, enable, on, 1}` arms the debug capability.
pub fn debug_capability() -> bool {
    matches!(
        std::env::var("SAT_DEBUG").ok().as_deref(),
        Some("yes" | "enable" | "on" | "1")
    )
}

pub async fn run(mut subscription: Subscriber, ctx: ListenerContext) {
    while let Some(msg) = subscription.recv().await {
        handle_message(&ctx, &msg.topic, &msg.payload);
    }
    debug!("coordination subscription ended");
}

/// Dispatch one bus message. Synchronous so the whole routing surface is
/// unit-testable without sockets.
pub fn handle_message(ctx: &ListenerContext, topic: &str, payload: &Value) {
    let msg: CommandMsg = match serde_json::from_value(payload.clone()) {
        Ok(m) => m,
        Err(e) => {
            debug!("unusable {topic} payload ({payload}): {e}");
            return;
        }
    };
    debug!("bus {topic}: {payload}");

    match topic {
        topics::START => on_start(ctx, &msg),
        topics::STOP => on_stop(ctx, &msg),
        topics::DEBUG => on_sidecar_toggle(ctx, &msg, Sidecar::Debug),
        topics::EXFILT => on_sidecar_toggle(ctx, &msg, Sidecar::Exfilt),
        _ => {}
    }
}

fn on_start(ctx: &ListenerContext, msg: &CommandMsg) {
    // First start wins; a re-broadcast for late joiners must not move an
    // already-adopted start time.
    if ctx.start.borrow().is_some() {
        return;
    }
    info!(
        "start received{}",
        msg.start_time
            .map(|t| format!(" (start-time {t})"))
            .unwrap_or_default()
    );
    ctx.start.send_replace(Some(StartSignal { start_time: msg.start_time }));
}

fn on_stop(ctx: &ListenerContext, msg: &CommandMsg) {
    if !msg.is_sat_class() {
        return;
    }
    let Some(matcher) = target_matcher(ctx, msg) else { return };

    let mut registry = lock(ctx);
    if registry.stop_matching(|k| matcher(k)) {
        // Everything is stopping: release the sinks, and open the barrier if
        // it never closed so blocked producers can observe termination.
        registry.close_all_debug_sinks();
        drop(registry);
        if ctx.start.borrow().is_none() {
            ctx.start.send_replace(Some(StartSignal::default()));
        }
    }
}

#[derive(Clone, Copy)]
enum Sidecar {
    Debug,
    Exfilt,
}

fn on_sidecar_toggle(ctx: &ListenerContext, msg: &CommandMsg, which: Sidecar) {
    if matches!(which, Sidecar::Debug) && !ctx.debug_capable {
        return;
    }
    let Some(matcher) = target_matcher(ctx, msg) else { return };

    let mut registry = lock(ctx);
    let keys = registry.keys_matching(|k| matcher(k));
    for key in keys {
        match (which, msg.enabled()) {
            (Sidecar::Debug, true) => registry.arm_debug(key),
            (Sidecar::Debug, false) => registry.disarm_debug(&key),
            (Sidecar::Exfilt, true) => registry.arm_exfilt(key),
            (Sidecar::Exfilt, false) => registry.disarm_exfilt(&key),
        }
    }
}

/// Resolve the optional plane/ordinal fields into a key predicate for this
/// process. Plane gates ordinal: with no plane the ordinal field is ignored
/// entirely (not even validated) and every key matches. `None` when the
/// filter is invalid or this identity lies outside the targeted range.
fn target_matcher(
    ctx: &ListenerContext,
    msg: &CommandMsg,
) -> Option<Box<dyn Fn(&SatIntervalKey) -> bool>> {
    let Some(plane_field) = msg.plane.as_ref().filter(|v| !v.is_null()) else {
        return Some(Box::new(|_| true));
    };

    let plane = match BoundFilter::decode(Some(plane_field), ctx.num_planes) {
        Ok(f) => f,
        Err(e) => {
            debug!("inapplicable message: {e}");
            return None;
        }
    };
    let ordinal = match msg.ordinal.as_ref().filter(|v| !v.is_null()) {
        Some(field) => match BoundFilter::decode(Some(field), ctx.num_sats) {
            Ok(f) => Some(f),
            Err(e) => {
                debug!("inapplicable message: {e}");
                return None;
            }
        },
        None => None,
    };

    match ctx.identity {
        WorkerIdentity::Constellation => Some(Box::new(move |k| {
            plane.contains(k.plane) && ordinal.map_or(true, |o| o.contains(k.ordinal))
        })),
        WorkerIdentity::Pinned { plane: own_plane, ordinal: own_ordinal } => {
            if plane.contains(own_plane) && ordinal.map_or(true, |o| o.contains(own_ordinal)) {
                Some(Box::new(|_| true))
            } else {
                debug!("inapplicable message for {own_plane}/{own_ordinal}");
                None
            }
        }
    }
}

fn lock(ctx: &ListenerContext) -> std::sync::MutexGuard<'_, WorkerRegistry> {
    crate::registry::lock(&ctx.registry)
}
