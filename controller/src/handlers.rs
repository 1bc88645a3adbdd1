//! handlers.rs — REST surface of the controller
//!
//! All action acknowledgements are `text/plain`; data endpoints return JSON.
//! Handlers validate before mutating — a `400` never changes the table — and
//! every mutation happens before the matching bus publication, so the table
//! is authoritative by the time subscribers see a command.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};

use leosat_bus::Publisher;
use leosat_types::{topics, unix_now, BoundFilter};

use crate::registry::Registry;
use crate::STARTUP_MS;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Mutex<Registry>>,
    pub bus: Arc<Publisher>,
}

type TextResponse = (StatusCode, String);

fn bad_request(detail: impl std::fmt::Display) -> TextResponse {
    (StatusCode::BAD_REQUEST, detail.to_string())
}

fn ok(detail: impl Into<String>) -> TextResponse {
    (StatusCode::OK, detail.into())
}

/// Parse a POST body as a JSON object. An empty body counts as an empty
/// filter; anything unparseable is a `400`.
fn parse_body(body: &str) -> Result<Value, TextResponse> {
    if body.trim().is_empty() {
        return Ok(json!({}));
    }
    match serde_json::from_str::<Value>(body) {
        Ok(v) if v.is_object() => Ok(v),
        Ok(_) => Err(bad_request("Bad JSON input")),
        Err(_) => Err(bad_request("Bad JSON input")),
    }
}

/// Decode the optional plane/ordinal targeting fields against the
/// constellation bounds. Plane gates ordinal: with no plane the ordinal
/// field is ignored entirely (not even validated) and the filter matches
/// everything.
fn decode_filters(
    payload: &Value,
    registry: &Registry,
) -> Result<(Option<BoundFilter>, Option<BoundFilter>), TextResponse> {
    let Some(plane_field) = payload.get("plane").filter(|v| !v.is_null()) else {
        return Ok((None, None));
    };

    let plane = BoundFilter::decode(Some(plane_field), registry.num_planes())
        .map_err(|_| bad_request(format!("Bad plane/ordinal ({payload})")))?;
    let ordinal = match payload.get("ordinal").filter(|v| !v.is_null()) {
        Some(field) => Some(
            BoundFilter::decode(Some(field), registry.num_sats())
                .map_err(|_| bad_request(format!("Bad plane/ordinal ({payload})")))?,
        ),
        None => None,
    };
    Ok((Some(plane), ordinal))
}

// ── /nodes/register ───────────────────────────────────────────────────────────

pub async fn register(State(state): State<AppState>, body: String) -> TextResponse {
    let payload = match parse_body(&body) {
        Ok(p) => p,
        Err(e) => return e,
    };

    let mut registry = state.registry.lock().await;
    let Some(key) = registry.sat_int_params(&payload) else {
        return bad_request(format!("Bad plane/ordinal ({payload})"));
    };

    if let Some(start_time) = registry.register(key, payload, unix_now()) {
        info!(
            "barrier closed: all {} satellite intervals registered; broadcasting start",
            registry.total()
        );
        state
            .bus
            .queue_message(topics::START, &json!({ "start-time": start_time }));
    }
    ok("OK")
}

// ── /nodes/unregister ─────────────────────────────────────────────────────────

pub async fn unregister(State(state): State<AppState>, body: String) -> TextResponse {
    let payload = match parse_body(&body) {
        Ok(p) => p,
        Err(e) => return e,
    };

    let mut registry = state.registry.lock().await;
    let Some(key) = registry.sat_int_params(&payload) else {
        return bad_request(format!("Bad plane/ordinal ({payload})"));
    };

    if registry.unregister(&key) {
        ok("OK")
    } else {
        ok(format!("WARNING: unknown satellite interval ({payload})"))
    }
}

// ── /nodes/stop ───────────────────────────────────────────────────────────────

pub async fn stop(State(state): State<AppState>, body: String) -> TextResponse {
    let payload = match parse_body(&body) {
        Ok(p) => p,
        Err(e) => return e,
    };
    stop_with_payload(&state, payload).await
}

/// GET form: stop everything.
pub async fn stop_all(State(state): State<AppState>) -> TextResponse {
    stop_with_payload(&state, json!({})).await
}

async fn stop_with_payload(state: &AppState, payload: Value) -> TextResponse {
    let mut registry = state.registry.lock().await;
    let (plane, ordinal) = match decode_filters(&payload, &registry) {
        Ok(f) => f,
        Err(e) => return e,
    };

    // Coverage is reported as it stood before the stop took effect.
    let status = registry.status_line(false);
    if registry.count() == 0 {
        return ok(status);
    }

    match payload.get("class").and_then(Value::as_str) {
        None | Some("sat") => {
            let removed = registry.remove_matching(plane.as_ref(), ordinal.as_ref());
            info!("stop: removed {removed} registrations ({payload})");
            state.bus.queue_message(topics::STOP, &payload);
        }
        Some(c) if c.eq_ignore_ascii_case("hil") => {
            // One stop per HIL host, identity substituted.
            for (host, (hil_plane, hil_ordinal)) in registry.hil().clone() {
                let mut per_host = payload.as_object().cloned().unwrap_or_default();
                per_host.insert("class".into(), json!("sat"));
                per_host.insert("plane".into(), json!(hil_plane));
                per_host.insert("ordinal".into(), json!(hil_ordinal));
                per_host.insert("host".into(), json!(host));

                registry.remove_matching(
                    Some(&BoundFilter::One(hil_plane)),
                    Some(&BoundFilter::One(hil_ordinal)),
                );
                state.bus.queue_message(topics::STOP, &Value::Object(per_host));
            }
            info!("stop: fanned out to {} HIL hosts", registry.hil().len());
        }
        Some(_) => {
            // Unknown class targets no registrations here; forward as-is.
            state.bus.queue_message(topics::STOP, &payload);
        }
    }

    ok(status)
}

// ── /nodes/debug and /nodes/exfilt ────────────────────────────────────────────

pub async fn debug(State(state): State<AppState>, body: String) -> TextResponse {
    publish_sidecar_toggle(&state, topics::DEBUG, body).await
}

pub async fn exfilt(State(state): State<AppState>, body: String) -> TextResponse {
    publish_sidecar_toggle(&state, topics::EXFILT, body).await
}

async fn publish_sidecar_toggle(state: &AppState, topic: &str, body: String) -> TextResponse {
    let payload = match parse_body(&body) {
        Ok(p) => p,
        Err(e) => return e,
    };

    let registry = state.registry.lock().await;
    if registry.count() == 0 {
        return ok("WARNING: no satellite intervals are registered.");
    }
    if let Err(e) = decode_filters(&payload, &registry) {
        return e;
    }

    state.bus.queue_message(topic, &payload);
    ok("OK")
}

// ── /nodes/thirdParty ─────────────────────────────────────────────────────────

pub async fn third_party(State(state): State<AppState>, body: String) -> TextResponse {
    let payload = match parse_body(&body) {
        Ok(p) => p,
        Err(e) => return e,
    };
    third_party_with_payload(&state, payload).await
}

pub async fn third_party_trigger(State(state): State<AppState>) -> TextResponse {
    third_party_with_payload(&state, json!({})).await
}

async fn third_party_with_payload(state: &AppState, payload: Value) -> TextResponse {
    let registry = state.registry.lock().await;
    if let Err(e) = decode_filters(&payload, &registry) {
        return e;
    }
    state.bus.queue_message(topics::THIRD_PARTY, &payload);
    ok(registry.status_line(false))
}

// ── /nodes/info and /nodes/_start ─────────────────────────────────────────────

pub async fn info_report(State(state): State<AppState>) -> TextResponse {
    ok(state.registry.lock().await.info_report())
}

/// Debug aid: re-broadcast `start` for late joiners (latching a fresh time
/// if none is held).
pub async fn force_start(State(state): State<AppState>) -> TextResponse {
    let mut registry = state.registry.lock().await;
    let start_time = registry.force_start(unix_now());
    state
        .bus
        .queue_message(topics::START, &json!({ "start-time": start_time }));
    ok(format!("# sat ints: {}", registry.count()))
}

// ── Fallbacks and glue ────────────────────────────────────────────────────────

pub async fn unknown_action(Path(action): Path<String>) -> TextResponse {
    warn!("unknown /nodes/ endpoint requested: {action}");
    bad_request(format!("ERROR: unknown \"/nodes/\" endpoint (\"{action}\")"))
}

pub async fn teardown(State(state): State<AppState>) -> TextResponse {
    info!("teardown requested: closing bus publisher");
    state.bus.close();
    ok("OK")
}

pub async fn health() -> Json<Value> {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let startup = STARTUP_MS.load(Ordering::Relaxed);
    let uptime_secs = if startup > 0 { (now_ms - startup) / 1000 } else { 0 };
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": uptime_secs,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use leosat_types::{HilTable, SatIntervalKey};
    use std::time::Duration;

    /// State wired to a real loopback bus plus a subscriber watching it.
    async fn harness(hil: &[(&str, (u32, u32))]) -> (AppState, leosat_bus::Subscriber) {
        let bus = Arc::new(leosat_bus::Publisher::bind("127.0.0.1:0").await.unwrap());
        let mut subscriber = leosat_bus::Subscriber::connect(
            vec![bus.local_addr().to_string()],
            vec![String::new()],
        );
        subscriber.ready().await;

        let table: HilTable = hil
            .iter()
            .map(|(h, po)| (h.to_string(), *po))
            .collect();
        let mut registry = Registry::new(1, 2, 1, table);
        for ordinal in 1..=2 {
            let key = SatIntervalKey::new(1, ordinal, 10.0);
            registry.register(
                key,
                json!({"plane": 1, "ordinal": ordinal, "interval": 10.0}),
                100.0,
            );
        }

        let state = AppState {
            registry: Arc::new(Mutex::new(registry)),
            bus,
        };
        (state, subscriber)
    }

    async fn next_message(sub: &mut leosat_bus::Subscriber) -> leosat_bus::BusMessage {
        tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("bus message within deadline")
            .expect("subscription alive")
    }

    #[tokio::test]
    async fn hil_stop_fans_out_one_message_per_host() {
        let (state, mut sub) = harness(&[("h1", (1, 1)), ("h2", (1, 2))]).await;

        let (status, _) = stop(State(state.clone()), r#"{"class": "hil"}"#.into()).await;
        assert_eq!(status, StatusCode::OK);

        for expected_host in ["h1", "h2"] {
            let msg = next_message(&mut sub).await;
            assert_eq!(msg.topic, "stop");
            assert_eq!(msg.payload["class"], "sat");
            assert_eq!(msg.payload["host"], expected_host);
        }

        let registry = state.registry.lock().await;
        assert_eq!(registry.count(), 0);
        assert_eq!(registry.last_start(), None);
    }

    #[tokio::test]
    async fn ordinal_without_plane_stops_everything() {
        let (state, mut sub) = harness(&[]).await;

        // Plane gates ordinal: a stray ordinal with no plane clears the
        // whole table, and the payload still goes out unchanged.
        let (status, _) = stop(State(state.clone()), r#"{"ordinal": 2}"#.into()).await;
        assert_eq!(status, StatusCode::OK);

        let msg = next_message(&mut sub).await;
        assert_eq!(msg.topic, "stop");
        assert_eq!(msg.payload["ordinal"], 2);

        let registry = state.registry.lock().await;
        assert_eq!(registry.count(), 0);
        assert_eq!(registry.last_start(), None);
    }

    #[tokio::test]
    async fn partial_stop_with_plane_narrows_by_ordinal() {
        let (state, mut sub) = harness(&[]).await;

        let (status, _) = stop(
            State(state.clone()),
            r#"{"plane": 1, "ordinal": 2}"#.into(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let msg = next_message(&mut sub).await;
        assert_eq!(msg.topic, "stop");
        assert_eq!(msg.payload["plane"], 1);

        // Only the matching row is gone; the latch survives a partial stop.
        let registry = state.registry.lock().await;
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.last_start(), Some(100.0));
    }

    #[tokio::test]
    async fn ordinal_without_plane_is_never_validated() {
        let (state, mut sub) = harness(&[]).await;

        // Even an out-of-range ordinal is ignored when no plane is given.
        let (status, body) = debug(State(state.clone()), r#"{"ordinal": 99}"#.into()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");

        let msg = next_message(&mut sub).await;
        assert_eq!(msg.topic, "debug");
        assert_eq!(msg.payload["ordinal"], 99);

        // With a plane present the same ordinal is rejected.
        let (status, _) = debug(
            State(state.clone()),
            r#"{"plane": 1, "ordinal": 99}"#.into(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_filters_never_mutate_state() {
        let (state, _sub) = harness(&[]).await;

        let (status, _) = stop(State(state.clone()), r#"{"plane": 7}"#.into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = register(State(state.clone()), "not json".into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = register(
            State(state.clone()),
            r#"{"plane": 1, "ordinal": 9, "interval": 10.0}"#.into(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(state.registry.lock().await.count(), 2);
    }

    #[tokio::test]
    async fn unregister_unknown_key_warns_with_200() {
        let (state, _sub) = harness(&[]).await;
        let (status, body) = unregister(
            State(state.clone()),
            r#"{"plane": 1, "ordinal": 1, "interval": 99.0}"#.into(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("WARNING: unknown satellite interval"));
    }
}
