//! subscriber.rs — connecting side of the bus
//!
//! One read task per endpoint feeds a single delivery queue, so multiple
//! publishers interleave fairly. Connections are retried with backoff and
//! survive publisher restarts. Malformed frames are logged and skipped; the
//! loops never die on bad input.

use std::sync::Arc;

use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::{read_message, RECONNECT_DELAY};

/// One decoded bus message.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Value,
}

pub struct Subscriber {
    rx: mpsc::UnboundedReceiver<BusMessage>,
    ready: watch::Receiver<bool>,
}

impl Subscriber {
    /// Connect to one or more publisher endpoints (`host:port`). `topics`
    /// are byte-prefix filters; an empty string (or empty list) subscribes
    /// to everything.
    pub fn connect(endpoints: Vec<String>, topics: Vec<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready) = watch::channel(false);
        let ready_tx = Arc::new(ready_tx);
        let topics = Arc::new(topics);

        for endpoint in endpoints {
            tokio::spawn(endpoint_loop(
                endpoint,
                topics.clone(),
                tx.clone(),
                ready_tx.clone(),
            ));
        }

        Self { rx, ready }
    }

    /// Resolves once the first endpoint connection is established — the
    /// "ready" edge other tasks can synchronize on.
    pub async fn ready(&mut self) {
        let mut ready = self.ready.clone();
        while !*ready.borrow_and_update() {
            if ready.changed().await.is_err() {
                return;
            }
        }
    }

    /// Next message passing the topic filter. `None` after every endpoint
    /// task has exited.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }
}

fn topic_matches(filters: &[String], topic: &str) -> bool {
    filters.is_empty() || filters.iter().any(|f| topic.as_bytes().starts_with(f.as_bytes()))
}

async fn endpoint_loop(
    endpoint: String,
    topics: Arc<Vec<String>>,
    tx: mpsc::UnboundedSender<BusMessage>,
    ready: Arc<watch::Sender<bool>>,
) {
    let mut announced = false;
    loop {
        match TcpStream::connect(&endpoint).await {
            Ok(mut stream) => {
                info!("bus: subscribed to {endpoint}");
                announced = false;
                let _ = ready.send(true);
                read_until_error(&mut stream, &topics, &tx).await;
                warn!("bus: lost subscription to {endpoint}; reconnecting");
            }
            Err(e) => {
                // One warning per outage, then quiet retries.
                if !announced {
                    warn!("bus: cannot reach {endpoint}: {e}; retrying");
                    announced = true;
                } else {
                    debug!("bus: still cannot reach {endpoint}: {e}");
                }
            }
        }

        if tx.is_closed() {
            return;
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn read_until_error(
    stream: &mut TcpStream,
    topics: &[String],
    tx: &mpsc::UnboundedSender<BusMessage>,
) {
    loop {
        let (topic_bytes, payload_bytes) = match read_message(stream).await {
            Ok(frames) => frames,
            Err(e) => {
                debug!("bus: read error: {e}");
                return;
            }
        };

        let topic = match String::from_utf8(topic_bytes) {
            Ok(t) => t,
            Err(_) => {
                warn!("bus: non-UTF-8 topic frame; skipping message");
                continue;
            }
        };
        if !topic_matches(topics, &topic) {
            continue;
        }

        let payload: Value = match serde_json::from_slice(&payload_bytes) {
            Ok(v) => v,
            Err(e) => {
                warn!("bus: malformed JSON payload on topic {topic}: {e}");
                continue;
            }
        };

        if tx.send(BusMessage { topic, payload }).is_err() {
            return;
        }
    }
}
