//! publisher.rs — binding side of the bus
//!
//! Maintains an in-memory FIFO drained by a single background task that
//! writes each `(topic, payload)` pair to every connected subscriber.
//! `queue_message` never blocks; after `close()` further enqueues are
//! silently dropped. A subscriber whose socket errors is detached without
//! affecting the others.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::{write_message, BusError, CONNECT_DELAY};

pub struct Publisher {
    tx: mpsc::UnboundedSender<(String, Vec<u8>)>,
    shutdown: watch::Sender<bool>,
    local_addr: SocketAddr,
}

impl Publisher {
    /// Bind the publication socket and start the accept and drain tasks.
    /// Traffic queued during the settling delay is kept and sent afterwards.
    pub async fn bind(addr: &str) -> Result<Self, BusError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| BusError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| BusError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        info!("📡 bus publisher listening on {local_addr}");

        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let subscribers: Arc<Mutex<Vec<OwnedWriteHalf>>> = Arc::new(Mutex::new(Vec::new()));

        tokio::spawn(accept_loop(listener, subscribers.clone(), shutdown_rx.clone()));
        tokio::spawn(drain_loop(rx, subscribers, shutdown_rx));

        Ok(Self { tx, shutdown, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Enqueue a message for asynchronous publication. Non-blocking; a no-op
    /// once the publisher is closed.
    pub fn queue_message(&self, topic: &str, payload: &Value) {
        let bytes = match serde_json::to_vec(payload) {
            Ok(b) => b,
            Err(e) => {
                warn!("bus: payload serialize failed on topic {topic}: {e}");
                return;
            }
        };
        let _ = self.tx.send((topic.to_string(), bytes));
    }

    /// Close the publication socket. The sole mechanism to stop the
    /// publisher; drops all subscriber connections.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }
}

async fn accept_loop(
    listener: TcpListener,
    subscribers: Arc<Mutex<Vec<OwnedWriteHalf>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!("bus: subscriber connected from {peer}");
                        let _ = stream.set_nodelay(true);
                        // The read half is dropped: subscribers never write.
                        let (_read, write) = stream.into_split();
                        subscribers.lock().await.push(write);
                    }
                    Err(e) => warn!("bus: accept error: {e}"),
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}

async fn drain_loop(
    mut rx: mpsc::UnboundedReceiver<(String, Vec<u8>)>,
    subscribers: Arc<Mutex<Vec<OwnedWriteHalf>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    // Settle after bind before sending anything.
    tokio::time::sleep(CONNECT_DELAY).await;

    loop {
        tokio::select! {
            queued = rx.recv() => {
                let Some((topic, payload)) = queued else { return };
                publish_to_all(&subscribers, topic.as_bytes(), &payload).await;
            }
            _ = shutdown.changed() => {
                // Dropping the write halves closes every subscriber socket.
                subscribers.lock().await.clear();
                return;
            }
        }
    }
}

async fn publish_to_all(
    subscribers: &Mutex<Vec<OwnedWriteHalf>>,
    topic: &[u8],
    payload: &[u8],
) {
    let mut subs = subscribers.lock().await;
    let mut kept = Vec::with_capacity(subs.len());
    for mut sub in subs.drain(..) {
        match write_message(&mut sub, topic, payload).await {
            Ok(()) => kept.push(sub),
            Err(e) => debug!("bus: dropping subscriber after send failure: {e}"),
        }
    }
    *subs = kept;
}
