//! # leosat-bus
//!
//! Topic-prefixed, JSON-encoded, one-to-many publication over TCP.
//!
//! One message is two length-prefixed frames on the stream:
//!
//! ```text
//! u32-be topic_len | topic bytes | u32-be payload_len | utf8(json) bytes
//! ```
//!
//! The publishing side binds and fans every queued message out to all
//! connected subscribers; the subscribing side connects (reconnecting with
//! backoff) and filters topics by byte-prefix, an empty prefix meaning all
//! topics. Delivery order equals enqueue order per publisher. Nothing is
//! retained for late joiners.

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

mod publisher;
mod subscriber;

pub use publisher::Publisher;
pub use subscriber::{BusMessage, Subscriber};

/// Frames larger than this are treated as a corrupt stream.
const MAX_FRAME: usize = 16 * 1024 * 1024;

/// Settling delay after bind before the drain task starts sending
/// (slow-joiner mitigation, same constant the legacy wrapper used).
pub(crate) const CONNECT_DELAY: std::time::Duration = std::time::Duration::from_secs(1);

/// Delay between subscriber (re)connection attempts.
pub(crate) const RECONNECT_DELAY: std::time::Duration = std::time::Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum BusError {
    #[error("could not bind publication socket on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

pub(crate) async fn write_message<W>(
    stream: &mut W,
    topic: &[u8],
    payload: &[u8],
) -> std::io::Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    stream.write_all(&(topic.len() as u32).to_be_bytes()).await?;
    stream.write_all(topic).await?;
    stream.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await
}

pub(crate) async fn read_message<R>(stream: &mut R) -> std::io::Result<(Vec<u8>, Vec<u8>)>
where
    R: AsyncReadExt + Unpin,
{
    let topic = read_frame(stream).await?;
    let payload = read_frame(stream).await?;
    Ok((topic, payload))
}

async fn read_frame<R>(stream: &mut R) -> std::io::Result<Vec<u8>>
where
    R: AsyncReadExt + Unpin,
{
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds cap"),
        ));
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}
