//! Broker wire protocol: queue commands and length-prefixed framing.
//!
//! Wire format:
//!
//! ```text
//! [u32 LE: payload_len] [payload_bytes]
//! ```
//!
//! Every payload is one JSON-encoded tagged message: a [`QueueCommand`]
//! client → broker, a [`QueueReply`] broker → client. The broker answers
//! each command with exactly one reply, except `Subscribe`, after which the
//! connection switches to a one-way stream of `Event` replies.
//!
//! The broker itself understands nothing about the records it carries: a
//! queue holds opaque strings in FIFO order, a channel fans opaque strings
//! out to whoever is subscribed. All RPC semantics live a layer up, in
//! [`crate::rpc`].

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

/// Maximum frame payload size (16 MB).
const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

// ─── Command and reply enums ───────────────────────────────────────────────

/// Messages sent from a client to the broker (JSON payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QueueCommand {
    /// Append a record to the tail of a queue.
    Push {
        /// Queue name.
        queue: String,
        /// Opaque record.
        payload: String,
    },

    /// Pop the head of a queue, blocking up to `timeout_ms` for one to
    /// appear. Replies `Popped { payload: None }` on timeout.
    BlockingPop {
        /// Queue name.
        queue: String,
        /// Longest the broker will hold the connection open waiting.
        timeout_ms: u64,
    },

    /// Fan a record out to every subscriber of a channel. Fire-and-forget
    /// from the publisher's perspective; the reply only reports how many
    /// subscribers were connected.
    Publish {
        /// Channel name.
        channel: String,
        /// Opaque record.
        payload: String,
    },

    /// Switch this connection into subscriber mode for the named channels.
    /// After the `Subscribed` reply the broker sends only `Event` frames.
    Subscribe {
        /// Channels to receive events for.
        channels: Vec<String>,
    },

    /// Delete every queue whose name starts with `prefix`. Used to clear
    /// abandoned response queues and stale worker state.
    FlushPrefix {
        /// Key prefix to delete.
        prefix: String,
    },

    /// Keepalive.
    Ping,
}

/// Messages sent from the broker to a client (JSON payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QueueReply {
    /// Generic acknowledgment (`Push`).
    Ok,

    /// Result of a `BlockingPop`; `None` means the timeout elapsed.
    Popped {
        /// The popped record, if any arrived in time.
        payload: Option<String>,
    },

    /// Result of a `Publish`.
    Published {
        /// Number of subscribers the record was delivered to.
        receivers: usize,
    },

    /// Acknowledgment of a `Subscribe`; `Event` frames follow.
    Subscribed,

    /// A record published on a subscribed channel.
    Event {
        /// Channel the record was published on.
        channel: String,
        /// The published record.
        payload: String,
    },

    /// Result of a `FlushPrefix`.
    Flushed {
        /// Number of queues deleted.
        queues: usize,
    },

    /// Pong in response to `Ping`.
    Pong,

    /// The command could not be carried out.
    Error {
        /// Human-readable error description.
        message: String,
    },
}

// ─── Frame encoding ────────────────────────────────────────────────────────

/// Encode a JSON message into a wire frame.
pub fn encode_frame<T: Serialize>(msg: &T) -> Vec<u8> {
    let payload = serde_json::to_vec(msg).expect("broker message serialization cannot fail");
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    buf
}

// ─── Frame decoder ─────────────────────────────────────────────────────────

/// Incremental frame decoder — accumulates bytes and yields every complete
/// frame, retaining any trailing partial frame for the next feed.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create a decoder with an empty buffer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed bytes and extract all complete frames as raw JSON payloads.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            if self.buf.len() < 4 {
                break;
            }
            let length = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
            if length == 0 {
                bail!("broker frame: zero length");
            }
            if length > MAX_FRAME_SIZE {
                bail!("broker frame too large: {length} bytes");
            }
            let total = 4 + length as usize;
            if self.buf.len() < total {
                break;
            }
            frames.push(self.buf[4..total].to_vec());
            self.buf.drain(..total);
        }

        Ok(frames)
    }

    /// Feed bytes and decode all complete frames as commands.
    pub fn feed_commands(&mut self, bytes: &[u8]) -> Result<Vec<QueueCommand>> {
        self.feed(bytes)?
            .iter()
            .map(|payload| {
                serde_json::from_slice(payload).map_err(|e| anyhow!("invalid command JSON: {e}"))
            })
            .collect()
    }

    /// Feed bytes and decode all complete frames as replies.
    pub fn feed_replies(&mut self, bytes: &[u8]) -> Result<Vec<QueueReply>> {
        self.feed(bytes)?
            .iter()
            .map(|payload| {
                serde_json::from_slice(payload).map_err(|e| anyhow!("invalid reply JSON: {e}"))
            })
            .collect()
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────
