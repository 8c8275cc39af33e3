//! Message broker — the ordering-only transport under the RPC layer.
//!
//! # Purpose
//!
//! The broker is a deliberately dumb substrate: named FIFO queues of opaque
//! strings with a blocking pop, plus fire-and-forget publish/subscribe
//! channels. It guarantees ordering within one queue and nothing else.
//! Everything that makes it an RPC transport — envelopes, correlation,
//! error propagation — lives in [`crate::rpc`].
//!
//! # Architecture
//!
//! ```text
//! HTTP thread ──Push(work queue, request)───────────► Broker
//!             ◄──BlockingPop(response queue) reply ──
//!
//! Worker      ──BlockingPop(work queue)─────────────► Broker
//!             ──Push(response queue, response)──────►
//!
//! Front-end   ──Subscribe(live group)───────────────► Broker
//!             ◄──Event frames ──────────────────────
//! ```
//!
//! Three faces of the same substrate:
//!
//! - [`MessageQueue`] — the trait seam everything above the broker talks to;
//! - [`MemoryQueue`] — in-process implementation (tests, single-process
//!   deployments, and the broker process's own state store);
//! - [`BrokerClient`] — socket client for the standalone broker process run
//!   by [`run`].
//!
//! # Spawning
//!
//! The broker runs as its own process:
//! ```sh
//! botworker broker [--socket <path>]
//! ```
//! The worker and the web processes connect to the same socket. The broker
//! holds no durable state; restarting it drops all queued records.

pub mod connection;
pub mod memory;
pub mod protocol;

pub use connection::BrokerClient;
pub use memory::MemoryQueue;

use std::io::Read;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

use protocol::{encode_frame, FrameDecoder, QueueCommand, QueueReply};

/// Maximum path length for a Unix domain socket (macOS kernel limit).
const MAX_SOCK_PATH: usize = 104;

/// How long an idle subscriber connection goes between disconnect checks.
const SUBSCRIBER_POLL: Duration = Duration::from_millis(250);

// ─── Trait seam ────────────────────────────────────────────────────────────

/// The ordering-only transport the worker and its callers are written
/// against.
///
/// Implementations must be safe to share across threads; every method is a
/// single self-contained operation and holds no lock across a blocking
/// wait other than the pop it was asked for.
pub trait MessageQueue: Send + Sync {
    /// Append a record to the tail of `queue`.
    fn push(&self, queue: &str, payload: &str) -> Result<()>;

    /// Pop the head of `queue`, waiting up to `timeout` for a record.
    /// `Ok(None)` means the timeout elapsed with the queue still empty.
    fn blocking_pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>>;

    /// Fan `payload` out to every subscriber of `channel`. Returns the
    /// number of subscribers it reached; zero is not an error.
    fn publish(&self, channel: &str, payload: &str) -> Result<usize>;

    /// Delete every queue whose name starts with `prefix`. Returns the
    /// number of queues removed.
    fn flush_prefix(&self, prefix: &str) -> Result<usize>;
}

// ─── Socket path ───────────────────────────────────────────────────────────

/// Default broker socket path: `/tmp/botworker-{uid}/broker.sock`.
pub fn default_socket_path() -> PathBuf {
    // SAFETY: getuid has no failure modes and touches no memory.
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/botworker-{uid}/broker.sock"))
}

/// Validate a socket path against the kernel length limit.
pub fn validate_socket_path(path: &Path) -> Result<()> {
    let path_str = path.to_string_lossy();
    if path_str.len() > MAX_SOCK_PATH {
        anyhow::bail!(
            "broker socket path too long ({} > {MAX_SOCK_PATH}): {path_str}",
            path_str.len()
        );
    }
    Ok(())
}

// ─── Broker process ────────────────────────────────────────────────────────

/// Run the broker process until the shutdown flag is set.
///
/// Binds the socket (replacing any stale file from a previous run), then
/// accepts connections and serves each on its own thread against a shared
/// [`MemoryQueue`]. All state dies with the process.
pub fn run(socket_path: &Path, shutdown: &Arc<AtomicBool>) -> Result<()> {
    validate_socket_path(socket_path)?;

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create broker socket dir: {}", parent.display()))?;
    }

    // Remove stale socket file from a previous run.
    let _ = std::fs::remove_file(socket_path);

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("bind broker socket: {}", socket_path.display()))?;

    // Owner-only permissions (0o600).
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600));
    }

    log::info!("[broker] listening on {}", socket_path.display());

    let state = MemoryQueue::new();

    // Non-blocking accept so the loop notices the shutdown flag.
    listener.set_nonblocking(true)?;

    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _)) => {
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    if let Err(e) = handle_connection(stream, &state) {
                        log::debug!("[broker] connection ended: {e}");
                    }
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(100));
            }
            Err(e) => return Err(e).context("accept broker connection"),
        }
    }

    let _ = std::fs::remove_file(socket_path);
    log::info!("[broker] exiting");
    Ok(())
}

/// Serve one client connection until it disconnects.
///
/// Commands are answered in order on the same connection. A `Subscribe`
/// command flips the connection into subscriber mode, after which the
/// broker only writes `Event` frames.
fn handle_connection(mut stream: UnixStream, state: &Arc<MemoryQueue>) -> Result<()> {
    use std::io::Write;

    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = stream.read(&mut buf).context("read from client")?;
        if n == 0 {
            return Ok(()); // client disconnected
        }

        for cmd in decoder.feed_commands(&buf[..n])? {
            let reply = match cmd {
                QueueCommand::Push { queue, payload } => {
                    state.push(&queue, &payload)?;
                    QueueReply::Ok
                }
                QueueCommand::BlockingPop { queue, timeout_ms } => {
                    let payload =
                        state.blocking_pop(&queue, Duration::from_millis(timeout_ms))?;
                    QueueReply::Popped { payload }
                }
                QueueCommand::Publish { channel, payload } => {
                    let receivers = state.publish(&channel, &payload)?;
                    QueueReply::Published { receivers }
                }
                QueueCommand::FlushPrefix { prefix } => {
                    let queues = state.flush_prefix(&prefix)?;
                    QueueReply::Flushed { queues }
                }
                QueueCommand::Ping => QueueReply::Pong,
                QueueCommand::Subscribe { channels } => {
                    // Register before acking so an event published right
                    // after the ack cannot be missed.
                    let events = state.subscribe(&channels);
                    stream
                        .write_all(&encode_frame(&QueueReply::Subscribed))
                        .context("ack subscribe")?;
                    return serve_subscriber(stream, events);
                }
            };
            stream
                .write_all(&encode_frame(&reply))
                .context("write reply")?;
        }
    }
}

/// Forward published events to a subscriber until it disconnects.
///
/// The socket is probed with a short read timeout between events so a
/// vanished subscriber is noticed even when its channels stay quiet.
fn serve_subscriber(
    mut stream: UnixStream,
    events: std::sync::mpsc::Receiver<(String, String)>,
) -> Result<()> {
    use std::io::Write;

    stream
        .set_read_timeout(Some(SUBSCRIBER_POLL))
        .context("subscriber socket mode")?;

    let mut probe = [0u8; 64];
    loop {
        match events.recv_timeout(SUBSCRIBER_POLL) {
            Ok((channel, payload)) => {
                let frame = encode_frame(&QueueReply::Event { channel, payload });
                if stream.write_all(&frame).is_err() {
                    return Ok(()); // subscriber gone
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                // Subscribers never send after Subscribe, so anything but
                // a read timeout here means the peer is gone.
                match stream.read(&mut probe) {
                    Ok(0) => return Ok(()),
                    Ok(_) => {}
                    Err(e)
                        if matches!(
                            e.kind(),
                            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                        ) => {}
                    Err(_) => return Ok(()),
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────
