//! Socket client for the broker process.
//!
//! Each operation opens its own short-lived connection: connect, send one
//! command frame, read one reply, drop. That keeps [`BrokerClient`] free of
//! interior state, safe to share across request-handling threads, and
//! immune to one caller's blocking pop stalling another caller's push.
//! Unix-socket connects are cheap enough that pooling would buy nothing
//! here.
//!
//! Subscriptions are the exception: [`BrokerClient::subscribe`] hands back
//! a [`Subscription`] that owns its connection for as long as the caller
//! keeps listening.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};

use super::protocol::{encode_frame, FrameDecoder, QueueCommand, QueueReply};
use super::MessageQueue;

/// Slack added to a blocking pop's read timeout so the broker's own
/// timeout reply always arrives before the socket gives up.
const REPLY_SLACK: Duration = Duration::from_secs(2);

/// Read timeout for commands that answer immediately.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for the standalone broker process.
#[derive(Debug, Clone)]
pub struct BrokerClient {
    socket_path: PathBuf,
}

impl BrokerClient {
    /// Create a client for the broker socket at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: path.into(),
        }
    }

    /// The socket path this client connects to.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send one command and read its single reply.
    fn request(&self, cmd: &QueueCommand, read_timeout: Duration) -> Result<QueueReply> {
        let mut stream = UnixStream::connect(&self.socket_path).with_context(|| {
            format!("connect to broker socket: {}", self.socket_path.display())
        })?;
        stream
            .set_read_timeout(Some(read_timeout))
            .context("set broker socket read timeout")?;
        stream
            .write_all(&encode_frame(cmd))
            .context("send command to broker")?;
        read_reply(&mut stream)
    }

    /// Keepalive round-trip to the broker process itself.
    pub fn ping_broker(&self) -> Result<()> {
        match self.request(&QueueCommand::Ping, COMMAND_TIMEOUT)? {
            QueueReply::Pong => Ok(()),
            other => bail!("unexpected ping reply: {other:?}"),
        }
    }

    /// Subscribe to channels, converting this into a dedicated event
    /// connection.
    pub fn subscribe(&self, channels: &[String]) -> Result<Subscription> {
        let mut stream = UnixStream::connect(&self.socket_path).with_context(|| {
            format!("connect to broker socket: {}", self.socket_path.display())
        })?;
        stream
            .set_read_timeout(Some(COMMAND_TIMEOUT))
            .context("set broker socket read timeout")?;
        stream
            .write_all(&encode_frame(&QueueCommand::Subscribe {
                channels: channels.to_vec(),
            }))
            .context("send subscribe to broker")?;

        let mut subscription = Subscription {
            stream,
            decoder: FrameDecoder::new(),
            pending: Vec::new(),
        };
        match subscription.read_one()? {
            QueueReply::Subscribed => Ok(subscription),
            other => bail!("unexpected subscribe reply: {other:?}"),
        }
    }
}

impl MessageQueue for BrokerClient {
    fn push(&self, queue: &str, payload: &str) -> Result<()> {
        let cmd = QueueCommand::Push {
            queue: queue.to_string(),
            payload: payload.to_string(),
        };
        match self.request(&cmd, COMMAND_TIMEOUT)? {
            QueueReply::Ok => Ok(()),
            QueueReply::Error { message } => bail!("broker push failed: {message}"),
            other => bail!("unexpected push reply: {other:?}"),
        }
    }

    fn blocking_pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>> {
        let cmd = QueueCommand::BlockingPop {
            queue: queue.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        };
        match self.request(&cmd, timeout + REPLY_SLACK)? {
            QueueReply::Popped { payload } => Ok(payload),
            QueueReply::Error { message } => bail!("broker pop failed: {message}"),
            other => bail!("unexpected pop reply: {other:?}"),
        }
    }

    fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        let cmd = QueueCommand::Publish {
            channel: channel.to_string(),
            payload: payload.to_string(),
        };
        match self.request(&cmd, COMMAND_TIMEOUT)? {
            QueueReply::Published { receivers } => Ok(receivers),
            QueueReply::Error { message } => bail!("broker publish failed: {message}"),
            other => bail!("unexpected publish reply: {other:?}"),
        }
    }

    fn flush_prefix(&self, prefix: &str) -> Result<usize> {
        let cmd = QueueCommand::FlushPrefix {
            prefix: prefix.to_string(),
        };
        match self.request(&cmd, COMMAND_TIMEOUT)? {
            QueueReply::Flushed { queues } => Ok(queues),
            QueueReply::Error { message } => bail!("broker flush failed: {message}"),
            other => bail!("unexpected flush reply: {other:?}"),
        }
    }
}

/// Read one complete reply frame from a command connection.
///
/// Accumulates bytes until the frame decoder produces a complete frame.
/// A read timeout surfaces as an error here — command replies are
/// immediate, so a silent broker is a failure, not a condition.
fn read_reply(stream: &mut UnixStream) -> Result<QueueReply> {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = stream.read(&mut buf).context("read broker reply")?;
        if n == 0 {
            bail!("broker closed connection unexpectedly");
        }
        let mut replies = decoder.feed_replies(&buf[..n])?;
        if !replies.is_empty() {
            return Ok(replies.remove(0));
        }
    }
}

/// A dedicated subscriber connection.
#[derive(Debug)]
pub struct Subscription {
    stream: UnixStream,
    decoder: FrameDecoder,
    pending: Vec<QueueReply>,
}

impl Subscription {
    /// Wait up to `timeout` for the next published event.
    ///
    /// Returns `Ok(None)` if nothing was published within the bound.
    pub fn next_event(&mut self, timeout: Duration) -> Result<Option<(String, String)>> {
        self.stream
            .set_read_timeout(Some(timeout))
            .context("set subscription read timeout")?;
        loop {
            if !self.pending.is_empty() {
                match self.pending.remove(0) {
                    QueueReply::Event { channel, payload } => {
                        return Ok(Some((channel, payload)))
                    }
                    other => bail!("unexpected frame on subscription: {other:?}"),
                }
            }
            match self.try_read() {
                Ok(true) => {}
                Ok(false) => return Ok(None), // timed out
                Err(e) => return Err(e),
            }
        }
    }

    /// Read one reply frame, blocking until it arrives.
    fn read_one(&mut self) -> Result<QueueReply> {
        loop {
            if !self.pending.is_empty() {
                return Ok(self.pending.remove(0));
            }
            if !self.try_read()? {
                bail!("timed out waiting for broker reply");
            }
        }
    }

    /// Pull bytes off the socket into `pending`. `Ok(false)` means the
    /// read timed out with no data.
    fn try_read(&mut self) -> Result<bool> {
        let mut buf = [0u8; 8192];
        match self.stream.read(&mut buf) {
            Ok(0) => bail!("broker closed subscription"),
            Ok(n) => {
                self.pending.extend(self.decoder.feed_replies(&buf[..n])?);
                Ok(true)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                Ok(false)
            }
            Err(e) => Err(e).context("read from subscription"),
        }
    }
}
