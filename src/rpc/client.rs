//! The thin client — the only contract the application depends on.
//!
//! A [`WorkerClient`] is constructed once per process with one of two call
//! paths:
//!
//! - **direct** — an in-process [`Worker`] instance; operations run
//!   synchronously on the calling thread and failures surface as ordinary
//!   synchronous errors;
//! - **queue** — a [`MessageQueue`]; operations are serialized through the
//!   broker to a worker process, with a bounded response wait.
//!
//! The operation set and argument contracts are identical on both paths;
//! only failure timing differs.
//!
//! # Timeout handling
//!
//! A queue-path call that produces no response within the bound does not
//! immediately fail as "worker down": first a ping with its own short
//! bound disambiguates. A dead worker yields the operator-facing
//! [`WorkerUnavailable`]; a live one yields a distinct "ran but produced
//! no result" diagnostic, since a genuine logic error would have answered
//! quickly with a fault.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};

use crate::broker::MessageQueue;
use crate::constants::{PING_TIMEOUT, RESPONSE_TIMEOUT, WORK_QUEUE};
use crate::error::WorkerUnavailable;
use crate::worker::Worker;

use super::protocol::{MethodCall, RpcRequest, RpcResponse};

/// How a call reaches the worker.
enum CallPath {
    /// Same-process worker instance.
    Direct(Arc<Worker>),
    /// Cross-process via the broker.
    Queue(Arc<dyn MessageQueue>),
}

/// Typed access to the worker's operation set.
pub struct WorkerClient {
    path: CallPath,
}

impl WorkerClient {
    /// Call a worker living in this process.
    pub fn in_process(worker: Arc<Worker>) -> Self {
        Self {
            path: CallPath::Direct(worker),
        }
    }

    /// Call a worker process through the broker.
    pub fn over_queue(queue: Arc<dyn MessageQueue>) -> Self {
        Self {
            path: CallPath::Queue(queue),
        }
    }

    // ── Operations ──────────────────────────────────────────────────────────

    /// Build and register a session's bots.
    pub fn initialize_session(
        &self,
        session_code: &str,
        case_number: Option<usize>,
    ) -> Result<()> {
        self.call(MethodCall::InitializeSession {
            session_code: session_code.to_string(),
            case_number,
        })?;
        Ok(())
    }

    /// Fetch a bot snapshot (`participant_code`, `path`, `exhausted`).
    pub fn get_bot(&self, participant_code: &str) -> Result<Value> {
        self.call(MethodCall::GetBot {
            participant_code: participant_code.to_string(),
        })
    }

    /// Advance the bot's script; `false` means the script is exhausted.
    pub fn enqueue_next_submission(&self, participant_code: &str) -> Result<bool> {
        let retval = self.call(MethodCall::EnqueueNextSubmission {
            participant_code: participant_code.to_string(),
        })?;
        retval
            .as_bool()
            .with_context(|| format!("enqueue_next_submission returned non-bool: {retval}"))
    }

    /// Return and clear the queued submission's form payload.
    pub fn pop_queued_submission(&self, participant_code: &str) -> Result<Map<String, Value>> {
        let retval = self.call(MethodCall::PopQueuedSubmission {
            participant_code: participant_code.to_string(),
        })?;
        match retval {
            Value::Object(payload) => Ok(payload),
            other => bail!("pop_queued_submission returned non-object: {other}"),
        }
    }

    /// Record the path and page content last served to the participant.
    pub fn record_request_state(
        &self,
        participant_code: &str,
        path: &str,
        content: &str,
    ) -> Result<()> {
        self.call(MethodCall::RecordRequestState {
            participant_code: participant_code.to_string(),
            path: path.to_string(),
            content: content.to_string(),
        })?;
        Ok(())
    }

    /// Run a page's live handler and fan the result out to the group.
    pub fn dispatch_live_payload(
        &self,
        participant_code: &str,
        page_name: &str,
        payload: Value,
    ) -> Result<()> {
        self.call(MethodCall::DispatchLivePayload {
            participant_code: participant_code.to_string(),
            page_name: page_name.to_string(),
            payload,
        })?;
        Ok(())
    }

    /// Check that a worker is serving the queue.
    ///
    /// On the direct path this is trivially true. On the queue path a
    /// missing pong within the bound fails with [`WorkerUnavailable`].
    pub fn ping(&self) -> Result<()> {
        match &self.path {
            CallPath::Direct(_) => Ok(()),
            CallPath::Queue(queue) => ping_worker(queue.as_ref()),
        }
    }

    // ── Internal ────────────────────────────────────────────────────────────

    /// Run one call over whichever path this client was built with.
    fn call(&self, call: MethodCall) -> Result<Value> {
        match &self.path {
            CallPath::Direct(worker) => worker.dispatch(call),
            CallPath::Queue(queue) => {
                let request = RpcRequest::new(call);
                queue
                    .push(WORK_QUEUE, &request.encode())
                    .context("enqueue RPC request")?;
                wait_for_response(queue.as_ref(), &request)
            }
        }
    }
}

/// Block on the private response queue, disambiguating a timeout.
fn wait_for_response(queue: &dyn MessageQueue, request: &RpcRequest) -> Result<Value> {
    match queue.blocking_pop(&request.response_key, RESPONSE_TIMEOUT)? {
        Some(raw) => RpcResponse::decode(&raw)?.into_result(),
        None => {
            // No response in time. A dead worker and a slow worker get
            // different diagnostics.
            ping_worker(queue)?;
            bail!(
                "botworker is running but did not return a result for {} within {:?}",
                request.call.name(),
                RESPONSE_TIMEOUT
            )
        }
    }
}

/// Queue-path ping with its own short bound.
fn ping_worker(queue: &dyn MessageQueue) -> Result<()> {
    let request = RpcRequest::new(MethodCall::Ping);
    queue
        .push(WORK_QUEUE, &request.encode())
        .context("enqueue ping")?;
    match queue.blocking_pop(&request.response_key, PING_TIMEOUT)? {
        Some(_) => Ok(()),
        None => Err(WorkerUnavailable.into()),
    }
}

impl std::fmt::Debug for WorkerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path = match self.path {
            CallPath::Direct(_) => "direct",
            CallPath::Queue(_) => "queue",
        };
        f.debug_struct("WorkerClient").field("path", &path).finish()
    }
}
