//! The worker's broker receive loop.
//!
//! One dedicated loop pops the well-known work queue strictly in FIFO
//! order and runs one operation at a time — this serialization is what
//! makes registry mutation safe without finer locking. The pop uses a
//! short timeout so the loop stays interruptible by the shutdown flag.
//!
//! Operation failures never terminate the loop: every message gets exactly
//! one response record (retval, recognized error, or fault with the full
//! diagnostic), and the loop moves on. Only transport failures — the
//! broker itself going away — propagate out.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;

use crate::broker::MessageQueue;
use crate::constants::{LISTEN_POLL_TIMEOUT, WORK_QUEUE};
use crate::error::RequestError;
use crate::rpc::protocol::{RpcRequest, RpcResponse};

use super::Worker;

/// Pop and serve requests until the shutdown flag is set.
pub fn listen(worker: &Worker, queue: &dyn MessageQueue, shutdown: &AtomicBool) -> Result<()> {
    log::info!("[worker] listening for messages through the broker");
    while !shutdown.load(Ordering::Relaxed) {
        let Some(raw) = queue.blocking_pop(WORK_QUEUE, LISTEN_POLL_TIMEOUT)? else {
            continue;
        };
        process_one(worker, queue, &raw);
    }
    log::info!("[worker] receive loop exiting");
    Ok(())
}

/// Serve a single popped message.
///
/// Separate from [`listen`] so tests can drive the loop one message at a
/// time. Never returns an error: a malformed message is dropped with a
/// log line (there is no response key to answer on), and operation
/// failures are answered on the message's response queue.
pub fn process_one(worker: &Worker, queue: &dyn MessageQueue, raw: &str) {
    let request = match RpcRequest::decode(raw) {
        Ok(request) => request,
        Err(e) => {
            log::error!("[worker] dropping malformed request: {e:?}");
            return;
        }
    };
    let method = request.call.name();

    let result = worker.dispatch(request.call);
    if let Err(err) = &result {
        if err.downcast_ref::<RequestError>().is_none() {
            // Unanticipated: record the full chain here too, since the
            // caller may have stopped waiting.
            log::error!("[worker] {method} failed: {err:?}");
        }
    }

    let response = RpcResponse::from_result(&result);
    if let Err(e) = queue.push(&request.response_key, &response.encode()) {
        log::error!("[worker] could not deliver {method} response: {e:?}");
    }
}
