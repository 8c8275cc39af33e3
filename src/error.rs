//! Error taxonomy for the worker and its RPC transport.
//!
//! Three typed failures cross module seams here; everything else travels as
//! a plain `anyhow::Error` with its context chain intact:
//!
//! - [`RequestError`] — a recognized, caller-correctable failure (unknown
//!   participant, missing queued submission). Carried as a short message,
//!   never with a diagnostic trace, and serialized over the queue protocol
//!   as `{"error": msg}`.
//! - [`RemoteFault`] — an unanticipated failure that happened on the worker
//!   side of the queue, re-raised on the caller side with the worker's full
//!   diagnostic attached so cross-process failures stay debuggable.
//! - [`WorkerUnavailable`] — the worker process is not running at all,
//!   detected via the ping fallback. Operator-facing and actionable.
//!
//! Boundaries recover the typed variants by downcasting the `anyhow::Error`
//! they ride in (`err.downcast_ref::<RequestError>()`).

/// A recognized, caller-attributable request failure.
///
/// Converted to `{"error": msg}` when crossing the queue protocol and
/// rehydrated as the same type on the calling side. Never crashes the
/// worker and never carries a trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestError(pub String);

impl RequestError {
    /// The "participant not registered" failure for `get_bot`.
    ///
    /// Names the participant and the eviction capacity so an operator can
    /// tell "never existed" from "evicted", "wrong worker instance", or
    /// "worker restarted".
    pub fn participant_not_registered(participant_code: &str, prune_limit: usize) -> Self {
        Self(format!(
            "Participant {participant_code} not loaded in botworker. \
             This can happen for several reasons: \
             (1) You are running multiple botworkers \
             (2) You restarted the botworker after creating the session \
             (3) The bots expired \
             (the botworker stores bots for only the most recent \
             {prune_limit} sessions)."
        ))
    }
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for RequestError {}

/// An unanticipated failure re-raised on the calling side of the queue.
///
/// `traceback` is the worker-side diagnostic (`{:?}` of the original
/// `anyhow::Error`, context chain included), crammed into the caller's
/// error so the remote failure is exactly as debuggable as a local one.
#[derive(Debug, Clone)]
pub struct RemoteFault {
    /// Short description of the remote failure.
    pub message: String,
    /// Full worker-side diagnostic chain.
    pub traceback: String,
}

impl std::fmt::Display for RemoteFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "botworker error: {}\n{}", self.message, self.traceback)
    }
}

impl std::error::Error for RemoteFault {}

/// The worker process is not running.
///
/// Raised when the fallback ping also times out after a response timeout.
/// Distinct from any in-operation failure; the message tells the operator
/// what to do about it.
#[derive(Debug, Clone, Default)]
pub struct WorkerUnavailable;

impl std::fmt::Display for WorkerUnavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "If you want to use bots or live pages, you need to start the \
             botworker process."
        )
    }
}

impl std::error::Error for WorkerUnavailable {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_registered_names_participant_and_capacity() {
        let err = RequestError::participant_not_registered("kx7f2a9q", 80);
        let msg = err.to_string();
        assert!(msg.contains("kx7f2a9q"));
        assert!(msg.contains("80 sessions"));
    }

    #[test]
    fn test_request_error_survives_anyhow_downcast() {
        let err = anyhow::Error::new(RequestError("bad input".into()));
        let back = err
            .downcast_ref::<RequestError>()
            .expect("downcast should recover the typed error");
        assert_eq!(back.0, "bad input");
    }

    #[test]
    fn test_worker_unavailable_is_actionable() {
        assert!(WorkerUnavailable.to_string().contains("start"));
    }
}
