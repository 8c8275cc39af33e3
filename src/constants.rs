//! Application-wide constants for botworker.
//!
//! This module centralizes queue names and timing constants so that the
//! worker, the thin client, and the broker agree on them without threading
//! configuration through every call site.
//!
//! # Categories
//!
//! - **Queue names**: well-known broker keys
//! - **Timeouts**: response-wait and ping bounds
//! - **Polling**: receive-loop poll interval

use std::time::Duration;

// ============================================================================
// Queue names
// ============================================================================

/// Prefix for every broker key owned by the worker.
///
/// The inbound work queue, all response queues, and all broadcast groups
/// start with this prefix, so a single prefix flush can clear worker state
/// from the broker.
pub const KEY_PREFIX: &str = "botworker";

/// The single well-known inbound work queue.
///
/// Every RPC call is appended here; the worker's receive loop pops entries
/// strictly in FIFO order.
pub const WORK_QUEUE: &str = "botworker";

// ============================================================================
// Capacity
// ============================================================================

/// Default number of sessions the registry retains before evicting.
///
/// When testing many configs from the CLI launcher, each with multiple
/// cases, the history can grow quickly; 80 sessions is enough that a
/// just-created session is never evicted under realistic load while still
/// bounding worker memory.
pub const SESSIONS_PRUNE_LIMIT: usize = 80;

// ============================================================================
// Timeouts
// ============================================================================

/// How long a caller waits on its private response queue.
///
/// Normal responses arrive in about a millisecond; only a failing operation
/// takes longer. Generous so that normal operation never spuriously times
/// out — there is no advantage to cutting it off early.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(6);

/// How long the fallback ping waits for a pong.
///
/// The ping is issued only after a response timeout, so the two bounds
/// stack; keep this one shorter than [`RESPONSE_TIMEOUT`].
pub const PING_TIMEOUT: Duration = Duration::from_secs(3);

// ============================================================================
// Polling
// ============================================================================

/// Poll timeout for the worker's blocking pop on the work queue.
///
/// Short enough that the receive loop notices the shutdown flag promptly,
/// long enough not to spin.
pub const LISTEN_POLL_TIMEOUT: Duration = Duration::from_secs(3);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_bound_shorter_than_response_bound() {
        // The two timeouts stack on a slow call; the ping must not double
        // the total wait.
        assert!(PING_TIMEOUT < RESPONSE_TIMEOUT);
    }

    #[test]
    fn test_work_queue_under_prefix() {
        assert!(WORK_QUEUE.starts_with(KEY_PREFIX));
    }

    #[test]
    fn test_poll_timeout_is_reasonable() {
        assert!(LISTEN_POLL_TIMEOUT >= Duration::from_millis(500));
        assert!(LISTEN_POLL_TIMEOUT <= Duration::from_secs(10));
    }
}
