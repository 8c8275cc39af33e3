//! RPC envelope: method calls and their wire encoding.
//!
//! A call travels over the work queue as one JSON record:
//!
//! ```text
//! {"method": "<operation>", "kwargs": {...}, "response_key": "<unique>"}
//! ```
//!
//! and exactly one response comes back on the private `response_key` queue
//! as one of:
//!
//! - `{"retval": <value>}` — success,
//! - `{"error": <string>}` — recognized failure,
//! - `{"error": <string>, "traceback": <string>}` — unanticipated failure.
//!
//! The operation set is a closed enum: the receive loop matches on
//! [`MethodCall`] variants instead of looking a method up by name, so an
//! unknown method is a deserialization error at the queue boundary, not a
//! reflection failure mid-dispatch.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::KEY_PREFIX;
use crate::error::{RemoteFault, RequestError};

// ─── Method calls ──────────────────────────────────────────────────────────

/// The worker's closed operation set with typed keyword arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "kwargs", rename_all = "snake_case")]
pub enum MethodCall {
    /// Build and register all bots for a session, evicting old sessions
    /// first. `case_number: None` picks a case uniformly at random.
    InitializeSession {
        /// Session to initialize.
        session_code: String,
        /// Scripted case to run, or `None` to choose randomly.
        case_number: Option<usize>,
    },

    /// Fetch a bot snapshot, or fail with the recognized "not registered"
    /// error.
    GetBot {
        /// Participant to look up.
        participant_code: String,
    },

    /// Advance the bot's script by one submission. Returns `false` on
    /// exhaustion (an expected terminal condition, not a failure).
    EnqueueNextSubmission {
        /// Participant whose script advances.
        participant_code: String,
    },

    /// Return and clear the queued submission's payload.
    PopQueuedSubmission {
        /// Participant whose queued submission is popped.
        participant_code: String,
    },

    /// Record the request path and page content last served to the
    /// participant, for the script's own consistency checks.
    RecordRequestState {
        /// Participant being driven.
        participant_code: String,
        /// Request path just served.
        path: String,
        /// Page content just served.
        content: String,
    },

    /// Run a page's live handler and fan its return value out to the
    /// participant's group.
    DispatchLivePayload {
        /// Sending participant.
        participant_code: String,
        /// Page the payload belongs to.
        page_name: String,
        /// Raw payload handed to the handler.
        payload: Value,
    },

    /// No-op used to distinguish "worker not running" from "worker slow".
    Ping,
}

impl MethodCall {
    /// Wire name of the operation, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InitializeSession { .. } => "initialize_session",
            Self::GetBot { .. } => "get_bot",
            Self::EnqueueNextSubmission { .. } => "enqueue_next_submission",
            Self::PopQueuedSubmission { .. } => "pop_queued_submission",
            Self::RecordRequestState { .. } => "record_request_state",
            Self::DispatchLivePayload { .. } => "dispatch_live_payload",
            Self::Ping => "ping",
        }
    }
}

// ─── Request envelope ──────────────────────────────────────────────────────

/// One queued call: the method plus its private response queue name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// The operation and its arguments.
    #[serde(flatten)]
    pub call: MethodCall,
    /// Name of the response queue, unique per call and used exactly once.
    pub response_key: String,
}

impl RpcRequest {
    /// Wrap a call with a freshly generated response key.
    pub fn new(call: MethodCall) -> Self {
        Self {
            call,
            response_key: new_response_key(),
        }
    }

    /// Encode to the wire record.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("request serialization cannot fail")
    }

    /// Decode a wire record popped off the work queue.
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| anyhow!("invalid RPC request: {e}"))
    }
}

/// Generate a response queue name under the worker's key prefix.
///
/// UUIDv4 makes collisions negligible; the queue is abandoned after its
/// single response is consumed.
pub fn new_response_key() -> String {
    format!("{KEY_PREFIX}-{}", Uuid::new_v4())
}

// ─── Response envelope ─────────────────────────────────────────────────────

/// The three wire shapes a response can take.
///
/// Variant order matters for untagged deserialization: `Fault` must be
/// tried before `Error` so the `traceback` field is not silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcResponse {
    /// Unanticipated failure with the worker-side diagnostic.
    Fault {
        /// Short description of the failure.
        error: String,
        /// Full worker-side diagnostic chain.
        traceback: String,
    },
    /// Recognized failure: short message only.
    Error {
        /// The recognized failure message.
        error: String,
    },
    /// Success.
    Retval {
        /// The operation's return value.
        retval: Value,
    },
}

impl RpcResponse {
    /// Build the response for an operation result, classifying the error
    /// side into recognized vs. unanticipated.
    pub fn from_result(result: &Result<Value>) -> Self {
        match result {
            Ok(retval) => Self::Retval {
                retval: retval.clone(),
            },
            Err(err) => match err.downcast_ref::<RequestError>() {
                Some(request_err) => Self::Error {
                    error: request_err.to_string(),
                },
                None => Self::Fault {
                    error: err.to_string(),
                    traceback: format!("{err:?}"),
                },
            },
        }
    }

    /// Encode to the wire record.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("response serialization cannot fail")
    }

    /// Decode a wire record popped off a response queue.
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| anyhow!("invalid RPC response: {e}"))
    }

    /// Rehydrate the caller-side result: the retval, the same recognized
    /// error the worker raised, or the remote fault with its diagnostic.
    pub fn into_result(self) -> Result<Value> {
        match self {
            Self::Retval { retval } => Ok(retval),
            Self::Error { error } => Err(RequestError(error).into()),
            Self::Fault { error, traceback } => Err(RemoteFault {
                message: error,
                traceback,
            }
            .into()),
        }
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wire_shape() {
        let request = RpcRequest {
            call: MethodCall::EnqueueNextSubmission {
                participant_code: "ab12cd34".into(),
            },
            response_key: "botworker-test-key".into(),
        };
        let wire: Value = serde_json::from_str(&request.encode()).unwrap();
        assert_eq!(wire["method"], "enqueue_next_submission");
        assert_eq!(wire["kwargs"]["participant_code"], "ab12cd34");
        assert_eq!(wire["response_key"], "botworker-test-key");
    }

    #[test]
    fn ping_has_no_kwargs() {
        let request = RpcRequest::new(MethodCall::Ping);
        let wire: Value = serde_json::from_str(&request.encode()).unwrap();
        assert_eq!(wire["method"], "ping");
        assert!(wire.get("kwargs").is_none());
    }

    #[test]
    fn request_round_trip() {
        let request = RpcRequest::new(MethodCall::InitializeSession {
            session_code: "vv9ok2xl".into(),
            case_number: Some(2),
        });
        let decoded = RpcRequest::decode(&request.encode()).unwrap();
        assert_eq!(decoded.response_key, request.response_key);
        match decoded.call {
            MethodCall::InitializeSession {
                session_code,
                case_number,
            } => {
                assert_eq!(session_code, "vv9ok2xl");
                assert_eq!(case_number, Some(2));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_method_fails_to_decode() {
        let raw = r#"{"method": "drop_all_tables", "kwargs": {}, "response_key": "k"}"#;
        assert!(RpcRequest::decode(raw).is_err());
    }

    #[test]
    fn response_keys_are_unique_and_prefixed() {
        let a = new_response_key();
        let b = new_response_key();
        assert_ne!(a, b);
        assert!(a.starts_with(KEY_PREFIX));
    }

    #[test]
    fn response_decode_all_three_shapes() {
        let retval = RpcResponse::decode(r#"{"retval": [1, 2]}"#).unwrap();
        assert_eq!(retval.into_result().unwrap(), json!([1, 2]));

        let error = RpcResponse::decode(r#"{"error": "unknown participant"}"#).unwrap();
        let err = error.into_result().unwrap_err();
        let request_err = err.downcast_ref::<RequestError>().expect("recognized error");
        assert_eq!(request_err.0, "unknown participant");

        let fault =
            RpcResponse::decode(r#"{"error": "boom", "traceback": "stack frames"}"#).unwrap();
        let err = fault.into_result().unwrap_err();
        let fault = err.downcast_ref::<RemoteFault>().expect("remote fault");
        assert_eq!(fault.message, "boom");
        assert_eq!(fault.traceback, "stack frames");
    }

    #[test]
    fn null_retval_round_trips() {
        let response = RpcResponse::Retval { retval: Value::Null };
        let decoded = RpcResponse::decode(&response.encode()).unwrap();
        assert_eq!(decoded.into_result().unwrap(), Value::Null);
    }

    #[test]
    fn recognized_error_classified_without_traceback() {
        let result: Result<Value> =
            Err(RequestError("participant zz not loaded".into()).into());
        let response = RpcResponse::from_result(&result);
        let wire: Value = serde_json::from_str(&response.encode()).unwrap();
        assert_eq!(wire["error"], "participant zz not loaded");
        assert!(wire.get("traceback").is_none());
    }

    #[test]
    fn unanticipated_error_carries_diagnostic() {
        let result: Result<Value> =
            Err(anyhow!("db gone").context("loading group for participant qq"));
        let response = RpcResponse::from_result(&result);
        let wire: Value = serde_json::from_str(&response.encode()).unwrap();
        assert_eq!(wire["error"], "loading group for participant qq");
        let traceback = wire["traceback"].as_str().unwrap();
        assert!(traceback.contains("db gone"));
    }
}
