//! Request/response RPC over the ordering-only queue substrate.
//!
//! # Architecture
//!
//! ```text
//! caller ──RpcRequest──► work queue ──► receive loop ──► Worker
//!        ◄─RpcResponse── response queue ◄── exactly one push ──
//! ```
//!
//! [`protocol`] defines the envelopes; [`client`] is the only surface the
//! rest of the application calls. A caller never sees the queue: it gets
//! back either the operation's value, the same recognized error the worker
//! raised, or a fault carrying the worker-side diagnostic.

pub mod client;
pub mod protocol;

pub use client::WorkerClient;
pub use protocol::{MethodCall, RpcRequest, RpcResponse};
