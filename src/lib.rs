//! Botworker - bot worker daemon for multi-page experiment sessions.
//!
//! This crate drives automated test clients ("bots") through a multi-page
//! web application without a real browser: per-participant execution state
//! survives across independent request/response cycles, memory is bounded
//! by age-ordered session eviction, and everything is callable either
//! in-process from concurrent request-handling threads or cross-process
//! over a message broker.
//!
//! # Architecture
//!
//! - **Worker** - owns the bot registry, runs the operation set
//! - **Bot** - one participant's scripted submission sequence
//! - **RPC** - `{method, kwargs, response_key}` envelopes with typed error
//!   propagation over the queue
//! - **Broker** - named FIFO queues + pub/sub over a Unix socket, or fully
//!   in-process
//! - **Channel** - fire-and-forget broadcast to connected front-ends
//!
//! # Modules
//!
//! - [`worker`] - the orchestrator, registry, and receive loop
//! - [`rpc`] - call envelopes and the thin client
//! - [`broker`] - the queue substrate and broker process
//! - [`app`] - collaborator traits the host application implements

// Library modules
pub mod app;
pub mod bot;
pub mod broker;
pub mod channel;
pub mod config;
pub mod constants;
pub mod error;
pub mod rpc;
pub mod worker;

// Re-export commonly used types
pub use bot::{Bot, Submission, SubmissionScript};
pub use broker::{BrokerClient, MemoryQueue, MessageQueue};
pub use channel::{ChannelLayer, NullChannelLayer, QueueChannelLayer};
pub use config::Config;
pub use error::{RemoteFault, RequestError, WorkerUnavailable};
pub use rpc::WorkerClient;
pub use worker::Worker;
