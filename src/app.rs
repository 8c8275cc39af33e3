//! Collaborator seams to the experiment application.
//!
//! The worker never touches the application's persistence or page layers
//! directly; it consumes the three traits defined here. The surrounding
//! application implements them and injects them when constructing the
//! [`crate::worker::Worker`]:
//!
//! - [`SessionDirectory`] — who is in a session and where each participant
//!   currently is (app, page, page ordinal, position within its group).
//! - [`ScriptSource`] — the opaque submission generator: given a session and
//!   a case selection, the full ordered script for every participant.
//! - [`LivePages`] — resolve a page's live-interaction handler.

use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use crate::bot::Submission;

/// A participant's current location within its session.
#[derive(Debug, Clone)]
pub struct ParticipantRecord {
    /// Session this participant belongs to.
    pub session_code: String,
    /// App owning the participant's current page.
    pub app_name: String,
    /// Name of the participant's current page.
    pub page_name: String,
    /// Ordinal of the current page within the session's page sequence.
    pub page_index: u32,
    /// The participant's position within its group (1-based).
    pub position: u32,
}

/// One member of a participant's group: internal position plus the
/// externally visible participant code.
#[derive(Debug, Clone)]
pub struct GroupMember {
    /// Position within the group (1-based).
    pub position: u32,
    /// Externally visible participant code.
    pub participant_code: String,
}

/// Session/participant directory.
pub trait SessionDirectory: Send + Sync {
    /// Look up a participant's session and current page assignment.
    fn participant(&self, participant_code: &str) -> Result<ParticipantRecord>;

    /// The ordered roster of the participant's current group.
    fn group_members(&self, participant_code: &str) -> Result<Vec<GroupMember>>;
}

/// One participant's complete script for a session + case.
#[derive(Debug, Clone)]
pub struct BotScript {
    /// Participant the script drives.
    pub participant_code: String,
    /// Ordered submissions, first page first.
    pub submissions: Vec<Submission>,
}

/// The opaque submission generator.
///
/// Scripts are produced once per `initialize_session` call and consumed
/// through each bot's cursor; the source is never asked to restart a
/// sequence mid-run.
pub trait ScriptSource: Send + Sync {
    /// Number of scripted cases configured for a session.
    fn num_cases(&self, session_code: &str) -> Result<usize>;

    /// Full scripts for every participant in the session, in the session's
    /// participant order.
    fn session_scripts(&self, session_code: &str, case_number: usize) -> Result<Vec<BotScript>>;
}

/// A page's live-interaction handler.
///
/// `call` receives the sender's position within its group and the raw
/// payload, and returns either `Value::Null` (nothing to send back) or a
/// JSON object keyed by position — `"0"` being the broadcast key.
pub trait LiveMethod: Send + Sync {
    /// Invoke the handler.
    fn call(&self, position: u32, payload: Value) -> Result<Value>;
}

/// Resolves an `(app, page)` pair to its live handler.
pub trait LivePages: Send + Sync {
    /// Resolve the handler for a page, failing if the page has none.
    fn resolve(&self, app_name: &str, page_name: &str) -> Result<Arc<dyn LiveMethod>>;
}
