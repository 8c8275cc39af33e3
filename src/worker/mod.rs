//! The worker — orchestrates bot state across request/response cycles.
//!
//! # Architecture
//!
//! ```text
//! HTTP thread ──WorkerClient (direct)──► Worker ──► BotRegistry / Bots
//! HTTP thread ──WorkerClient (queue)──► broker ──► listen loop ──► Worker
//! ```
//!
//! One `Worker` instance exists per process, constructed by the entry
//! point and injected into both call paths — there is no process-global
//! worker. Its operations are a closed set ([`MethodCall`]) dispatched by
//! an explicit match in [`Worker::dispatch`], so the queue path and the
//! direct path run exactly the same code.
//!
//! # Locking
//!
//! Two coarse mutexes cover all shared state:
//!
//! - `registry` — session insertion/eviction and every bot mutation;
//! - `queued` — the prepared-submission map, so a pop cannot race ahead
//!   of its enqueue for the same participant.
//!
//! `enqueue_next_submission` takes `queued` before `registry`; nothing
//! else takes both. Locks are held for the mutation only, never across a
//! collaborator call or a broker wait. In broker mode the receive loop
//! serializes every call anyway, and the locks are uncontended.

pub mod listen;
pub mod registry;

pub use registry::BotRegistry;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use rand::Rng;
use serde_json::{json, Map, Value};

use crate::app::{LivePages, ScriptSource, SessionDirectory};
use crate::bot::{Bot, Submission, SubmissionScript};
use crate::channel::{live_group, send_completion_notice, ChannelLayer};
use crate::rpc::protocol::MethodCall;

/// Broadcast key in a live handler's return value: position `0` addresses
/// every member of the group.
const BROADCAST_KEY: &str = "0";

/// The bot worker: owns the registry and runs the operation set.
pub struct Worker {
    /// Live bots; guards insertion/eviction and all bot mutation.
    registry: Mutex<BotRegistry>,
    /// Prepared submissions awaiting pop, at most one per participant.
    queued: Mutex<HashMap<String, Submission>>,
    directory: Arc<dyn SessionDirectory>,
    scripts: Arc<dyn ScriptSource>,
    pages: Arc<dyn LivePages>,
    channels: Arc<dyn ChannelLayer>,
}

impl Worker {
    /// Construct a worker with its collaborators and session capacity.
    pub fn new(
        directory: Arc<dyn SessionDirectory>,
        scripts: Arc<dyn ScriptSource>,
        pages: Arc<dyn LivePages>,
        channels: Arc<dyn ChannelLayer>,
        prune_limit: usize,
    ) -> Self {
        Self {
            registry: Mutex::new(BotRegistry::new(prune_limit)),
            queued: Mutex::new(HashMap::new()),
            directory,
            scripts,
            pages,
            channels,
        }
    }

    /// Run one operation. Both call paths (direct and queue) end here.
    pub fn dispatch(&self, call: MethodCall) -> Result<Value> {
        match call {
            MethodCall::InitializeSession {
                session_code,
                case_number,
            } => {
                self.initialize_session(&session_code, case_number)?;
                Ok(Value::Null)
            }
            MethodCall::GetBot { participant_code } => self.bot_snapshot(&participant_code),
            MethodCall::EnqueueNextSubmission { participant_code } => self
                .enqueue_next_submission(&participant_code)
                .map(Value::Bool),
            MethodCall::PopQueuedSubmission { participant_code } => self
                .pop_queued_submission(&participant_code)
                .map(Value::Object),
            MethodCall::RecordRequestState {
                participant_code,
                path,
                content,
            } => {
                self.record_request_state(&participant_code, &path, &content)?;
                Ok(Value::Null)
            }
            MethodCall::DispatchLivePayload {
                participant_code,
                page_name,
                payload,
            } => {
                self.dispatch_live_payload(&participant_code, &page_name, payload)?;
                Ok(Value::Null)
            }
            MethodCall::Ping => Ok(Value::Null),
        }
    }

    // ── Session lifecycle ───────────────────────────────────────────────────

    /// Build and register every bot for a session.
    ///
    /// Evicts the oldest sessions first if the registry is over capacity.
    /// With `case_number: None` a case is chosen uniformly at random among
    /// the configured cases. Script construction happens before the
    /// registry lock is taken, so a slow generator never blocks other
    /// operations.
    pub fn initialize_session(
        &self,
        session_code: &str,
        case_number: Option<usize>,
    ) -> Result<()> {
        let case_number = match case_number {
            Some(n) => n,
            None => {
                let num_cases = self.scripts.num_cases(session_code)?.max(1);
                rand::rng().random_range(0..num_cases)
            }
        };

        let scripts = self.scripts.session_scripts(session_code, case_number)?;
        let bots: Vec<Bot> = scripts
            .into_iter()
            .map(|s| {
                Bot::new(
                    s.participant_code,
                    session_code,
                    SubmissionScript::new(s.submissions),
                )
            })
            .collect();

        let mut registry = self.registry.lock().expect("registry mutex poisoned");
        registry.prune();
        log::info!(
            "[worker] initializing session {session_code} case {case_number} ({} bot(s))",
            bots.len()
        );
        registry.insert_session(session_code, bots);
        Ok(())
    }

    // ── Bot access ──────────────────────────────────────────────────────────

    /// Run a closure against a registered bot.
    ///
    /// Fails with the recognized "not registered" error; the closure runs
    /// under the registry lock, so keep it short.
    pub fn with_bot<T>(
        &self,
        participant_code: &str,
        f: impl FnOnce(&Bot) -> T,
    ) -> Result<T> {
        let registry = self.registry.lock().expect("registry mutex poisoned");
        let bot = registry.get(participant_code).map_err(anyhow::Error::new)?;
        Ok(f(bot))
    }

    /// Serializable view of a bot, for the queue path of `get_bot`.
    pub fn bot_snapshot(&self, participant_code: &str) -> Result<Value> {
        self.with_bot(participant_code, |bot| {
            json!({
                "participant_code": bot.participant_code,
                "path": bot.path,
                "exhausted": bot.script.is_exhausted(),
            })
        })
    }

    // ── Submission queue ────────────────────────────────────────────────────

    /// Advance the bot's script by one submission and queue it.
    ///
    /// Returns `false` once the script is exhausted — an expected terminal
    /// condition, not a failure — leaving any previously queued submission
    /// for the participant untouched. The first time exhaustion is
    /// observed, a completion notice goes out on the session launcher
    /// channel.
    pub fn enqueue_next_submission(&self, participant_code: &str) -> Result<bool> {
        enum Outcome {
            Queued,
            FirstExhaustion(String),
            Exhausted,
        }

        // queued before registry; pop takes only queued.
        let mut queued = self.queued.lock().expect("queued mutex poisoned");
        let mut registry = self.registry.lock().expect("registry mutex poisoned");
        let bot = registry
            .get_mut(participant_code)
            .map_err(anyhow::Error::new)?;

        let outcome = match bot.script.next_submission() {
            Some(submission) => {
                queued.insert(participant_code.to_string(), submission);
                Outcome::Queued
            }
            // Exhausted. Do not clobber an already-queued submission —
            // stray GET requests may still pop it.
            None if bot.finished => Outcome::Exhausted,
            None => {
                bot.finished = true;
                Outcome::FirstExhaustion(bot.session_code.clone())
            }
        };
        drop(registry);
        drop(queued);

        match outcome {
            Outcome::Queued => Ok(true),
            Outcome::FirstExhaustion(session_code) => {
                // Fire-and-forget: a missing launcher listener must not
                // fail the request.
                if let Err(e) =
                    send_completion_notice(&*self.channels, &session_code, participant_code)
                {
                    log::warn!("[worker] completion notice for {participant_code}: {e:?}");
                }
                Ok(false)
            }
            Outcome::Exhausted => Ok(false),
        }
    }

    /// Return and clear the queued submission's payload.
    ///
    /// Popping without a matching enqueue is a caller protocol violation
    /// and therefore an unanticipated error, not a recognized one.
    pub fn pop_queued_submission(&self, participant_code: &str) -> Result<Map<String, Value>> {
        let mut queued = self.queued.lock().expect("queued mutex poisoned");
        let submission = queued.remove(participant_code).ok_or_else(|| {
            anyhow!("no submission queued for participant {participant_code}")
        })?;
        // The page identifier is only used while preparing; callers get
        // the form payload alone.
        Ok(submission.post_data)
    }

    // ── Request state ───────────────────────────────────────────────────────

    /// Record the path and page content last served to the participant,
    /// so the script's own consistency checks see the page it is on.
    pub fn record_request_state(
        &self,
        participant_code: &str,
        path: &str,
        content: &str,
    ) -> Result<()> {
        let mut registry = self.registry.lock().expect("registry mutex poisoned");
        let bot = registry
            .get_mut(participant_code)
            .map_err(anyhow::Error::new)?;
        bot.record_request_state(path, content);
        Ok(())
    }

    // ── Live payloads ───────────────────────────────────────────────────────

    /// Run a page's live handler and fan its return value out to the
    /// sender's group.
    ///
    /// The handler returns `Null` (nothing to send) or an object keyed by
    /// group position, `"0"` meaning broadcast. Each member receives its
    /// own keyed value if present, otherwise the broadcast value; members
    /// with neither receive nothing. Positions are translated to
    /// participant codes before publishing on the session's live channel
    /// for the current page.
    pub fn dispatch_live_payload(
        &self,
        participant_code: &str,
        page_name: &str,
        payload: Value,
    ) -> Result<()> {
        let record = self.directory.participant(participant_code)?;
        if record.page_name != page_name {
            bail!(
                "stale live payload: participant {participant_code} is on page {}, not {page_name}",
                record.page_name
            );
        }

        let handler = self.pages.resolve(&record.app_name, &record.page_name)?;
        let retval = handler.call(record.position, payload)?;
        if retval.is_null() {
            return Ok(());
        }
        let Value::Object(retval) = retval else {
            bail!("{page_name} live method must return a dict, got: {retval}");
        };

        let members = self.directory.group_members(participant_code)?;
        if !retval.contains_key(BROADCAST_KEY) {
            for key in retval.keys() {
                let known = key
                    .parse::<u32>()
                    .is_ok_and(|p| members.iter().any(|m| m.position == p));
                if !known {
                    bail!(
                        "{page_name} live method has invalid return value: \
                         no player with id_in_group={key}"
                    );
                }
            }
        }

        let mut event = Map::new();
        for member in &members {
            let value = retval
                .get(&member.position.to_string())
                .or_else(|| retval.get(BROADCAST_KEY));
            if let Some(v) = value {
                if !v.is_null() {
                    event.insert(member.participant_code.clone(), v.clone());
                }
            }
        }

        self.channels.group_send(
            &live_group(&record.session_code, record.page_index),
            &Value::Object(event),
        )
    }

    // ── Introspection ───────────────────────────────────────────────────────

    /// Number of sessions currently retained, for diagnostics.
    pub fn session_count(&self) -> usize {
        self.registry
            .lock()
            .expect("registry mutex poisoned")
            .session_count()
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
