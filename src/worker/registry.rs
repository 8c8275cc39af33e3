//! Bot registry with age-ordered session eviction.
//!
//! The registry is the sole index into the worker's bots. It keeps two
//! structures in step:
//!
//! - `sessions`: session codes with the participant codes they own, in
//!   session-creation order (front = oldest);
//! - `bots`: participant code → [`Bot`].
//!
//! Every participant code appearing under a session has a bot in the map
//! and vice versa, except inside [`BotRegistry::prune`] while an evicted
//! session's bots are being dropped.
//!
//! Eviction is by raw insertion order, not by last access: `prune` removes
//! whole sessions from the front until the count is back under capacity.
//! It runs only when a new session is registered, so memory is reclaimed
//! lazily and the registry can transiently overshoot capacity by one entry.

use std::collections::{HashMap, VecDeque};

use crate::bot::Bot;
use crate::error::RequestError;

/// Ordered session → bots index, bounded by a session capacity.
pub struct BotRegistry {
    /// Sessions in creation order; front is evicted first.
    sessions: VecDeque<(String, Vec<String>)>,
    /// All registered bots, keyed by participant code.
    bots: HashMap<String, Bot>,
    /// Maximum number of retained sessions.
    capacity: usize,
}

impl BotRegistry {
    /// Create an empty registry retaining at most `capacity` sessions.
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: VecDeque::new(),
            bots: HashMap::new(),
            capacity,
        }
    }

    /// The configured session capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of sessions currently retained.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Evict oldest sessions until the count is within capacity.
    ///
    /// Each evicted session drops every bot it owns. Re-registering a
    /// session code does not refresh its age; the original insertion slot
    /// keeps counting.
    pub fn prune(&mut self) {
        while self.sessions.len() > self.capacity {
            if let Some((session_code, codes)) = self.sessions.pop_front() {
                log::info!(
                    "[registry] evicting session {session_code} ({} bot(s))",
                    codes.len()
                );
                for code in codes {
                    self.bots.remove(&code);
                }
            }
        }
    }

    /// Register a session and all of its bots.
    ///
    /// A participant code colliding with an already-registered bot (e.g.
    /// the same session initialized twice) overwrites the old bot; the
    /// stale membership entry under the earlier session becomes inert and
    /// is dropped with that session.
    pub fn insert_session(&mut self, session_code: impl Into<String>, bots: Vec<Bot>) {
        let codes: Vec<String> = bots.iter().map(|b| b.participant_code.clone()).collect();
        for bot in bots {
            self.bots.insert(bot.participant_code.clone(), bot);
        }
        self.sessions.push_back((session_code.into(), codes));
    }

    /// Look up a bot, failing with the recognized "not registered" error.
    pub fn get(&self, participant_code: &str) -> Result<&Bot, RequestError> {
        self.bots
            .get(participant_code)
            .ok_or_else(|| RequestError::participant_not_registered(participant_code, self.capacity))
    }

    /// Mutable bot lookup with the same failure as [`BotRegistry::get`].
    pub fn get_mut(&mut self, participant_code: &str) -> Result<&mut Bot, RequestError> {
        let capacity = self.capacity;
        self.bots
            .get_mut(participant_code)
            .ok_or_else(|| RequestError::participant_not_registered(participant_code, capacity))
    }

    /// Whether a session code is currently retained.
    pub fn contains_session(&self, session_code: &str) -> bool {
        self.sessions.iter().any(|(code, _)| code == session_code)
    }

    /// Session codes in retention order, oldest first.
    pub fn session_codes(&self) -> impl Iterator<Item = &str> {
        self.sessions.iter().map(|(code, _)| code.as_str())
    }
}

impl std::fmt::Debug for BotRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotRegistry")
            .field("sessions", &self.sessions.len())
            .field("bots", &self.bots.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
