//! Bot — a scripted stand-in for one human participant.
//!
//! A bot owns a precomputed, ordered sequence of page submissions and a
//! cursor into it. The cursor only moves forward; once it runs off the end
//! the bot is exhausted, which is a terminal state and an expected signal
//! (the participant finished), never an error.
//!
//! The bot also records the last request path and page content the worker
//! observed for its participant, so the application-supplied script can run
//! its own consistency checks against the page it believes it is on.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One prepared page submission: the page it targets plus the form payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Submission {
    /// Name of the page this submission is prepared for.
    pub page_name: String,
    /// Form fields to submit, keyed by field name.
    pub post_data: Map<String, Value>,
}

/// Ordered submission sequence with a forward-only cursor.
///
/// Replaces a restartable generator: every operation that needs the next
/// submission pulls from here, and re-entrancy is impossible because the
/// cursor is plain state behind the worker's lock.
#[derive(Debug, Clone)]
pub struct SubmissionScript {
    items: Vec<Submission>,
    cursor: usize,
}

impl SubmissionScript {
    /// Build a script from an already-ordered list of submissions.
    pub fn new(items: Vec<Submission>) -> Self {
        Self { items, cursor: 0 }
    }

    /// Advance the cursor and return the next submission, or `None` once
    /// the sequence is exhausted.
    pub fn next_submission(&mut self) -> Option<Submission> {
        let item = self.items.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(item)
    }

    /// Whether the cursor has run off the end of the sequence.
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.items.len()
    }

    /// Submissions remaining ahead of the cursor.
    pub fn remaining(&self) -> usize {
        self.items.len().saturating_sub(self.cursor)
    }
}

/// A scripted participant.
///
/// Owned exclusively by the worker once registered; created when a session
/// is initialized and destroyed only by eviction or process shutdown.
#[derive(Debug)]
pub struct Bot {
    /// Participant identifier this bot stands in for.
    pub participant_code: String,
    /// Session this bot belongs to.
    pub session_code: String,
    /// The bot's scripted submissions.
    pub script: SubmissionScript,
    /// Last request path the worker observed for this participant.
    pub path: String,
    /// Last page content the worker observed for this participant.
    pub html: String,
    /// Set once the worker has observed the script run dry, so the
    /// completion notice goes out exactly once.
    pub finished: bool,
}

impl Bot {
    /// Create a bot with its full submission script.
    pub fn new(
        participant_code: impl Into<String>,
        session_code: impl Into<String>,
        script: SubmissionScript,
    ) -> Self {
        Self {
            participant_code: participant_code.into(),
            session_code: session_code.into(),
            script,
            path: String::new(),
            html: String::new(),
            finished: false,
        }
    }

    /// Record the request path and page content last served to this
    /// participant.
    pub fn record_request_state(&mut self, path: impl Into<String>, html: impl Into<String>) {
        self.path = path.into();
        self.html = html.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn submission(page: &str, field: &str, value: i64) -> Submission {
        let mut post_data = Map::new();
        post_data.insert(field.to_string(), json!(value));
        Submission {
            page_name: page.to_string(),
            post_data,
        }
    }

    #[test]
    fn test_cursor_walks_in_order_then_exhausts() {
        let mut script = SubmissionScript::new(vec![
            submission("Offer", "amount", 50),
            submission("Accept", "accepted", 1),
        ]);
        assert!(!script.is_exhausted());
        assert_eq!(script.remaining(), 2);

        assert_eq!(script.next_submission().unwrap().page_name, "Offer");
        assert_eq!(script.next_submission().unwrap().page_name, "Accept");
        assert!(script.next_submission().is_none());
        assert!(script.is_exhausted());

        // Terminal state: asking again keeps returning None.
        assert!(script.next_submission().is_none());
    }

    #[test]
    fn test_empty_script_is_exhausted_from_the_start() {
        let mut script = SubmissionScript::new(Vec::new());
        assert!(script.is_exhausted());
        assert!(script.next_submission().is_none());
    }

    #[test]
    fn test_record_request_state_overwrites() {
        let mut bot = Bot::new("ab12cd34", "vv9ok2xl", SubmissionScript::new(Vec::new()));
        bot.record_request_state("/p/ab12cd34/game/Offer/3", "<html>offer</html>");
        bot.record_request_state("/p/ab12cd34/game/Accept/4", "<html>accept</html>");
        assert_eq!(bot.path, "/p/ab12cd34/game/Accept/4");
        assert_eq!(bot.html, "<html>accept</html>");
    }
}
