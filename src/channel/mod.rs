//! Broadcast layer — fire-and-forget notifications to connected front-ends.
//!
//! Two kinds of group address exist:
//!
//! - the **live group** for `(session, page ordinal)`, carrying live-payload
//!   results back to the participants currently on that page;
//! - the **session launcher group**, carrying bot-completion notices to the
//!   process that launched the session's bots.
//!
//! Publishing is fire-and-forget: no acknowledgement, no retry, no ordering
//! guarantee beyond FIFO within one channel. A publish to a group nobody is
//! subscribed to simply vanishes.

use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};

use crate::broker::MessageQueue;
use crate::constants::KEY_PREFIX;

/// Channel name for live-payload results on one page of one session.
pub fn live_group(session_code: &str, page_index: u32) -> String {
    format!("{KEY_PREFIX}-live-{session_code}-page{page_index}")
}

/// Channel name for bot-completion notices of one session.
pub fn session_launcher_group(session_code: &str) -> String {
    format!("{KEY_PREFIX}-launcher-{session_code}")
}

/// Fire-and-forget group publisher.
pub trait ChannelLayer: Send + Sync {
    /// Publish one event to a group. Must not block on subscribers.
    fn group_send(&self, group: &str, event: &Value) -> Result<()>;
}

/// Broadcast layer backed by the broker's publish command.
pub struct QueueChannelLayer {
    queue: Arc<dyn MessageQueue>,
}

impl QueueChannelLayer {
    /// Publish through the given queue substrate.
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self { queue }
    }
}

impl ChannelLayer for QueueChannelLayer {
    fn group_send(&self, group: &str, event: &Value) -> Result<()> {
        let receivers = self.queue.publish(group, &event.to_string())?;
        log::debug!("[channel] {group}: delivered to {receivers} subscriber(s)");
        Ok(())
    }
}

impl std::fmt::Debug for QueueChannelLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueChannelLayer").finish_non_exhaustive()
    }
}

/// Broadcast layer that drops everything.
///
/// For deployments with no connected front-ends, and for tests that do not
/// care about notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullChannelLayer;

impl ChannelLayer for NullChannelLayer {
    fn group_send(&self, _group: &str, _event: &Value) -> Result<()> {
        Ok(())
    }
}

/// Announce that a participant's bot has run out of submissions.
///
/// The session-launcher listener counts these to know when every bot in
/// the session has finished.
pub fn send_completion_notice(
    channels: &dyn ChannelLayer,
    session_code: &str,
    participant_code: &str,
) -> Result<()> {
    channels.group_send(
        &session_launcher_group(session_code),
        &json!({
            "type": "send_completion_message",
            "text": participant_code,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every publish for assertions.
    #[derive(Default)]
    struct RecordingLayer {
        sent: Mutex<Vec<(String, Value)>>,
    }

    impl ChannelLayer for RecordingLayer {
        fn group_send(&self, group: &str, event: &Value) -> Result<()> {
            self.sent
                .lock()
                .expect("lock")
                .push((group.to_string(), event.clone()));
            Ok(())
        }
    }

    #[test]
    fn test_group_names_are_distinct_per_page_and_session() {
        assert_ne!(live_group("s1", 3), live_group("s1", 4));
        assert_ne!(live_group("s1", 3), live_group("s2", 3));
        assert_ne!(live_group("s1", 3), session_launcher_group("s1"));
        assert!(live_group("s1", 3).starts_with(KEY_PREFIX));
    }

    #[test]
    fn test_completion_notice_targets_launcher_group() {
        let layer = RecordingLayer::default();
        send_completion_notice(&layer, "vv9ok2xl", "ab12cd34").unwrap();

        let sent = layer.sent.lock().expect("lock");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, session_launcher_group("vv9ok2xl"));
        assert_eq!(sent[0].1["text"], "ab12cd34");
    }

    #[test]
    fn test_queue_layer_publishes_json() {
        let queue = crate::broker::MemoryQueue::new();
        let events = queue.subscribe(&[live_group("s1", 2)]);
        let layer = QueueChannelLayer::new(queue);

        layer
            .group_send(&live_group("s1", 2), &json!({"ab12cd34": {"bid": 10}}))
            .unwrap();

        let (_, payload) = events
            .recv_timeout(std::time::Duration::from_secs(1))
            .unwrap();
        let decoded: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(decoded["ab12cd34"]["bid"], 10);
    }
}
