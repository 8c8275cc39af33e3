//! In-process queue implementation.
//!
//! Backs two things: tests and single-process deployments that want the
//! queue protocol without a broker process, and the broker process itself,
//! which serves socket clients against one shared instance.
//!
//! Queues are a mutex-guarded map of `VecDeque`s with a condvar for the
//! blocking pop; subscribers are plain `mpsc` senders that are dropped the
//! first time a send fails.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;

use super::MessageQueue;

/// In-memory named FIFO queues with blocking pop and pub/sub.
pub struct MemoryQueue {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    available: Condvar,
    subscribers: Mutex<Vec<ChannelSubscriber>>,
}

/// One subscriber: the channels it asked for plus its event sender.
struct ChannelSubscriber {
    channels: Vec<String>,
    tx: Sender<(String, String)>,
}

impl MemoryQueue {
    /// Create an empty queue store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queues: Mutex::new(HashMap::new()),
            available: Condvar::new(),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Register a subscriber for the given channels.
    ///
    /// Events arrive as `(channel, payload)` pairs. Dropping the receiver
    /// unsubscribes on the next publish to any of its channels.
    pub fn subscribe(&self, channels: &[String]) -> Receiver<(String, String)> {
        let (tx, rx) = std::sync::mpsc::channel();
        self.subscribers
            .lock()
            .expect("subscribers mutex poisoned")
            .push(ChannelSubscriber {
                channels: channels.to_vec(),
                tx,
            });
        rx
    }

    /// Number of records currently sitting in `queue`.
    pub fn queue_len(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .expect("queues mutex poisoned")
            .get(queue)
            .map_or(0, VecDeque::len)
    }
}

impl MessageQueue for MemoryQueue {
    fn push(&self, queue: &str, payload: &str) -> Result<()> {
        let mut queues = self.queues.lock().expect("queues mutex poisoned");
        queues
            .entry(queue.to_string())
            .or_default()
            .push_back(payload.to_string());
        self.available.notify_all();
        Ok(())
    }

    fn blocking_pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        let mut queues = self.queues.lock().expect("queues mutex poisoned");

        loop {
            if let Some(records) = queues.get_mut(queue) {
                if let Some(record) = records.pop_front() {
                    // Drop emptied queues so abandoned response keys do not
                    // accumulate map entries.
                    if records.is_empty() {
                        queues.remove(queue);
                    }
                    return Ok(Some(record));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, _timed_out) = self
                .available
                .wait_timeout(queues, deadline - now)
                .expect("queues mutex poisoned");
            queues = guard;
        }
    }

    fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        let mut subscribers = self.subscribers.lock().expect("subscribers mutex poisoned");
        let mut delivered = 0;
        subscribers.retain(|sub| {
            if !sub.channels.iter().any(|c| c == channel) {
                return true;
            }
            match sub.tx.send((channel.to_string(), payload.to_string())) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false, // receiver dropped, unsubscribe
            }
        });
        Ok(delivered)
    }

    fn flush_prefix(&self, prefix: &str) -> Result<usize> {
        let mut queues = self.queues.lock().expect("queues mutex poisoned");
        let before = queues.len();
        queues.retain(|name, _| !name.starts_with(prefix));
        Ok(before - queues.len())
    }
}

impl std::fmt::Debug for MemoryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queues = self.queues.lock().expect("queues mutex poisoned");
        f.debug_struct("MemoryQueue")
            .field("queues", &queues.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_push_pop_fifo() {
        let q = MemoryQueue::new();
        q.push("work", "a").unwrap();
        q.push("work", "b").unwrap();
        assert_eq!(q.blocking_pop("work", Duration::ZERO).unwrap().unwrap(), "a");
        assert_eq!(q.blocking_pop("work", Duration::ZERO).unwrap().unwrap(), "b");
        assert!(q.blocking_pop("work", Duration::ZERO).unwrap().is_none());
    }

    #[test]
    fn test_pop_times_out_on_empty_queue() {
        let q = MemoryQueue::new();
        let started = Instant::now();
        let popped = q.blocking_pop("empty", Duration::from_millis(50)).unwrap();
        assert!(popped.is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_pop_wakes_on_push_from_another_thread() {
        let q = MemoryQueue::new();
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            q2.push("work", "late").unwrap();
        });
        let popped = q.blocking_pop("work", Duration::from_secs(5)).unwrap();
        assert_eq!(popped.unwrap(), "late");
        handle.join().unwrap();
    }

    #[test]
    fn test_emptied_queue_entry_is_removed() {
        let q = MemoryQueue::new();
        q.push("resp-1", "only").unwrap();
        let _ = q.blocking_pop("resp-1", Duration::ZERO).unwrap();
        assert_eq!(q.queue_len("resp-1"), 0);
        assert_eq!(q.flush_prefix("resp-").unwrap(), 0);
    }

    #[test]
    fn test_publish_reaches_matching_subscribers_only() {
        let q = MemoryQueue::new();
        let live = q.subscribe(&["live-s1-page3".to_string()]);
        let launcher = q.subscribe(&["launcher-s1".to_string()]);

        let delivered = q.publish("live-s1-page3", "{\"x\":1}").unwrap();
        assert_eq!(delivered, 1);

        let (channel, payload) = live.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(channel, "live-s1-page3");
        assert_eq!(payload, "{\"x\":1}");
        assert!(launcher.try_recv().is_err());
    }

    #[test]
    fn test_dropped_subscriber_is_reaped() {
        let q = MemoryQueue::new();
        let rx = q.subscribe(&["ch".to_string()]);
        drop(rx);
        assert_eq!(q.publish("ch", "x").unwrap(), 0);
        // Publishing to nobody is not an error.
        assert_eq!(q.publish("ch", "y").unwrap(), 0);
    }

    #[test]
    fn test_flush_prefix_only_removes_matching_queues() {
        let q = MemoryQueue::new();
        q.push("botworker-resp-a", "1").unwrap();
        q.push("botworker-resp-b", "2").unwrap();
        q.push("other", "3").unwrap();
        assert_eq!(q.flush_prefix("botworker-").unwrap(), 2);
        assert_eq!(q.queue_len("other"), 1);
    }
}
