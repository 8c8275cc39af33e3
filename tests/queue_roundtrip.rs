//! End-to-end tests over the real broker process.
//!
//! Each test binds its own broker socket in a temp dir, serves it from a
//! worker thread through the same `BrokerClient` the production worker
//! would use, and drives it with the queue-path `WorkerClient` — the full
//! cross-process path minus the process boundary.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use botworker::app::{
    BotScript, GroupMember, LiveMethod, LivePages, ParticipantRecord, ScriptSource,
    SessionDirectory,
};
use botworker::broker::{self, BrokerClient};
use botworker::channel::live_group;
use botworker::worker::listen::listen;
use botworker::{
    MessageQueue, QueueChannelLayer, RequestError, Submission, Worker, WorkerClient,
    WorkerUnavailable,
};
use serde_json::{json, Value};

// ─── Test collaborators ────────────────────────────────────────────────────

/// Session s1: participants p1 and p2, two scripted submissions each.
struct Scripts;

impl ScriptSource for Scripts {
    fn num_cases(&self, _session_code: &str) -> Result<usize> {
        Ok(1)
    }

    fn session_scripts(&self, _session_code: &str, _case: usize) -> Result<Vec<BotScript>> {
        let script = |code: &str| BotScript {
            participant_code: code.to_string(),
            submissions: (0..2)
                .map(|i| Submission {
                    page_name: format!("Page{i}"),
                    post_data: [("decision".to_string(), json!(i))].into_iter().collect(),
                })
                .collect(),
        };
        Ok(vec![script("p1"), script("p2")])
    }
}

/// Both participants sit on page Bid (ordinal 2) in one group.
struct Directory;

impl SessionDirectory for Directory {
    fn participant(&self, participant_code: &str) -> Result<ParticipantRecord> {
        let position = match participant_code {
            "p1" => 1,
            "p2" => 2,
            other => bail!("no participant {other}"),
        };
        Ok(ParticipantRecord {
            session_code: "s1".into(),
            app_name: "auction".into(),
            page_name: "Bid".into(),
            page_index: 2,
            position,
        })
    }

    fn group_members(&self, _participant_code: &str) -> Result<Vec<GroupMember>> {
        Ok(vec![
            GroupMember { position: 1, participant_code: "p1".into() },
            GroupMember { position: 2, participant_code: "p2".into() },
        ])
    }
}

/// Live handler that broadcasts its payload to the whole group.
struct EchoLive;

impl LiveMethod for EchoLive {
    fn call(&self, _position: u32, payload: Value) -> Result<Value> {
        Ok(json!({ "0": payload }))
    }
}

struct Pages;

impl LivePages for Pages {
    fn resolve(&self, _app: &str, _page: &str) -> Result<Arc<dyn LiveMethod>> {
        Ok(Arc::new(EchoLive))
    }
}

// ─── Harness ───────────────────────────────────────────────────────────────

/// A broker on its own socket plus a worker thread serving it.
struct Rig {
    // Owns the socket dir for the duration of the test.
    _dir: tempfile::TempDir,
    socket: PathBuf,
}

impl Rig {
    /// Start a broker; optionally also a worker serving its queue.
    fn start(with_worker: bool) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("broker.sock");

        let broker_socket = socket.clone();
        thread::spawn(move || {
            let shutdown = Arc::new(AtomicBool::new(false));
            let _ = broker::run(&broker_socket, &shutdown);
        });
        wait_for_socket(&socket);

        if with_worker {
            let queue = Arc::new(BrokerClient::new(&socket));
            let worker = Arc::new(Worker::new(
                Arc::new(Directory),
                Arc::new(Scripts),
                Arc::new(Pages),
                Arc::new(QueueChannelLayer::new(
                    Arc::clone(&queue) as Arc<dyn MessageQueue>
                )),
                8,
            ));
            thread::spawn(move || {
                let shutdown = AtomicBool::new(false);
                let _ = listen(&worker, &*queue, &shutdown);
            });
        }

        Self { _dir: dir, socket }
    }

    fn client(&self) -> WorkerClient {
        WorkerClient::over_queue(Arc::new(BrokerClient::new(&self.socket)))
    }

    fn broker_client(&self) -> BrokerClient {
        BrokerClient::new(&self.socket)
    }
}

fn wait_for_socket(socket: &Path) {
    for _ in 0..200 {
        if socket.exists() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("broker socket never appeared at {}", socket.display());
}

// ─── Tests ─────────────────────────────────────────────────────────────────

#[test]
fn full_session_cycle_over_the_socket() {
    let rig = Rig::start(true);
    let client = rig.client();

    client.initialize_session("s1", None).expect("initialize");

    for code in ["p1", "p2"] {
        assert!(client.enqueue_next_submission(code).unwrap());
        let first = client.pop_queued_submission(code).unwrap();
        assert_eq!(first["decision"], json!(0));

        assert!(client.enqueue_next_submission(code).unwrap());
        let second = client.pop_queued_submission(code).unwrap();
        assert_eq!(second["decision"], json!(1));

        assert!(!client.enqueue_next_submission(code).unwrap());
    }

    let snapshot = client.get_bot("p1").unwrap();
    assert_eq!(snapshot["exhausted"], json!(true));
}

#[test]
fn recognized_error_survives_the_wire() {
    let rig = Rig::start(true);
    let client = rig.client();

    let err = client.get_bot("ghost").unwrap_err();
    let request_err = err
        .downcast_ref::<RequestError>()
        .expect("recognized error, not a fault");
    assert!(request_err.to_string().contains("ghost"));
    assert!(request_err.to_string().contains("8 sessions"));
}

#[test]
fn live_payload_broadcast_reaches_subscriber() {
    let rig = Rig::start(true);
    let client = rig.client();
    client.initialize_session("s1", Some(0)).expect("initialize");

    let mut subscription = rig
        .broker_client()
        .subscribe(&[live_group("s1", 2)])
        .expect("subscribe");

    client
        .record_request_state("p1", "/p/p1/auction/Bid/2", "<html/>")
        .unwrap();
    client
        .dispatch_live_payload("p1", "Bid", json!({"bid": 25}))
        .unwrap();

    let (channel, payload) = subscription
        .next_event(Duration::from_secs(5))
        .expect("subscription healthy")
        .expect("an event should arrive");
    assert_eq!(channel, live_group("s1", 2));

    let event: Value = serde_json::from_str(&payload).unwrap();
    assert_eq!(event["p1"]["bid"], 25);
    assert_eq!(event["p2"]["bid"], 25);
}

#[test]
fn ping_without_worker_reports_unavailable() {
    let rig = Rig::start(false);
    let client = rig.client();

    let err = client.ping().unwrap_err();
    assert!(err.downcast_ref::<WorkerUnavailable>().is_some());
}

#[test]
fn flush_clears_worker_queues() {
    let rig = Rig::start(false);
    let broker_client = rig.broker_client();

    broker_client.push("botworker-stale-1", "x").unwrap();
    broker_client.push("botworker-stale-2", "y").unwrap();
    broker_client.push("unrelated", "z").unwrap();

    assert_eq!(broker_client.flush_prefix("botworker").unwrap(), 2);
    assert_eq!(
        broker_client
            .blocking_pop("unrelated", Duration::from_millis(100))
            .unwrap()
            .as_deref(),
        Some("z")
    );
}
