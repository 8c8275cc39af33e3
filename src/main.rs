//! Botworker CLI - broker process and operator tools.
//!
//! The worker loop itself is embedded by the host application (it owns the
//! collaborator implementations; see `botworker::worker::listen`). This
//! binary carries everything that stands alone: the broker process, the
//! liveness probe, and queue maintenance.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use botworker::broker::{self, BrokerClient};
use botworker::constants::KEY_PREFIX;
use botworker::{Config, MessageQueue, WorkerClient, WorkerUnavailable};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Global flag for signal-triggered shutdown (as Arc for signal-hook compatibility)
static SHUTDOWN_FLAG: std::sync::LazyLock<Arc<AtomicBool>> =
    std::sync::LazyLock::new(|| Arc::new(AtomicBool::new(false)));

#[derive(Parser)]
#[command(name = "botworker", version, about = "Bot worker broker and operator tools")]
struct Cli {
    /// Broker socket path (defaults to BOTWORKER_SOCKET or the uid-scoped
    /// path under /tmp).
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the broker process.
    Broker,
    /// Check whether a worker is serving the queue.
    Ping,
    /// Delete all of the worker's queues from the broker.
    Flush,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut config = Config::load();
    if let Some(socket) = cli.socket {
        config.socket_path = socket;
    }

    match cli.command {
        Command::Broker => run_broker(&config),
        Command::Ping => run_ping(&config),
        Command::Flush => run_flush(&config),
    }
}

/// Run the broker until SIGINT/SIGTERM/SIGHUP.
fn run_broker(config: &Config) -> Result<()> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::flag;

    flag::register(SIGINT, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGTERM, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGHUP, Arc::clone(&SHUTDOWN_FLAG))?;

    println!("Starting botworker broker on {}", config.socket_path.display());
    broker::run(&config.socket_path, &SHUTDOWN_FLAG)
}

/// Probe the queue for a live worker and report the outcome.
///
/// Checks the broker first so "broker unreachable" and "worker not
/// running" stay distinct diagnoses.
fn run_ping(config: &Config) -> Result<()> {
    use anyhow::Context;

    let queue = Arc::new(BrokerClient::new(&config.socket_path));
    queue.ping_broker().with_context(|| {
        format!(
            "broker unreachable on {} (is `botworker broker` running?)",
            config.socket_path.display()
        )
    })?;

    let client = WorkerClient::over_queue(queue);

    match client.ping() {
        Ok(()) => {
            println!("botworker is running");
            Ok(())
        }
        Err(err) if err.downcast_ref::<WorkerUnavailable>().is_some() => {
            eprintln!("{err}");
            std::process::exit(1);
        }
        Err(err) => Err(err),
    }
}

/// Clear every worker-owned queue (stale work, abandoned response keys).
fn run_flush(config: &Config) -> Result<()> {
    let queue = BrokerClient::new(&config.socket_path);
    let removed = queue.flush_prefix(KEY_PREFIX)?;
    println!("Flushed {removed} queue(s)");
    Ok(())
}
