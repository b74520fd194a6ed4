//! # Demo: loopback
//!
//! Runs the whole session/task lifecycle against the in-process [`LoopbackConnector`].
//!
//! Shows how to:
//! - Build a [`Dispatcher`] with the [`LogWriter`] and a custom [`Subscribe`] implementation.
//! - Pair an operator and submit a cyclic task.
//! - Drop the connection and watch the task resume from the same message.
//! - Stop the task and shut down.
//!
//! ## Flow
//! ```text
//! initiate_pairing ──► ConnectionSupervisor ──► pairing code
//! connector.pair() ──► CredentialsUpdated + Opened ──► Connected
//! submit_task ──► TaskScheduler ──► "Hi a", "Hi b", "Hi a", ...
//! connector.drop_link() ──► Disconnected ──► (reconnect) ──► Connected ──► resume
//! stop_task ──► "Task stopped" ; shutdown ──► stats flushed
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=info cargo run --example loopback
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use loopcast::{
    BackoffPolicy, CloseReason, Config, DispatcherBuilder, Event, EventKind, LogWriter,
    LoopbackConnector, MemoryStatsStore, Subscribe, TaskRequest,
};
use tracing_subscriber::EnvFilter;

/// Counts delivered messages.
#[derive(Default)]
struct SentCounter(AtomicU64);

#[async_trait::async_trait]
impl Subscribe for SentCounter {
    async fn on_event(&self, ev: &Event) {
        if ev.kind == EventKind::MessageSent {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn name(&self) -> &'static str {
        "sent-counter"
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Short timings so the demo finishes in seconds.
    let cfg = Config {
        min_delay: Duration::from_secs(1),
        pairing_settle: Duration::from_millis(200),
        reconnect: BackoffPolicy::constant(Duration::from_secs(2)),
        ..Config::default()
    };

    let connector = LoopbackConnector::new();
    let counter = Arc::new(SentCounter::default());
    let stats = Arc::new(MemoryStatsStore::new());
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new()), counter.clone()];

    let dispatcher = DispatcherBuilder::new(cfg, Arc::new(connector.clone()))
        .with_stats_store(stats.clone())
        .with_subscribers(subs)
        .build();

    let owner = "10.0.0.7";
    let pairing = dispatcher.initiate_pairing(owner, "+91 90000 00000").await?;
    println!("pairing code for {}: {}", pairing.session_id, pairing.pairing_code);
    connector.pair(&pairing.session_id);

    let req = TaskRequest::new("9190000000", "user", ["a", "b", "c"], 1).with_prefix("Hi");
    let task_id = dispatcher.submit_task(owner, req).await?;

    tokio::time::sleep(Duration::from_millis(3500)).await;
    connector.drop_link(&pairing.session_id, CloseReason::Lost("demo".into()));
    tokio::time::sleep(Duration::from_secs(4)).await;

    let status = dispatcher.query_session_status(&pairing.session_id).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);

    dispatcher.stop_task(&pairing.session_id, &task_id).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    for entry in dispatcher.task_logs(&pairing.session_id, &task_id).await?.entries {
        println!("[{:?}] {} | {}", entry.kind, entry.message, entry.detail);
    }

    dispatcher.shutdown().await?;
    println!(
        "sent (subscriber): {}, sent (loopback): {}, saved: {:?}",
        counter.0.load(Ordering::Relaxed),
        connector.sent(&pairing.session_id).len(),
        stats.snapshot()
    );
    Ok(())
}
