//! # LogWriter: renders events as `tracing` records
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO loopcast::events: session created session="k3v9..." owner="10.0.0.7"
//! INFO loopcast::events: connection opened session="k3v9..."
//! INFO loopcast::events: message sent session="k3v9..." task="t1a2b3c" number=12 cursor=1
//! WARN loopcast::events: send failed session="k3v9..." task="t1a2b3c" cursor=2 err="socket error: reset"
//! INFO loopcast::events: reconnect scheduled session="k3v9..." delay_ms=10000 attempt=1
//! ```

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let session = e.session.as_deref().unwrap_or("-");
        let task = e.task.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");

        match e.kind {
            EventKind::SessionCreated => {
                info!(target: "loopcast::events", session, owner = reason, "session created");
            }
            EventKind::PairingCodeIssued => {
                info!(target: "loopcast::events", session, "pairing code issued");
            }
            EventKind::ConnectionOpened => {
                info!(target: "loopcast::events", session, "connection opened");
            }
            EventKind::ConnectionClosed => {
                warn!(target: "loopcast::events", session, reason, "connection closed");
            }
            EventKind::ConnectFailed => {
                warn!(target: "loopcast::events", session, attempt = e.attempt, err = reason, "connect failed");
            }
            EventKind::ReconnectScheduled => {
                info!(target: "loopcast::events", session, delay_ms = e.delay_ms, attempt = e.attempt, "reconnect scheduled");
            }
            EventKind::CredentialSaveFailed => {
                warn!(target: "loopcast::events", session, err = reason, "credential save failed");
            }
            EventKind::SessionTerminated => {
                info!(target: "loopcast::events", session, cause = reason, "session terminated");
            }
            EventKind::TaskSubmitted => {
                info!(target: "loopcast::events", session, task, "task submitted");
            }
            EventKind::TaskWaiting => {
                info!(target: "loopcast::events", session, task, "task waiting for connection");
            }
            EventKind::MessageSent => {
                info!(target: "loopcast::events", session, task, number = e.attempt, cursor = e.cursor, "message sent");
            }
            EventKind::SendFailed => {
                warn!(target: "loopcast::events", session, task, cursor = e.cursor, err = reason, "send failed");
            }
            EventKind::TaskStopRequested => {
                info!(target: "loopcast::events", session, task, "task stop requested");
            }
            EventKind::TaskStopped => {
                info!(target: "loopcast::events", session, task, sent = e.attempt, "task stopped");
            }
            EventKind::TaskCrashed => {
                error!(target: "loopcast::events", session, task, err = reason, "task crashed");
            }
            EventKind::SessionEvicted => {
                info!(target: "loopcast::events", session, "idle session evicted");
            }
            EventKind::SweepCompleted => {
                info!(target: "loopcast::events", evicted = e.attempt, "janitor sweep completed");
            }
            EventKind::ShutdownRequested => {
                info!(target: "loopcast::events", "shutdown requested");
            }
            EventKind::AllStoppedWithin => {
                info!(target: "loopcast::events", "all sessions stopped within grace");
            }
            EventKind::GraceExceeded => {
                error!(target: "loopcast::events", "grace exceeded");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
