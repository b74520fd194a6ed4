//! # Live send job.
//!
//! A [`Task`] is shared (`Arc<Task>`) between its session, its scheduler and readers.
//! Progress and log are small synchronous states behind `parking_lot` mutexes; no lock is
//! held across an `.await`.
//!
//! Progress arithmetic, for a sequence of `len` messages after `sent` successful sends:
//! - `cursor = sent % len` (index of the next message)
//! - `cycle_count = sent / len` (completed cycles)
//! - `current_cycle = sent / len + 1` (1-based cycle the next send belongs to)
//!
//! Failed sends do not move any of these.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{LogEntry, LogRingBuffer, TaskPlan};
use crate::transport::Recipient;

/// Task lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// The scheduler loop is (or will be) sending.
    Running,
    /// Stop was requested; the scheduler exits at its next boundary.
    StopRequested,
    /// The scheduler exited.
    Completed,
}

#[derive(Debug)]
struct Progress {
    state: TaskState,
    sent: u64,
    failures: u64,
    ended_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// What the scheduler sends next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Outgoing {
    pub(crate) cursor: usize,
    /// 1-based message number.
    pub(crate) number: u64,
    /// 1-based cycle.
    pub(crate) cycle: u64,
    pub(crate) text: String,
}

/// A cyclic send job owned by exactly one session.
pub struct Task {
    id: String,
    plan: TaskPlan,
    started_at: DateTime<Utc>,
    progress: Mutex<Progress>,
    logs: Mutex<LogRingBuffer>,
    render_cap: usize,
    stop: CancellationToken,
    pub(crate) worker: Mutex<Option<JoinHandle<()>>>,
}

impl Task {
    pub(crate) fn new(
        id: String,
        plan: TaskPlan,
        stop: CancellationToken,
        storage_cap: usize,
        render_cap: usize,
    ) -> Self {
        Self {
            id,
            plan,
            started_at: Utc::now(),
            progress: Mutex::new(Progress {
                state: TaskState::Running,
                sent: 0,
                failures: 0,
                ended_at: None,
                last_error: None,
            }),
            logs: Mutex::new(LogRingBuffer::new(storage_cap)),
            render_cap: render_cap.max(1),
            stop,
            worker: Mutex::new(None),
        }
    }

    /// Task identifier (unique within its session).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Recipient of every message.
    pub fn recipient(&self) -> &Recipient {
        &self.plan.recipient
    }

    /// Pause between two sends.
    pub fn delay(&self) -> std::time::Duration {
        self.plan.delay
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.progress.lock().state
    }

    /// True while the scheduler should keep sending.
    pub fn is_running(&self) -> bool {
        self.state() == TaskState::Running
    }

    pub(crate) fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    pub(crate) fn next_outgoing(&self) -> Outgoing {
        let sent = self.progress.lock().sent;
        let len = self.plan.messages.len() as u64;
        let cursor = (sent % len) as usize;
        Outgoing {
            cursor,
            number: sent + 1,
            cycle: sent / len + 1,
            text: self.plan.compose(cursor),
        }
    }

    pub(crate) fn record_success(&self) -> u64 {
        let mut p = self.progress.lock();
        p.sent += 1;
        p.sent
    }

    pub(crate) fn record_failure(&self, err: &str) {
        let mut p = self.progress.lock();
        p.failures += 1;
        p.last_error = Some(err.to_string());
    }

    /// Flags the task and cancels its scheduler. Returns `false` unless it was running.
    pub(crate) fn request_stop(&self) -> bool {
        let requested = {
            let mut p = self.progress.lock();
            if p.state == TaskState::Running {
                p.state = TaskState::StopRequested;
                true
            } else {
                false
            }
        };
        self.stop.cancel();
        requested
    }

    /// Marks the task completed and stamps its end time. Returns `(sent, cycle_count, stop_was_requested)`.
    pub(crate) fn finish(&self) -> (u64, u64, bool) {
        let mut p = self.progress.lock();
        let requested = p.state == TaskState::StopRequested || self.stop.is_cancelled();
        p.state = TaskState::Completed;
        p.ended_at = Some(Utc::now());
        (p.sent, p.sent / self.plan.messages.len() as u64, requested)
    }

    pub(crate) fn crash(&self, err: &str) {
        let mut p = self.progress.lock();
        p.state = TaskState::Completed;
        p.ended_at = Some(Utc::now());
        p.last_error = Some(err.to_string());
    }

    pub(crate) fn log(&self, entry: LogEntry) {
        self.logs.lock().append(entry);
    }

    pub(crate) fn truncate_logs(&self, cap: usize) -> usize {
        self.logs.lock().truncate(cap)
    }

    /// Point-in-time view of progress.
    pub fn snapshot(&self) -> TaskSnapshot {
        let p = self.progress.lock();
        let len = self.plan.messages.len() as u64;
        TaskSnapshot {
            task_id: self.id.clone(),
            target: self.plan.recipient.id.clone(),
            kind: self.plan.recipient.kind,
            state: p.state,
            total_messages: self.plan.messages.len(),
            sent_messages: p.sent,
            cursor: (p.sent % len) as usize,
            cycle_count: p.sent / len,
            current_cycle: p.sent / len + 1,
            failures: p.failures,
            delay_secs: self.plan.delay.as_secs(),
            prefix: self.plan.prefix.clone(),
            started_at: self.started_at,
            ended_at: p.ended_at,
            last_error: p.last_error.clone(),
        }
    }

    /// Log rendered up to the render cap, newest first.
    pub fn log_view(&self) -> TaskLogView {
        let (state, sent) = {
            let p = self.progress.lock();
            (p.state, p.sent)
        };
        let logs = self.logs.lock();
        TaskLogView {
            task_id: self.id.clone(),
            state,
            sent_messages: sent,
            stored: logs.len(),
            entries: logs.render(self.render_cap),
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("recipient", &self.plan.recipient)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Serializable task progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSnapshot {
    /// Task identifier.
    pub task_id: String,
    /// Phone number or group id.
    pub target: String,
    /// Target kind.
    pub kind: crate::transport::TargetKind,
    /// Lifecycle state.
    pub state: TaskState,
    /// Length of the message sequence.
    pub total_messages: usize,
    /// Successful sends.
    pub sent_messages: u64,
    /// Index of the next message.
    pub cursor: usize,
    /// Completed cycles.
    pub cycle_count: u64,
    /// 1-based cycle of the next send.
    pub current_cycle: u64,
    /// Failed sends.
    pub failures: u64,
    /// Pause between sends.
    pub delay_secs: u64,
    /// Prefix applied to every message.
    pub prefix: Option<String>,
    /// Submission time.
    pub started_at: DateTime<Utc>,
    /// Stop or completion time.
    pub ended_at: Option<DateTime<Utc>>,
    /// Most recent failure.
    pub last_error: Option<String>,
}

/// Rendered task log.
#[derive(Debug, Clone, Serialize)]
pub struct TaskLogView {
    /// Task identifier.
    pub task_id: String,
    /// Lifecycle state.
    pub state: TaskState,
    /// Successful sends.
    pub sent_messages: u64,
    /// Entries held in storage (may exceed `entries.len()`).
    pub stored: usize,
    /// Newest first, at most the render cap.
    pub entries: Vec<LogEntry>,
}
