//! # Runtime events emitted by the dispatcher, supervisors, schedulers and janitor.
//!
//! The [`EventKind`] enum classifies event types across four groups:
//! - **Session events**: pairing, connection lifecycle, termination
//! - **Task events**: submission, sends, waits, stop
//! - **Maintenance events**: janitor sweeps and evictions
//! - **Shutdown events**: process-level termination
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use loopcast::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::ReconnectScheduled)
//!     .with_session("k3v9q0x1m2n4b5c6")
//!     .with_delay(Duration::from_secs(10))
//!     .with_attempt(1);
//!
//! assert_eq!(ev.kind, EventKind::ReconnectScheduled);
//! assert_eq!(ev.delay_ms, Some(10_000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Session events ===
    /// A session was created for an owner.
    ///
    /// Sets: `session`, `reason` (owner identity).
    SessionCreated,

    /// The collaborator issued a pairing code.
    ///
    /// Sets: `session`.
    PairingCodeIssued,

    /// Transport reported open; the session is `Connected`.
    ///
    /// Sets: `session`.
    ConnectionOpened,

    /// Transport closed or was found unusable; the session is `Disconnected`.
    ///
    /// Sets: `session`, `reason`.
    ConnectionClosed,

    /// `connect` failed.
    ///
    /// Sets: `session`, `reason`, `attempt`.
    ConnectFailed,

    /// A reconnect attempt was scheduled.
    ///
    /// Sets: `session`, `delay_ms`, `attempt`.
    ReconnectScheduled,

    /// Updated credentials could not be persisted.
    ///
    /// Sets: `session`, `reason`.
    CredentialSaveFailed,

    /// The session reached `Terminated` and was detached.
    ///
    /// Sets: `session`, `reason` (termination cause).
    SessionTerminated,

    // === Task events ===
    /// A task was accepted and its scheduler started.
    ///
    /// Sets: `session`, `task`.
    TaskSubmitted,

    /// A scheduler is paused waiting for the connection.
    ///
    /// Sets: `session`, `task`.
    TaskWaiting,

    /// A message was sent.
    ///
    /// Sets: `session`, `task`, `attempt` (1-based message number), `cursor` (index sent).
    MessageSent,

    /// A send failed.
    ///
    /// Sets: `session`, `task`, `cursor`, `reason`.
    SendFailed,

    /// A task stop was requested.
    ///
    /// Sets: `session`, `task`.
    TaskStopRequested,

    /// A scheduler exited.
    ///
    /// Sets: `session`, `task`, `attempt` (total sent).
    TaskStopped,

    /// A scheduler died on an unexpected fault.
    ///
    /// Sets: `session`, `task`, `reason`.
    TaskCrashed,

    // === Maintenance events ===
    /// The janitor evicted an idle session.
    ///
    /// Sets: `session`.
    SessionEvicted,

    /// A janitor sweep finished.
    ///
    /// Sets: `attempt` (number of evicted sessions).
    SweepCompleted,

    // === Shutdown events ===
    /// Shutdown requested (OS signal or explicit call).
    ShutdownRequested,

    /// All sessions finished teardown within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some sessions did not finish in time.
    GraceExceeded,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Session identifier, if applicable.
    pub session: Option<Arc<str>>,
    /// Task identifier, if applicable.
    pub task: Option<Arc<str>>,
    /// Human-readable reason (errors, causes, owner, ...).
    pub reason: Option<Arc<str>>,
    /// Delay before the next attempt in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Attempt / message number / count depending on kind.
    pub attempt: Option<u64>,
    /// Message index within a task's sequence.
    pub cursor: Option<usize>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            session: None,
            task: None,
            reason: None,
            delay_ms: None,
            attempt: None,
            cursor: None,
        }
    }

    /// Attaches a session identifier.
    #[inline]
    pub fn with_session(mut self, session: impl Into<Arc<str>>) -> Self {
        self.session = Some(session.into());
        self
    }

    /// Attaches a task identifier.
    #[inline]
    pub fn with_task(mut self, task: impl Into<Arc<str>>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(d.as_millis().min(u128::from(u32::MAX)) as u32);
        self
    }

    /// Attaches an attempt / count.
    #[inline]
    pub fn with_attempt(mut self, n: u64) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a message index.
    #[inline]
    pub fn with_cursor(mut self, cursor: usize) -> Self {
        self.cursor = Some(cursor);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_is_monotonic() {
        let a = Event::new(EventKind::TaskSubmitted);
        let b = Event::new(EventKind::TaskSubmitted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_delay_saturates() {
        let ev = Event::new(EventKind::ReconnectScheduled).with_delay(Duration::from_secs(u64::MAX));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }
}
