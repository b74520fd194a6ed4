//! # Session: one operator, one connection, many tasks.
//!
//! Connection state is published through a `watch` channel so schedulers can park until
//! the session is `Connected` again. Every transition goes through
//! [`ConnectionState::can_transition_to`]:
//!
//! ```text
//!   Initializing ──► AwaitingPairing ──► Connected ◄──► Disconnected
//!        │  └───────────────────────────────▲               │
//!        └──────────────► Disconnected ─► Initializing ◄────┘
//!   any ──► Terminated (absorbing)
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::tasks::{Task, TaskSnapshot, TaskState};
use crate::transport::Connection;

/// Connection lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Connecting (first time or after a backoff).
    Initializing,
    /// Pairing code issued; waiting for the operator to confirm on the phone.
    AwaitingPairing,
    /// Transport open; sends allowed.
    Connected,
    /// Transport lost; a reconnect is scheduled.
    Disconnected,
    /// Gone for good.
    Terminated,
}

impl ConnectionState {
    /// Allowed transitions. Self-transitions are not transitions.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Terminated, _) => false,
            (_, Terminated) => true,
            (Initializing, AwaitingPairing | Connected | Disconnected) => true,
            (AwaitingPairing, Connected | Disconnected) => true,
            (Connected, Disconnected) => true,
            (Disconnected, Initializing | Connected) => true,
            _ => false,
        }
    }

    /// True only for [`ConnectionState::Connected`].
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }

    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Initializing => "initializing",
            ConnectionState::AwaitingPairing => "awaiting_pairing",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session was terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationCause {
    /// Operator called `stop_session`.
    Stopped,
    /// No activity for longer than the idle timeout.
    Idle,
    /// The collaborator revoked the credential.
    LoggedOut,
    /// A reconnect came back unregistered.
    CredentialMissing,
    /// Pairing could not be started.
    PairingFailed(String),
    /// The owner paired again; this session was displaced.
    Replaced,
    /// The runtime is shutting down.
    Shutdown,
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationCause::Stopped => f.write_str("stopped by operator"),
            TerminationCause::Idle => f.write_str("idle timeout"),
            TerminationCause::LoggedOut => f.write_str("credential revoked"),
            TerminationCause::CredentialMissing => f.write_str("credential missing after reconnect"),
            TerminationCause::PairingFailed(reason) => write!(f, "pairing failed: {reason}"),
            TerminationCause::Replaced => f.write_str("replaced by a new pairing"),
            TerminationCause::Shutdown => f.write_str("runtime shutdown"),
        }
    }
}

struct Activity {
    instant: Instant,
    at: DateTime<Utc>,
}

/// Per-owner connection plus its tasks.
pub struct Session {
    id: String,
    owner: String,
    phone: String,
    created_at: DateTime<Utc>,
    state: watch::Sender<ConnectionState>,
    activity: Mutex<Activity>,
    connection: RwLock<Option<Arc<dyn Connection>>>,
    tasks: RwLock<Vec<Arc<Task>>>,
    token: CancellationToken,
    cause: Mutex<Option<TerminationCause>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub(crate) fn new(id: String, owner: String, phone: String, token: CancellationToken) -> Self {
        let (state, _) = watch::channel(ConnectionState::Initializing);
        Self {
            id,
            owner,
            phone,
            created_at: Utc::now(),
            state,
            activity: Mutex::new(Activity {
                instant: Instant::now(),
                at: Utc::now(),
            }),
            connection: RwLock::new(None),
            tasks: RwLock::new(Vec::new()),
            token,
            cause: Mutex::new(None),
            supervisor: Mutex::new(None),
        }
    }

    /// Session identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Owner identity (the requesting client's address).
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Paired phone number, digits only.
    pub fn phone(&self) -> &str {
        &self.phone
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Applies `next` if the table allows it. Returns the previous state when applied.
    pub(crate) fn transition(&self, next: ConnectionState) -> Option<ConnectionState> {
        let mut prev = None;
        self.state.send_if_modified(|cur| {
            if cur.can_transition_to(next) {
                prev = Some(*cur);
                *cur = next;
                true
            } else {
                false
            }
        });
        prev
    }

    /// `Connected → Disconnected` only; used by schedulers that hit a transport failure.
    pub(crate) fn mark_disconnected(&self) -> bool {
        self.state.send_if_modified(|cur| {
            if *cur == ConnectionState::Connected {
                *cur = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn touch(&self) {
        let mut a = self.activity.lock();
        a.instant = Instant::now();
        a.at = Utc::now();
    }

    pub(crate) fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.activity.lock().instant)
    }

    /// Wall-clock time of the last activity.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.activity.lock().at
    }

    /// Replaces the connection handle, returning the previous one for closing.
    pub(crate) fn set_connection(
        &self,
        conn: Option<Arc<dyn Connection>>,
    ) -> Option<Arc<dyn Connection>> {
        std::mem::replace(&mut *self.connection.write(), conn)
    }

    pub(crate) fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.connection.read().clone()
    }

    /// Attaches `task` unless the session is already terminating.
    ///
    /// The check runs under the task-list lock, so teardown (which cancels the token
    /// before reading the list) either sees the task or the task is refused.
    pub(crate) fn add_task(&self, task: Arc<Task>) -> bool {
        let mut tasks = self.tasks.write();
        if self.is_terminating() {
            return false;
        }
        tasks.push(task);
        true
    }

    /// True once termination was requested or the state reached `Terminated`.
    pub(crate) fn is_terminating(&self) -> bool {
        self.token.is_cancelled() || self.state() == ConnectionState::Terminated
    }

    pub(crate) fn task(&self, id: &str) -> Option<Arc<Task>> {
        self.tasks.read().iter().find(|t| t.id() == id).cloned()
    }

    pub(crate) fn has_task(&self, id: &str) -> bool {
        self.tasks.read().iter().any(|t| t.id() == id)
    }

    pub(crate) fn tasks(&self) -> Vec<Arc<Task>> {
        self.tasks.read().clone()
    }

    /// Number of tasks still running.
    pub fn running_tasks(&self) -> usize {
        self.tasks
            .read()
            .iter()
            .filter(|t| t.state() == TaskState::Running)
            .count()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Records the cause (first one wins) and cancels the session token.
    pub(crate) fn request_termination(&self, cause: TerminationCause) {
        self.cause.lock().get_or_insert(cause);
        self.token.cancel();
    }

    pub(crate) fn termination_cause(&self) -> TerminationCause {
        self.cause
            .lock()
            .clone()
            .unwrap_or(TerminationCause::Shutdown)
    }

    pub(crate) fn set_supervisor(&self, handle: JoinHandle<()>) {
        *self.supervisor.lock() = Some(handle);
    }

    pub(crate) fn take_supervisor(&self) -> Option<JoinHandle<()>> {
        self.supervisor.lock().take()
    }

    /// Summary row for listings.
    pub fn summary(&self) -> SessionSummary {
        let state = self.state();
        SessionSummary {
            session_id: self.id.clone(),
            owner: self.owner.clone(),
            phone: self.phone.clone(),
            state,
            connected: state.is_connected(),
            created_at: self.created_at,
            last_activity: self.last_activity(),
            task_count: self.tasks.read().len(),
            running_tasks: self.running_tasks(),
        }
    }

    /// Full status with every task.
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state();
        SessionSnapshot {
            session_id: self.id.clone(),
            owner: self.owner.clone(),
            phone: self.phone.clone(),
            state,
            connected: state.is_connected(),
            created_at: self.created_at,
            last_activity: self.last_activity(),
            tasks: self.tasks.read().iter().map(|t| t.snapshot()).collect(),
        }
    }

    pub(crate) fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// One row of `list_sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    /// Session identifier.
    pub session_id: String,
    /// Owner identity.
    pub owner: String,
    /// Paired phone number.
    pub phone: String,
    /// Connection state.
    pub state: ConnectionState,
    /// Shorthand for `state == Connected`.
    pub connected: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last send or connection open.
    pub last_activity: DateTime<Utc>,
    /// All tasks, any state.
    pub task_count: usize,
    /// Tasks still running.
    pub running_tasks: usize,
}

/// Result of `query_session_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Session identifier.
    pub session_id: String,
    /// Owner identity.
    pub owner: String,
    /// Paired phone number.
    pub phone: String,
    /// Connection state.
    pub state: ConnectionState,
    /// Shorthand for `state == Connected`.
    pub connected: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last send or connection open.
    pub last_activity: DateTime<Utc>,
    /// Every task in submission order.
    pub tasks: Vec<TaskSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    fn session() -> Session {
        Session::new("s".into(), "o".into(), "1".into(), CancellationToken::new())
    }

    #[test]
    fn test_transition_table() {
        assert!(Initializing.can_transition_to(AwaitingPairing));
        assert!(Initializing.can_transition_to(Connected));
        assert!(AwaitingPairing.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Disconnected));
        assert!(Disconnected.can_transition_to(Initializing));
        assert!(Disconnected.can_transition_to(Terminated));

        assert!(!Connected.can_transition_to(AwaitingPairing));
        assert!(!Connected.can_transition_to(Connected));
        assert!(!AwaitingPairing.can_transition_to(Initializing));
        for next in [Initializing, AwaitingPairing, Connected, Disconnected, Terminated] {
            assert!(!Terminated.can_transition_to(next));
        }
    }

    #[test]
    fn test_transition_reports_previous_and_rejects_illegal() {
        let s = session();
        assert_eq!(s.transition(Connected), Some(Initializing));
        assert_eq!(s.transition(AwaitingPairing), None);
        assert!(s.mark_disconnected());
        assert!(!s.mark_disconnected());
        assert_eq!(s.state(), Disconnected);
        assert_eq!(s.transition(Terminated), Some(Disconnected));
        assert_eq!(s.transition(Initializing), None);
    }

    fn task(id: &str, s: &Session) -> Arc<Task> {
        let plan = crate::tasks::TaskRequest::new("1", "user", ["a"], 5)
            .validate(5)
            .unwrap();
        Arc::new(Task::new(id.into(), plan, s.token().child_token(), 10, 5))
    }

    #[test]
    fn test_terminating_session_refuses_tasks() {
        let s = session();
        assert!(s.add_task(task("t1", &s)));

        s.request_termination(TerminationCause::LoggedOut);
        assert!(s.is_terminating());
        assert!(!s.add_task(task("t2", &s)));
        assert!(!s.has_task("t2"));
        assert_eq!(s.tasks().len(), 1);

        let late = session();
        late.transition(Terminated);
        assert!(!late.add_task(task("t3", &late)));
    }

    #[tokio::test]
    async fn test_state_watchers_see_transitions() {
        let s = session();
        let mut rx = s.subscribe_state();
        s.transition(Connected);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Connected);
    }

    #[test]
    fn test_first_termination_cause_wins() {
        let s = session();
        s.request_termination(TerminationCause::Idle);
        s.request_termination(TerminationCause::Stopped);
        assert!(s.token().is_cancelled());
        assert_eq!(s.termination_cause(), TerminationCause::Idle);
    }
}
