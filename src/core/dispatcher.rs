//! # Dispatcher: the operator-facing facade.
//!
//! The [`Dispatcher`] owns the session registry, the event bus and the background work
//! started by [`DispatcherBuilder`](crate::DispatcherBuilder). Every public operation
//! returns a payload or a structured [`Error`].
//!
//! ## Architecture
//! ```text
//!  initiate_pairing ──► SessionRegistry::create ──► ConnectionSupervisor (per session)
//!                                                        │  Opened → resume schedulers
//!  submit_task ──► validate ──► Task ──► TaskScheduler ◄─┘  (per task)
//!
//!  supervisors / schedulers / janitor ── publish(Event) ──► Bus ──► listener ──► SubscriberSet
//!
//!  shutdown():
//!    drain registry → cancel every session → runtime_token.cancel()
//!    wait supervisors up to `grace` ──► AllStoppedWithin | GraceExceeded
//!    flush stats → stop listener → drain subscribers
//! ```
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use loopcast::{Config, DispatcherBuilder, LoopbackConnector, TaskRequest};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connector = LoopbackConnector::new();
//!     let dispatcher = DispatcherBuilder::new(Config::default(), Arc::new(connector.clone())).build();
//!
//!     let pairing = dispatcher.initiate_pairing("10.0.0.7", "+1 555 0100").await?;
//!     connector.pair(&pairing.session_id);
//!
//!     let req = TaskRequest::new("15550199", "user", ["hello"], 5);
//!     let _task = dispatcher.submit_task("10.0.0.7", req).await?;
//!
//!     dispatcher.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use super::connection::ConnectionSupervisor;
use super::context::Context;
use super::janitor::{Janitor, SweepReport};
use super::registry::random_id;
use super::scheduler;
use super::session::{SessionSnapshot, SessionSummary, TerminationCause};
use super::shutdown;
use super::stats::{self, CountersSnapshot};
use crate::error::{Error, RuntimeError, TransportError, ValidationError};
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::SubscriberSet;
use crate::tasks::{LogEntry, Task, TaskLogView, TaskRequest};
use crate::transport::{GroupInfo, StatsStore};

/// Length of the random part of task identifiers.
const TASK_ID_LEN: usize = 6;

/// Result of a successful [`Dispatcher::initiate_pairing`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pairing {
    /// New session identifier.
    pub session_id: String,
    /// Code the operator enters on their phone.
    pub pairing_code: String,
}

/// Multiplexes operator sessions and their send tasks.
pub struct Dispatcher {
    ctx: Arc<Context>,
    runtime_token: CancellationToken,
    stats_store: Arc<dyn StatsStore>,
    subs: Mutex<Option<Arc<SubscriberSet>>>,
    listener: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    shut: AtomicBool,
}

impl Dispatcher {
    pub(crate) fn new_internal(
        ctx: Arc<Context>,
        runtime_token: CancellationToken,
        stats_store: Arc<dyn StatsStore>,
        subs: Arc<SubscriberSet>,
        listener: (CancellationToken, JoinHandle<()>),
        background: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            ctx,
            runtime_token,
            stats_store,
            subs: Mutex::new(Some(subs)),
            listener: Mutex::new(Some(listener)),
            background: Mutex::new(background),
            shut: AtomicBool::new(false),
        }
    }

    /// Forwards bus events to the subscriber set until `token` fires, then drains what is queued.
    pub(crate) fn spawn_listener(
        bus: &Bus,
        subs: Arc<SubscriberSet>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    msg = rx.recv() => match msg {
                        Ok(ev) => subs.emit(&ev),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(skipped = n, "event listener lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = token.cancelled() => {
                        while let Ok(ev) = rx.try_recv() {
                            subs.emit(&ev);
                        }
                        break;
                    }
                }
            }
        })
    }

    /// Returns a receiver of every runtime event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.ctx.bus.subscribe()
    }

    /// Creates a session for `owner` and returns the pairing code issued for `phone`.
    ///
    /// The phone number is reduced to its digits. A previous session of the same owner
    /// is terminated.
    pub async fn initiate_pairing(&self, owner: &str, phone: &str) -> Result<Pairing, Error> {
        let phone = normalize_phone(phone)?;

        let (session, displaced) = self.ctx.registry.create(owner, &phone);
        if let Some(old) = displaced {
            tracing::info!(owner, old = old.id(), new = session.id(), "owner paired again");
            old.request_termination(TerminationCause::Replaced);
        }
        self.ctx.publish(
            Event::new(EventKind::SessionCreated)
                .with_session(session.id())
                .with_reason(owner),
        );

        let (tx, rx) = oneshot::channel();
        ConnectionSupervisor::spawn(&self.ctx, &session, Some(tx));

        match rx.await {
            Ok(Ok(pairing_code)) => {
                self.ctx.stats.record_session();
                Ok(Pairing {
                    session_id: session.id().to_string(),
                    pairing_code,
                })
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(Error::Internal("pairing aborted".into())),
        }
    }

    /// Starts a cyclic send task on the owner's session.
    ///
    /// Validation happens before anything is created. A session that is already
    /// terminating counts as no session. The first message goes out as soon as the
    /// session is connected.
    pub async fn submit_task(&self, owner: &str, request: TaskRequest) -> Result<String, Error> {
        let cfg = &self.ctx.cfg;
        let plan = request.validate(cfg.min_delay_secs())?;
        let session = self
            .ctx
            .registry
            .by_owner(owner)
            .filter(|s| !s.is_terminating())
            .ok_or_else(|| Error::NoActiveSession(owner.to_string()))?;

        let id = loop {
            let candidate = format!("t{}", random_id(TASK_ID_LEN).to_ascii_lowercase());
            if !session.has_task(&candidate) {
                break candidate;
            }
        };

        let detail = format!(
            "{} message(s), {}s delay",
            plan.messages.len(),
            plan.delay.as_secs()
        );
        let task = Arc::new(Task::new(
            id,
            plan,
            session.token().child_token(),
            cfg.log_storage_cap(),
            cfg.log_render_cap(),
        ));
        if !session.add_task(Arc::clone(&task)) {
            return Err(Error::NoActiveSession(owner.to_string()));
        }
        task.log(LogEntry::info(
            format!("Task started: sending to {}", task.recipient()),
            detail,
        ));
        self.ctx.stats.record_task();
        self.ctx.publish(
            Event::new(EventKind::TaskSubmitted)
                .with_session(session.id())
                .with_task(task.id()),
        );
        scheduler::ensure_running(&self.ctx, &session, &task);

        Ok(task.id().to_string())
    }

    /// Full status of a session and its tasks.
    pub async fn query_session_status(&self, session_id: &str) -> Result<SessionSnapshot, Error> {
        self.ctx
            .registry
            .get(session_id)
            .map(|s| s.snapshot())
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    /// Requests a task to stop. Idempotent.
    ///
    /// A send already in flight completes; nothing is sent or logged after that except
    /// the final summary.
    pub async fn stop_task(&self, session_id: &str, task_id: &str) -> Result<(), Error> {
        let session = self
            .ctx
            .registry
            .get(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        let task = session.task(task_id).ok_or_else(|| Error::TaskNotFound {
            session: session_id.to_string(),
            task: task_id.to_string(),
        })?;

        if task.request_stop() {
            task.log(LogEntry::info(
                "Stop requested",
                "Task will stop after the current step",
            ));
            self.ctx.publish(
                Event::new(EventKind::TaskStopRequested)
                    .with_session(session_id)
                    .with_task(task_id),
            );
        }
        Ok(())
    }

    /// Removes a session and terminates it in the background.
    pub async fn stop_session(&self, session_id: &str) -> Result<(), Error> {
        let session = self
            .ctx
            .registry
            .remove(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        session.request_termination(TerminationCause::Stopped);
        Ok(())
    }

    /// Every live session, oldest first.
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        self.ctx
            .registry
            .list()
            .iter()
            .map(|s| s.summary())
            .collect()
    }

    /// Lifetime counters plus current activity.
    pub async fn aggregate_stats(&self) -> CountersSnapshot {
        let sessions = self.ctx.registry.list();
        let active_tasks = sessions.iter().map(|s| s.running_tasks()).sum();
        self.ctx.stats.snapshot(sessions.len(), active_tasks)
    }

    /// A task's log, newest first, limited to the render cap.
    pub async fn task_logs(&self, session_id: &str, task_id: &str) -> Result<TaskLogView, Error> {
        let session = self
            .ctx
            .registry
            .get(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        session
            .task(task_id)
            .map(|t| t.log_view())
            .ok_or_else(|| Error::TaskNotFound {
                session: session_id.to_string(),
                task: task_id.to_string(),
            })
    }

    /// Identifier of the owner's live session.
    pub async fn session_for_owner(&self, owner: &str) -> Option<String> {
        self.ctx
            .registry
            .by_owner(owner)
            .map(|s| s.id().to_string())
    }

    /// Groups visible to the owner's paired account.
    pub async fn list_groups(&self, owner: &str) -> Result<Vec<GroupInfo>, Error> {
        let session = self
            .ctx
            .registry
            .by_owner(owner)
            .ok_or_else(|| Error::NoActiveSession(owner.to_string()))?;
        let conn = session
            .state()
            .is_connected()
            .then(|| session.connection())
            .flatten()
            .ok_or(Error::Transport(TransportError::Closed))?;
        Ok(conn.groups().await?)
    }

    /// Runs one janitor sweep immediately.
    pub fn sweep_now(&self) -> SweepReport {
        Janitor::new(Arc::clone(&self.ctx)).sweep(Instant::now())
    }

    /// Serves until an OS termination signal, then shuts down.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        shutdown::wait_for_shutdown_signal().await?;
        self.shutdown().await
    }

    /// Terminates every session and waits up to the grace period for their teardown.
    ///
    /// Counters are flushed and subscribers drained either way. Calling it twice is a no-op.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        if self.shut.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.ctx.publish(Event::new(EventKind::ShutdownRequested));

        let sessions = self.ctx.registry.drain();
        for session in &sessions {
            session.request_termination(TerminationCause::Shutdown);
        }
        self.runtime_token.cancel();

        let mut pending: Vec<(String, JoinHandle<()>)> = sessions
            .iter()
            .filter_map(|s| s.take_supervisor().map(|h| (s.id().to_string(), h)))
            .collect();

        let grace = self.ctx.cfg.grace;
        let joined = time::timeout(grace, async {
            for (_, handle) in pending.iter_mut() {
                let _ = handle.await;
            }
        })
        .await;

        let res = match joined {
            Ok(()) => {
                self.ctx.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_) => {
                let stuck: Vec<String> = pending
                    .iter()
                    .filter(|(_, h)| !h.is_finished())
                    .map(|(id, _)| id.clone())
                    .collect();
                self.ctx.publish(
                    Event::new(EventKind::GraceExceeded).with_reason(stuck.join(",")),
                );
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        };

        let background = std::mem::take(&mut *self.background.lock());
        for handle in background {
            let _ = handle.await;
        }
        stats::flush(&self.ctx.stats, self.stats_store.as_ref()).await;

        let listener = self.listener.lock().take();
        if let Some((token, handle)) = listener {
            token.cancel();
            let _ = handle.await;
        }
        let subs = self.subs.lock().take();
        if let Some(set) = subs.and_then(Arc::into_inner) {
            set.shutdown().await;
        }

        res
    }
}

/// Keeps only the digits of `raw`.
fn normalize_phone(raw: &str) -> Result<String, ValidationError> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        Err(ValidationError::InvalidPhoneNumber(raw.to_string()))
    } else {
        Ok(digits)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::Config;
    use crate::core::ConnectionState;
    use crate::core::DispatcherBuilder;
    use crate::tasks::{LogKind, TaskState};
    use crate::transport::{
        CloseReason, Connection, ConnectionEvent, Connector, Credential, CredentialStore, Link,
        LoopbackConnector, MemoryCredentialStore, MemoryStatsStore, Recipient,
    };

    struct Harness {
        lc: LoopbackConnector,
        creds: Arc<MemoryCredentialStore>,
        stats: Arc<MemoryStatsStore>,
        d: Arc<Dispatcher>,
    }

    fn harness(cfg: Config) -> Harness {
        let lc = LoopbackConnector::new();
        let creds = Arc::new(MemoryCredentialStore::new());
        let stats = Arc::new(MemoryStatsStore::new());
        let d = DispatcherBuilder::new(cfg, Arc::new(lc.clone()))
            .with_credentials(creds.clone())
            .with_stats_store(stats.clone())
            .build();
        Harness { lc, creds, stats, d }
    }

    /// Lets every ready task run; the paused clock only moves once the runtime is idle.
    async fn settle() {
        time::sleep(Duration::from_millis(1)).await;
    }

    async fn paired(h: &Harness, owner: &str) -> String {
        let p = h.d.initiate_pairing(owner, "+1 (555) 000-1").await.unwrap();
        assert!(h.lc.pair(&p.session_id));
        settle().await;
        p.session_id
    }

    fn messages(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("m{i}")).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_pairing_then_connected() {
        let h = harness(Config::default());
        let p = h.d.initiate_pairing("owner", "+1 (555) 000-1").await.unwrap();
        assert_eq!(h.lc.pairing_code(&p.session_id), Some(p.pairing_code.clone()));

        let snap = h.d.query_session_status(&p.session_id).await.unwrap();
        assert_eq!(snap.state, ConnectionState::AwaitingPairing);
        assert_eq!(snap.phone, "15550001");

        h.lc.pair(&p.session_id);
        settle().await;
        let snap = h.d.query_session_status(&p.session_id).await.unwrap();
        assert!(snap.connected);
        assert!(h.creds.contains(&p.session_id));
        assert_eq!(h.d.session_for_owner("owner").await, Some(p.session_id));
        assert_eq!(h.d.aggregate_stats().await.counters.total_sessions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_phone_creates_nothing() {
        let h = harness(Config::default());
        let err = h.d.initiate_pairing("owner", "call me").await.unwrap_err();
        assert_eq!(err.as_label(), "validation");
        assert!(h.d.list_sessions().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefix_cycles_through_messages() {
        let h = harness(Config::default());
        let sid = paired(&h, "owner").await;

        let req = TaskRequest::new("9190000000", "user", ["a", "b"], 5).with_prefix("Hi ");
        let tid = h.d.submit_task("owner", req).await.unwrap();
        assert!(tid.starts_with('t'));
        assert_eq!(tid.len(), 7);

        let snap = h.d.query_session_status(&sid).await.unwrap();
        assert_eq!(snap.tasks.len(), 1);
        assert_eq!(snap.tasks[0].state, TaskState::Running);
        assert_eq!(snap.tasks[0].sent_messages, 0);

        time::sleep(Duration::from_secs(11)).await;

        let sent = h.lc.sent(&sid);
        let texts: Vec<&str> = sent.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["Hi a", "Hi b", "Hi a"]);
        for pair in sent.windows(2) {
            assert!(pair[1].at - pair[0].at >= Duration::from_secs(5));
        }
        assert_eq!(sent[0].to, Recipient::new("9190000000", crate::TargetKind::User));

        let task = &h.d.query_session_status(&sid).await.unwrap().tasks[0];
        assert_eq!(task.sent_messages, 3);
        assert_eq!(task.cursor, 1);
        assert_eq!(task.cycle_count, 1);
        assert_eq!(task.current_cycle, 2);

        let logs = h.d.task_logs(&sid, &tid).await.unwrap();
        assert_eq!(logs.entries[0].kind, LogKind::Success);
        assert_eq!(logs.entries[0].message, "Message #3 (Cycle 2) sent to 9190000000");
        assert_eq!(logs.entries[0].detail, "Message: \"Hi a\"");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_messages_rejected_without_side_effects() {
        let h = harness(Config::default());
        let sid = paired(&h, "owner").await;
        let before = h.d.aggregate_stats().await.counters;

        let err = h
            .d
            .submit_task("owner", TaskRequest::new("1", "user", Vec::<String>::new(), 5))
            .await
            .unwrap_err();
        assert_eq!(err, Error::Validation(ValidationError::EmptyMessages));

        assert!(h.d.query_session_status(&sid).await.unwrap().tasks.is_empty());
        assert_eq!(h.d.aggregate_stats().await.counters, before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_requires_session() {
        let h = harness(Config::default());
        let err = h
            .d
            .submit_task("nobody", TaskRequest::new("1", "user", ["a"], 5))
            .await
            .unwrap_err();
        assert_eq!(err, Error::NoActiveSession("nobody".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_task_freezes_log() {
        let h = harness(Config::default());
        let sid = paired(&h, "owner").await;
        let tid = h
            .d
            .submit_task("owner", TaskRequest::new("1", "user", ["a", "b"], 5))
            .await
            .unwrap();
        time::sleep(Duration::from_secs(6)).await;

        h.d.stop_task(&sid, &tid).await.unwrap();
        h.d.stop_task(&sid, &tid).await.unwrap();
        settle().await;

        let frozen = h.d.task_logs(&sid, &tid).await.unwrap();
        assert_eq!(frozen.state, TaskState::Completed);
        assert_eq!(frozen.sent_messages, 2);
        assert_eq!(frozen.entries[0].message, "Task stopped");
        assert_eq!(frozen.entries[0].detail, "Total messages sent: 2 in 1 cycle(s)");

        time::sleep(Duration::from_secs(60)).await;
        let later = h.d.task_logs(&sid, &tid).await.unwrap();
        assert_eq!(later.stored, frozen.stored);
        assert_eq!(h.lc.sent(&sid).len(), 2);
        assert_eq!(h.d.aggregate_stats().await.counters.failed_tasks, 1);

        let err = h.d.stop_task(&sid, "tmissing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_freezes_cursor_and_resumes() {
        let h = harness(Config::default());
        let sid = paired(&h, "owner").await;
        let tid = h
            .d
            .submit_task("owner", TaskRequest::new("1", "user", messages(5), 5))
            .await
            .unwrap();

        time::sleep(Duration::from_secs(11)).await;
        assert_eq!(h.lc.sent(&sid).len(), 3);

        assert!(h.lc.drop_link(&sid, CloseReason::Lost("reset".into())));
        settle().await;
        assert_eq!(
            h.d.query_session_status(&sid).await.unwrap().state,
            ConnectionState::Disconnected
        );

        time::sleep(Duration::from_secs(9)).await;
        let snap = h.d.query_session_status(&sid).await.unwrap();
        assert_eq!(snap.tasks[0].sent_messages, 3);
        assert_eq!(snap.tasks[0].cursor, 3);
        assert_eq!(h.lc.sent(&sid).len(), 3);

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.lc.connects(&sid), 2);
        let texts = h.lc.sent_texts(&sid);
        assert_eq!(texts.len(), 4);
        assert_eq!(texts[3], "m3");

        let logs = h.d.task_logs(&sid, &tid).await.unwrap();
        assert!(
            logs.entries
                .iter()
                .any(|e| e.message == "Waiting for connection to be restored...")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_retries_same_message_after_reconnect() {
        let h = harness(Config::default());
        let sid = paired(&h, "owner").await;
        h.lc
            .fail_next_send(&sid, TransportError::Socket("connection reset".into()));

        h.d.submit_task("owner", TaskRequest::new("1", "user", ["a", "b"], 5))
            .await
            .unwrap();
        settle().await;
        assert_eq!(
            h.d.query_session_status(&sid).await.unwrap().state,
            ConnectionState::Disconnected
        );

        time::sleep(Duration::from_secs(11)).await;
        assert_eq!(h.lc.sent_texts(&sid), vec!["a".to_string()]);

        let task = &h.d.query_session_status(&sid).await.unwrap().tasks[0];
        assert_eq!(task.sent_messages, 1);
        assert_eq!(task.failures, 1);
        assert_eq!(task.last_error.as_deref(), Some("socket error: connection reset"));
        assert_eq!(h.d.aggregate_stats().await.counters.errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_send_keeps_connection() {
        let h = harness(Config::default());
        let sid = paired(&h, "owner").await;
        h.lc.fail_next_send(&sid, TransportError::Rejected("bad recipient".into()));

        h.d.submit_task("owner", TaskRequest::new("1", "user", ["a", "b"], 5))
            .await
            .unwrap();
        settle().await;
        assert!(h.d.query_session_status(&sid).await.unwrap().connected);

        // backoff 5s, then delay 5s, then the same message again
        time::sleep(Duration::from_secs(11)).await;
        assert_eq!(h.lc.sent_texts(&sid), vec!["a".to_string()]);
        assert_eq!(h.lc.connects(&sid), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_evicted_by_sweep() {
        let h = harness(Config::default());
        let sid = paired(&h, "owner").await;
        assert_eq!(h.d.list_sessions().await.len(), 1);

        time::sleep(Duration::from_secs(25 * 60 * 60 + 60)).await;

        assert!(h.d.list_sessions().await.is_empty());
        assert!(h.d.session_for_owner("owner").await.is_none());
        assert!(h.d.query_session_status(&sid).await.unwrap_err().is_not_found());
        assert_eq!(h.lc.closes(&sid), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_truncates_logs_to_storage_cap() {
        let cfg = Config {
            log_storage_cap: 3,
            log_render_cap: 2,
            ..Config::default()
        };
        let h = harness(cfg);
        let sid = paired(&h, "owner").await;
        let tid = h
            .d
            .submit_task("owner", TaskRequest::new("1", "user", ["a"], 5))
            .await
            .unwrap();
        time::sleep(Duration::from_secs(30)).await;

        let view = h.d.task_logs(&sid, &tid).await.unwrap();
        assert_eq!(view.stored, 3);
        assert_eq!(view.entries.len(), 2);

        let report = h.d.sweep_now();
        assert!(report.evicted.is_empty());
        assert_eq!(report.truncated_entries, 0);

        // A buffer sized above the configured cap gets cut back by the sweep.
        let session = h.d.ctx.registry.get(&sid).unwrap();
        let plan = TaskRequest::new("2", "user", ["z"], 5).validate(5).unwrap();
        let wide = Arc::new(Task::new("twide".into(), plan, session.token().child_token(), 10, 5));
        for n in 0..10 {
            wide.log(LogEntry::info(format!("#{n}"), ""));
        }
        assert!(session.add_task(Arc::clone(&wide)));

        let report = h.d.sweep_now();
        assert_eq!(report.truncated_entries, 7);
        let view = h.d.task_logs(&sid, "twide").await.unwrap();
        assert_eq!(view.stored, 3);
        assert_eq!(view.entries[0].message, "#9");
        assert_eq!(h.d.task_logs(&sid, &tid).await.unwrap().stored, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_session_terminates_tasks() {
        let h = harness(Config::default());
        let sid = paired(&h, "owner").await;
        let tid = h
            .d
            .submit_task("owner", TaskRequest::new("1", "group", ["a"], 5))
            .await
            .unwrap();
        settle().await;

        let mut events = h.d.subscribe();
        h.d.stop_session(&sid).await.unwrap();
        settle().await;

        assert!(h.d.query_session_status(&sid).await.unwrap_err().is_not_found());
        assert!(h.d.stop_session(&sid).await.unwrap_err().is_not_found());
        assert_eq!(h.lc.closes(&sid), 1);

        let mut kinds = Vec::new();
        while let Ok(ev) = events.try_recv() {
            kinds.push((ev.kind, ev.task.as_deref().map(str::to_string)));
        }
        assert!(kinds.contains(&(EventKind::TaskStopped, Some(tid))));
        assert!(kinds.iter().any(|(k, _)| *k == EventKind::SessionTerminated));
        assert_eq!(h.d.aggregate_stats().await.active_tasks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logged_out_is_terminal() {
        let h = harness(Config::default());
        let sid = paired(&h, "owner").await;
        assert!(h.creds.contains(&sid));

        h.lc.drop_link(&sid, CloseReason::LoggedOut);
        time::sleep(Duration::from_secs(60)).await;

        assert!(h.d.session_for_owner("owner").await.is_none());
        assert!(!h.creds.contains(&sid));
        assert_eq!(h.lc.connects(&sid), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_while_session_tears_down_is_refused() {
        let h = harness(Config::default());
        let sid = paired(&h, "owner").await;
        h.lc.set_send_latency(&sid, Duration::from_secs(20));
        let first = h
            .d
            .submit_task("owner", TaskRequest::new("1", "user", ["a"], 5))
            .await
            .unwrap();
        settle().await;
        let task = h.d.ctx.registry.get(&sid).unwrap().task(&first).unwrap();

        // Teardown now waits for the in-flight send.
        h.lc.drop_link(&sid, CloseReason::LoggedOut);
        settle().await;
        assert_eq!(h.d.session_for_owner("owner").await, Some(sid.clone()));

        let err = h
            .d
            .submit_task("owner", TaskRequest::new("1", "user", ["b"], 5))
            .await
            .unwrap_err();
        assert_eq!(err, Error::NoActiveSession("owner".into()));

        time::sleep(Duration::from_secs(30)).await;
        assert!(h.d.session_for_owner("owner").await.is_none());
        assert_eq!(task.state(), TaskState::Completed);

        let stats = h.d.aggregate_stats().await;
        assert_eq!(stats.counters.total_tasks, 1);
        assert_eq!(stats.counters.failed_tasks, 1);
        assert_eq!(stats.active_tasks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failures_retry_until_connected() {
        let h = harness(Config::default());
        let sid = paired(&h, "owner").await;
        h.d.submit_task("owner", TaskRequest::new("1", "user", ["a", "b", "c"], 5))
            .await
            .unwrap();
        settle().await;
        time::sleep(Duration::from_secs(6)).await;
        assert_eq!(h.lc.sent_texts(&sid), vec!["a", "b"]);

        let mut events = h.d.subscribe();
        for _ in 0..2 {
            h.lc.fail_next_connect(&sid, TransportError::Socket("refused".into()));
        }
        h.lc.drop_link(&sid, CloseReason::Lost("reset".into()));

        // reconnect at +10s fails, then every 30s: +40s fails, +70s succeeds
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(
            h.d.query_session_status(&sid).await.unwrap().state,
            ConnectionState::Disconnected
        );
        assert_eq!(h.lc.sent_texts(&sid), vec!["a", "b"]);
        assert_eq!(h.lc.connects(&sid), 1);

        time::sleep(Duration::from_secs(11)).await;
        let snap = h.d.query_session_status(&sid).await.unwrap();
        assert_eq!(snap.state, ConnectionState::Connected);
        assert_eq!(h.lc.connects(&sid), 2);
        assert_eq!(h.lc.sent_texts(&sid), vec!["a", "b", "c"]);
        assert_eq!(snap.tasks[0].cursor, 0);

        let mut failed = 0;
        while let Ok(ev) = events.try_recv() {
            if ev.kind == EventKind::ConnectFailed {
                failed += 1;
            }
        }
        assert_eq!(failed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_connect_is_terminal() {
        let h = harness(Config::default());
        let sid = paired(&h, "owner").await;
        h.lc.fail_next_connect(&sid, TransportError::Unauthorized);
        h.lc.drop_link(&sid, CloseReason::Lost("reset".into()));

        time::sleep(Duration::from_secs(11)).await;
        assert!(h.d.session_for_owner("owner").await.is_none());
        assert!(!h.creds.contains(&sid));

        // no further attempts once terminated
        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.lc.connects(&sid), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_without_credential_ends_session() {
        let h = harness(Config::default());
        let sid = paired(&h, "owner").await;
        CredentialStore::remove(h.creds.as_ref(), &sid).await.unwrap();

        let mut events = h.d.subscribe();
        h.lc.drop_link(&sid, CloseReason::Lost("reset".into()));
        time::sleep(Duration::from_secs(11)).await;

        assert_eq!(h.lc.connects(&sid), 2);
        assert!(h.d.query_session_status(&sid).await.unwrap_err().is_not_found());

        let mut reason = None;
        while let Ok(ev) = events.try_recv() {
            if ev.kind == EventKind::SessionTerminated {
                reason = ev.reason.as_deref().map(str::to_string);
            }
        }
        assert_eq!(
            reason.as_deref(),
            Some("credential missing after reconnect")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_eviction_stops_running_tasks() {
        let cfg = Config {
            idle_timeout: Duration::from_secs(10 * 60),
            sweep_period: Duration::from_secs(60),
            ..Config::default()
        };
        let h = harness(cfg);
        let sid = paired(&h, "owner").await;
        let tid = h
            .d
            .submit_task("owner", TaskRequest::new("1", "user", ["a"], 5))
            .await
            .unwrap();
        settle().await;
        let task = h.d.ctx.registry.get(&sid).unwrap().task(&tid).unwrap();

        // The link stays down: every reconnect attempt fails.
        for _ in 0..60 {
            h.lc.fail_next_connect(&sid, TransportError::Socket("refused".into()));
        }
        h.lc.drop_link(&sid, CloseReason::Lost("reset".into()));

        time::sleep(Duration::from_secs(5 * 60)).await;
        assert_eq!(task.state(), TaskState::Running);
        assert_eq!(h.d.list_sessions().await.len(), 1);

        time::sleep(Duration::from_secs(7 * 60)).await;
        assert!(h.d.list_sessions().await.is_empty());

        let snap = task.snapshot();
        assert_eq!(snap.state, TaskState::Completed);
        assert!(snap.ended_at.is_some());
        assert_eq!(snap.sent_messages, 1);

        let view = task.log_view();
        assert_eq!(view.entries[0].message, "Task stopped");
        assert_eq!(view.entries[0].detail, "Total messages sent: 1 in 1 cycle(s)");

        let counters = h.d.aggregate_stats().await.counters;
        assert_eq!(counters.failed_tasks, 1);
        assert_eq!(counters.successful_tasks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repairing_replaces_previous_session() {
        let h = harness(Config::default());
        let first = paired(&h, "owner").await;
        let second = paired(&h, "owner").await;
        assert_ne!(first, second);

        assert_eq!(h.d.session_for_owner("owner").await, Some(second.clone()));
        let all = h.d.list_sessions().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].session_id, second);
        assert_eq!(h.lc.closes(&first), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_groups_needs_connection() {
        let h = harness(Config::default());
        let err = h.d.list_groups("owner").await.unwrap_err();
        assert_eq!(err, Error::NoActiveSession("owner".into()));

        let sid = paired(&h, "owner").await;
        let group = GroupInfo {
            id: "120363".into(),
            subject: "Team".into(),
            participants: 4,
        };
        h.lc.set_groups(&sid, vec![group.clone()]);
        assert_eq!(h.d.list_groups("owner").await.unwrap(), vec![group]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_stats() {
        let h = harness(Config::default());
        let sid = paired(&h, "owner").await;
        h.d.submit_task("owner", TaskRequest::new("1", "user", ["a"], 5))
            .await
            .unwrap();
        settle().await;

        h.d.shutdown().await.unwrap();
        h.d.shutdown().await.unwrap();

        assert!(h.d.list_sessions().await.is_empty());
        assert_eq!(h.lc.closes(&sid), 1);
        let saved = h.stats.snapshot().unwrap();
        assert_eq!(saved.total_messages_sent, 1);
        assert_eq!(saved.total_tasks, 1);
        assert_eq!(saved.failed_tasks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_reports_stuck_sessions() {
        let cfg = Config {
            send_timeout: Duration::ZERO,
            grace: Duration::from_secs(1),
            ..Config::default()
        };
        let h = harness(cfg);
        let sid = paired(&h, "owner").await;
        h.lc.set_send_latency(&sid, Duration::from_secs(3600));
        h.d.submit_task("owner", TaskRequest::new("1", "user", ["a"], 5))
            .await
            .unwrap();
        settle().await;

        match h.d.shutdown().await {
            Err(RuntimeError::GraceExceeded { grace, stuck }) => {
                assert_eq!(grace, Duration::from_secs(1));
                assert_eq!(stuck, vec![sid]);
            }
            other => panic!("expected grace exceeded, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_restores_previous_counters() {
        let lc = LoopbackConnector::new();
        let store = Arc::new(MemoryStatsStore::with_counters(stats::PersistedCounters {
            total_messages_sent: 40,
            ..Default::default()
        }));
        let d = DispatcherBuilder::new(Config::default(), Arc::new(lc))
            .with_stats_store(store)
            .build();
        settle().await;
        assert_eq!(d.aggregate_stats().await.counters.total_messages_sent, 40);
    }

    struct Refusing;

    #[async_trait]
    impl Connector for Refusing {
        async fn connect(&self, _: &str, _: Option<Credential>) -> Result<Link, TransportError> {
            Err(TransportError::Socket("refused".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pairing_fails_when_connect_fails() {
        let d = DispatcherBuilder::new(Config::default(), Arc::new(Refusing)).build();
        let err = d.initiate_pairing("owner", "15550001").await.unwrap_err();
        assert_eq!(err, Error::Transport(TransportError::Socket("refused".into())));
        settle().await;
        assert!(d.list_sessions().await.is_empty());
        assert_eq!(d.aggregate_stats().await.counters.total_sessions, 0);
    }

    /// Connector whose connections panic when sending to `boom`.
    #[derive(Default)]
    struct Explosive {
        events: Mutex<Option<mpsc::Sender<ConnectionEvent>>>,
        sent: Arc<Mutex<Vec<String>>>,
    }

    struct ExplosiveConnection {
        registered: AtomicBool,
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Connector for Explosive {
        async fn connect(&self, _: &str, cred: Option<Credential>) -> Result<Link, TransportError> {
            let (tx, rx) = mpsc::channel(8);
            *self.events.lock() = Some(tx);
            Ok(Link {
                connection: Arc::new(ExplosiveConnection {
                    registered: AtomicBool::new(cred.is_some()),
                    sent: Arc::clone(&self.sent),
                }),
                events: rx,
            })
        }
    }

    #[async_trait]
    impl Connection for ExplosiveConnection {
        fn is_registered(&self) -> bool {
            self.registered.load(Ordering::Acquire)
        }
        async fn request_pairing_code(&self, _: &str) -> Result<String, TransportError> {
            self.registered.store(true, Ordering::Release);
            Ok("0000-0000".into())
        }
        async fn send(&self, to: &Recipient, text: &str) -> Result<(), TransportError> {
            if to.id == "boom" {
                panic!("boom");
            }
            self.sent.lock().push(text.to_string());
            Ok(())
        }
        async fn groups(&self) -> Result<Vec<GroupInfo>, TransportError> {
            Ok(Vec::new())
        }
        async fn close(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_task_is_isolated() {
        let conn = Arc::new(Explosive::default());
        let d = DispatcherBuilder::new(Config::default(), conn.clone()).build();
        let p = d.initiate_pairing("owner", "1").await.unwrap();
        let tx = conn.events.lock().clone().unwrap();
        tx.send(ConnectionEvent::Opened).await.unwrap();
        settle().await;

        let bad = d
            .submit_task("owner", TaskRequest::new("boom", "user", ["x"], 5))
            .await
            .unwrap();
        let good = d
            .submit_task("owner", TaskRequest::new("ok", "user", ["y"], 5))
            .await
            .unwrap();
        time::sleep(Duration::from_secs(6)).await;

        let snap = d.query_session_status(&p.session_id).await.unwrap();
        let bad_task = snap.tasks.iter().find(|t| t.task_id == bad).unwrap();
        let good_task = snap.tasks.iter().find(|t| t.task_id == good).unwrap();
        assert_eq!(bad_task.state, TaskState::Completed);
        assert_eq!(bad_task.last_error.as_deref(), Some("boom"));
        assert_eq!(good_task.state, TaskState::Running);
        assert_eq!(conn.sent.lock().len(), 2);
        assert!(snap.connected);

        let logs = d.task_logs(&p.session_id, &bad).await.unwrap();
        assert_eq!(logs.entries[0].kind, LogKind::Error);
        assert_eq!(logs.entries[0].message, "Critical error in task execution");

        let counters = d.aggregate_stats().await.counters;
        assert_eq!(counters.errors, 1);
        assert_eq!(counters.failed_tasks, 1);
    }
}
