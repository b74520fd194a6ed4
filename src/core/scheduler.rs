//! # TaskScheduler: the cyclic send loop of one task.
//!
//! ```text
//! loop {
//!   stop requested?                → exit
//!   session not Connected?         → log "waiting", sleep(poll) | wake on Connected | stop
//!   send(messages[cursor])
//!     ├─ Ok                        → sent += 1, touch session, log Success
//!     ├─ Err (transport-level)     → log Error, mark session Disconnected,
//!     │                              sleep(backoff), retry same cursor
//!     └─ Err (other)               → log Error, sleep(backoff)
//!   sleep(delay) | stop
//! }
//! ```
//!
//! The loop is wrapped in `catch_unwind`: a panic ends this task only, as a crash.
//! Stop is observed at every sleep and before every send; a send already in flight
//! completes first.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::time;
use tokio_util::sync::CancellationToken;

use super::context::Context;
use super::runner::send_once;
use super::session::{ConnectionState, Session};
use crate::events::{Event, EventKind};
use crate::subscribers::panic_message;
use crate::tasks::{LogEntry, Task};

/// Starts the task's loop unless one is already alive or the task is no longer running.
pub(crate) fn ensure_running(ctx: &Arc<Context>, session: &Arc<Session>, task: &Arc<Task>) -> bool {
    let mut worker = task.worker.lock();
    if !task.is_running() || worker.as_ref().is_some_and(|h| !h.is_finished()) {
        return false;
    }
    let scheduler = TaskScheduler {
        ctx: Arc::clone(ctx),
        session: Arc::clone(session),
        task: Arc::clone(task),
    };
    *worker = Some(tokio::spawn(scheduler.run()));
    true
}

struct TaskScheduler {
    ctx: Arc<Context>,
    session: Arc<Session>,
    task: Arc<Task>,
}

impl TaskScheduler {
    async fn run(self) {
        match AssertUnwindSafe(self.drive()).catch_unwind().await {
            Ok(()) => self.finish(),
            Err(panic) => self.crash(&panic_message(panic.as_ref())),
        }
    }

    async fn drive(&self) {
        let stop = self.task.stop_token().clone();
        let mut state_rx = self.session.subscribe_state();
        let cfg = &self.ctx.cfg;

        loop {
            if stop.is_cancelled() || !self.task.is_running() {
                break;
            }

            let conn = match self.session.state() {
                ConnectionState::Connected => self.session.connection(),
                _ => None,
            };
            let Some(conn) = conn else {
                self.task.log(LogEntry::info(
                    "Waiting for connection to be restored...",
                    "Pausing message sending until reconnected",
                ));
                self.publish(Event::new(EventKind::TaskWaiting));

                tokio::select! {
                    _ = time::sleep(cfg.poll_interval) => {}
                    _ = until_connected(&mut state_rx) => {}
                    _ = stop.cancelled() => break,
                }
                continue;
            };

            let out = self.task.next_outgoing();
            let target = self.task.recipient().id.as_str();
            let result =
                send_once(conn.as_ref(), self.task.recipient(), &out.text, cfg.send_timeout()).await;
            drop(conn);

            match result {
                Ok(()) => {
                    self.task.record_success();
                    self.ctx.stats.record_sent();
                    self.session.touch();
                    self.task.log(LogEntry::success(
                        format!("Message #{} (Cycle {}) sent to {target}", out.number, out.cycle),
                        format!("Message: \"{}\"", out.text),
                    ));
                    self.publish(
                        Event::new(EventKind::MessageSent)
                            .with_attempt(out.number)
                            .with_cursor(out.cursor),
                    );
                }
                Err(err) => {
                    self.task.record_failure(&err.to_string());
                    self.ctx.stats.record_error();
                    self.task.log(LogEntry::error(
                        format!("Failed to send message #{} to {target}", out.number),
                        format!("Error: {err}"),
                    ));
                    self.publish(
                        Event::new(EventKind::SendFailed)
                            .with_cursor(out.cursor)
                            .with_reason(err.to_string()),
                    );

                    let transport_level = err.is_transport_level();
                    if transport_level && self.session.mark_disconnected() {
                        tracing::debug!(
                            session = self.session.id(),
                            task = self.task.id(),
                            error = %err,
                            "send failure marked session disconnected"
                        );
                    }
                    if !pause(cfg.failure_backoff, &stop).await {
                        break;
                    }
                    if transport_level {
                        continue;
                    }
                }
            }

            if !pause(self.task.delay(), &stop).await {
                break;
            }
        }
    }

    fn finish(&self) {
        let (sent, cycles, stopped) = self.task.finish();
        self.ctx.stats.record_task_end(stopped);
        self.task.log(LogEntry::info(
            "Task stopped",
            format!("Total messages sent: {sent} in {cycles} cycle(s)"),
        ));
        self.publish(Event::new(EventKind::TaskStopped).with_attempt(sent));
    }

    fn crash(&self, msg: &str) {
        self.task.crash(msg);
        self.ctx.stats.record_error();
        self.ctx.stats.record_task_end(true);
        self.task
            .log(LogEntry::error("Critical error in task execution", msg.to_string()));
        tracing::error!(
            session = self.session.id(),
            task = self.task.id(),
            panic = msg,
            "task scheduler crashed"
        );
        self.publish(Event::new(EventKind::TaskCrashed).with_reason(msg.to_string()));
    }

    fn publish(&self, ev: Event) {
        self.ctx
            .publish(ev.with_session(self.session.id()).with_task(self.task.id()));
    }
}

/// Resolves once the state is `Connected`. Pends forever if the session is gone.
async fn until_connected(rx: &mut watch::Receiver<ConnectionState>) {
    while !rx.borrow_and_update().is_connected() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Sleeps for `d`; returns `false` if `stop` fired first.
async fn pause(d: Duration, stop: &CancellationToken) -> bool {
    tokio::select! {
        _ = time::sleep(d) => true,
        _ = stop.cancelled() => false,
    }
}
