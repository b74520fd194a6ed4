//! # ConnectionSupervisor: one per session.
//!
//! Drives the session's connection through explicit phases instead of nested callbacks:
//!
//! ```text
//!             ┌──────────── Retry(delay) ◄──────────────┐
//!             ▼                                         │
//!   Initializing ── connect ok ──► Online(link) ── close/lost ──┘
//!        │  (unregistered + pairing request → AwaitingPairing)
//!        └── connect err ──► Retry (30s)      Online ── logged out ──► Terminated
//!   session token cancelled (stop, idle, shutdown) ─────────────────► Terminated
//! ```
//!
//! Teardown (always on this task): cancel the session token, `Terminated` state, close
//! the handle, stop every task and wait for its loop, detach from the registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time;
use tokio_util::sync::CancellationToken;

use super::context::Context;
use super::scheduler;
use super::session::{ConnectionState, Session, TerminationCause};
use crate::error::{Error, TransportError};
use crate::events::{Event, EventKind};
use crate::transport::{CloseReason, ConnectionEvent, Credential, Link};

/// Reply channel for the pairing code requested by `initiate_pairing`.
pub(crate) type PairingReply = oneshot::Sender<Result<String, Error>>;

enum Phase {
    Initializing,
    Online(Link),
    Retry(Duration),
    Terminated(TerminationCause),
}

pub(crate) struct ConnectionSupervisor {
    ctx: Arc<Context>,
    session: Arc<Session>,
    pairing: Option<PairingReply>,
    attempts: u32,
}

impl ConnectionSupervisor {
    /// Spawns the supervisor and stores its handle on the session.
    pub(crate) fn spawn(ctx: &Arc<Context>, session: &Arc<Session>, pairing: Option<PairingReply>) {
        let sup = Self {
            ctx: Arc::clone(ctx),
            session: Arc::clone(session),
            pairing,
            attempts: 0,
        };
        session.set_supervisor(tokio::spawn(sup.run()));
    }

    async fn run(mut self) {
        let token = self.session.token().clone();
        let mut phase = Phase::Initializing;

        let cause = loop {
            phase = match phase {
                Phase::Initializing => self.initialize(&token).await,
                Phase::Online(link) => self.drive(link, &token).await,
                Phase::Retry(delay) => tokio::select! {
                    _ = time::sleep(delay) => Phase::Initializing,
                    _ = token.cancelled() => self.cancelled(),
                },
                Phase::Terminated(cause) => break cause,
            };
        };

        self.teardown(cause).await;
    }

    fn cancelled(&self) -> Phase {
        Phase::Terminated(self.session.termination_cause())
    }

    async fn initialize(&mut self, token: &CancellationToken) -> Phase {
        self.session.transition(ConnectionState::Initializing);

        let credential = match self.ctx.credentials.load(self.session.id()).await {
            Ok(cred) => cred,
            Err(err) => {
                tracing::warn!(session = self.session.id(), error = %err, "failed to load credential");
                None
            }
        };
        let had_credential = credential.is_some();

        let res = tokio::select! {
            res = self.connect(credential) => res,
            _ = token.cancelled() => return self.cancelled(),
        };
        let link = match res {
            Ok(link) => link,
            Err(err) => return self.on_connect_error(err),
        };

        if let Some(old) = self.session.set_connection(Some(Arc::clone(&link.connection))) {
            old.close().await;
        }

        if link.connection.is_registered() {
            if let Some(reply) = self.pairing.take() {
                let reason = "connection already registered";
                let _ = reply.send(Err(Error::Internal(reason.into())));
                return Phase::Terminated(TerminationCause::PairingFailed(reason.into()));
            }
            return Phase::Online(link);
        }

        match self.pairing.take() {
            Some(reply) => self.request_pairing(link, reply, token).await,
            None => {
                tracing::warn!(
                    session = self.session.id(),
                    had_credential,
                    "reconnect came back unregistered"
                );
                Phase::Terminated(TerminationCause::CredentialMissing)
            }
        }
    }

    async fn connect(&self, credential: Option<Credential>) -> Result<Link, TransportError> {
        let fut = self.ctx.connector.connect(self.session.id(), credential);
        match self.ctx.cfg.connect_timeout() {
            Some(dur) => time::timeout(dur, fut)
                .await
                .unwrap_or(Err(TransportError::Timeout(dur))),
            None => fut.await,
        }
    }

    fn on_connect_error(&mut self, err: TransportError) -> Phase {
        self.attempts = self.attempts.saturating_add(1);
        self.publish(
            Event::new(EventKind::ConnectFailed)
                .with_reason(err.to_string())
                .with_attempt(u64::from(self.attempts)),
        );

        if let Some(reply) = self.pairing.take() {
            let _ = reply.send(Err(Error::Transport(err.clone())));
            return Phase::Terminated(TerminationCause::PairingFailed(err.to_string()));
        }
        if err.is_terminal_auth() {
            return Phase::Terminated(TerminationCause::LoggedOut);
        }

        self.session.transition(ConnectionState::Disconnected);
        let delay = self.ctx.cfg.connect_retry.next(self.attempts - 1);
        self.publish(
            Event::new(EventKind::ReconnectScheduled)
                .with_delay(delay)
                .with_attempt(u64::from(self.attempts)),
        );
        Phase::Retry(delay)
    }

    async fn request_pairing(
        &mut self,
        link: Link,
        reply: PairingReply,
        token: &CancellationToken,
    ) -> Phase {
        tokio::select! {
            _ = time::sleep(self.ctx.cfg.pairing_settle) => {}
            _ = token.cancelled() => return self.cancelled(),
        }

        match link.connection.request_pairing_code(self.session.phone()).await {
            Ok(code) => {
                self.session.transition(ConnectionState::AwaitingPairing);
                self.publish(Event::new(EventKind::PairingCodeIssued));
                if reply.send(Ok(code)).is_err() {
                    tracing::debug!(session = self.session.id(), "pairing caller went away");
                }
                Phase::Online(link)
            }
            Err(err) => {
                let cause = TerminationCause::PairingFailed(err.to_string());
                let _ = reply.send(Err(Error::Transport(err)));
                Phase::Terminated(cause)
            }
        }
    }

    async fn drive(&mut self, mut link: Link, token: &CancellationToken) -> Phase {
        let mut state_rx = self.session.subscribe_state();

        loop {
            tokio::select! {
                _ = token.cancelled() => return self.cancelled(),
                ev = link.events.recv() => match ev {
                    Some(ConnectionEvent::Opened) => self.on_open(),
                    Some(ConnectionEvent::CredentialsUpdated(cred)) => self.persist(&cred).await,
                    Some(ConnectionEvent::Closed { reason }) => return self.on_close(reason).await,
                    None => return self.on_close(CloseReason::Lost("event stream ended".into())).await,
                },
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return self.cancelled();
                    }
                    let now = *state_rx.borrow_and_update();
                    if now == ConnectionState::Disconnected {
                        return self.on_close(CloseReason::Lost("send failure".into())).await;
                    }
                }
            }
        }
    }

    fn on_open(&mut self) {
        if self.session.transition(ConnectionState::Connected).is_none() {
            return;
        }
        self.attempts = 0;
        self.session.touch();
        self.publish(Event::new(EventKind::ConnectionOpened));

        let resumed = self
            .session
            .tasks()
            .iter()
            .filter(|task| scheduler::ensure_running(&self.ctx, &self.session, task))
            .count();
        if resumed > 0 {
            tracing::info!(session = self.session.id(), resumed, "resumed task schedulers");
        }
    }

    async fn persist(&self, cred: &Credential) {
        if let Err(err) = self.ctx.credentials.save(self.session.id(), cred).await {
            tracing::warn!(session = self.session.id(), error = %err, "failed to save credential");
            self.publish(Event::new(EventKind::CredentialSaveFailed).with_reason(err.to_string()));
        }
    }

    async fn on_close(&mut self, reason: CloseReason) -> Phase {
        if let Some(conn) = self.session.set_connection(None) {
            conn.close().await;
        }
        self.publish(Event::new(EventKind::ConnectionClosed).with_reason(reason.to_string()));

        match reason {
            CloseReason::LoggedOut => Phase::Terminated(TerminationCause::LoggedOut),
            CloseReason::Lost(_) => {
                self.session.transition(ConnectionState::Disconnected);
                self.attempts = self.attempts.saturating_add(1);
                let delay = self.ctx.cfg.reconnect.next(self.attempts - 1);
                self.publish(
                    Event::new(EventKind::ReconnectScheduled)
                        .with_delay(delay)
                        .with_attempt(u64::from(self.attempts)),
                );
                Phase::Retry(delay)
            }
        }
    }

    async fn teardown(mut self, cause: TerminationCause) {
        // Cancels every task token and closes the session to new tasks before the
        // task list is read below.
        self.session.request_termination(cause.clone());

        if let Some(reply) = self.pairing.take() {
            let _ = reply.send(Err(Error::Internal(format!("session terminated: {cause}"))));
        }

        self.session.transition(ConnectionState::Terminated);
        if let Some(conn) = self.session.set_connection(None) {
            conn.close().await;
        }

        let tasks = self.session.tasks();
        for task in &tasks {
            task.request_stop();
        }
        for task in &tasks {
            let worker = task.worker.lock().take();
            if let Some(handle) = worker {
                let _ = handle.await;
            }
        }

        self.ctx.registry.detach(&self.session);

        if cause == TerminationCause::LoggedOut {
            if let Err(err) = self.ctx.credentials.remove(self.session.id()).await {
                tracing::warn!(session = self.session.id(), error = %err, "failed to drop revoked credential");
            }
        }

        self.publish(Event::new(EventKind::SessionTerminated).with_reason(cause.to_string()));
    }

    fn publish(&self, ev: Event) {
        self.ctx.publish(ev.with_session(self.session.id()));
    }
}
