//! # loopcast
//!
//! **Loopcast** multiplexes many operator-owned chat connections ("sessions"), each hosting
//! any number of cyclic send jobs ("tasks"). It detects and recovers from disconnects,
//! resumes interrupted tasks exactly where they stopped, isolates failures per task and
//! per session, and reclaims idle sessions.
//!
//! The wire protocol is not part of this crate: it is reached through the [`Connector`] /
//! [`Connection`] traits. [`LoopbackConnector`] is an in-process implementation for demos
//! and tests.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   operator calls (initiate_pairing, submit_task, stop_*, query_*)
//!                                 │
//! ┌───────────────────────────────▼───────────────────────────────────┐
//! │  Dispatcher                                                       │
//! │  - SessionRegistry (owner → session, atomic create/remove/evict)  │
//! │  - Bus (broadcast events) ──► listener ──► SubscriberSet          │
//! │  - Janitor (hourly idle sweep) · Stats (periodic flush)           │
//! └──────┬──────────────────────────────────┬─────────────────────────┘
//!        ▼                                  ▼
//!  ┌────────────────────┐            ┌────────────────────┐
//!  │ConnectionSupervisor│  ...       │ConnectionSupervisor│   one per session
//!  │ connect / pair /   │            │                    │
//!  │ reconnect / reap   │            │                    │
//!  └───┬───────────┬────┘            └─────────┬──────────┘
//!      ▼           ▼                           ▼
//!  TaskScheduler TaskScheduler            TaskScheduler          one per task
//!  (send, wait while disconnected, sleep delay, repeat)
//! ```
//!
//! ### Session lifecycle
//! ```text
//! Initializing ──► AwaitingPairing ──► Connected ◄──► Disconnected ──► Initializing ...
//!      └──────────────── (credential present) ──┘
//! explicit stop · idle 24h · credential revoked · shutdown ──► Terminated
//! ```
//!
//! ### Task loop
//! ```text
//! loop {
//!   ├─► stop requested?            ─► exit (log "Task stopped")
//!   ├─► session not connected?     ─► wait (poll 10s, woken on Connected)
//!   ├─► send(messages[sent % len])
//!   │     ├─ Ok                    ─► sent += 1
//!   │     ├─ Err transport-level   ─► mark Disconnected, backoff 5s, retry same message
//!   │     └─ Err other             ─► backoff 5s
//!   └─► sleep(delay)
//! }
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                          |
//! |-------------------|---------------------------------------------------------------|---------------------------------------------|
//! | **Dispatch**      | Pair operators, submit and stop tasks, query status.          | [`Dispatcher`], [`DispatcherBuilder`]       |
//! | **Tasks**         | Validated cyclic send jobs with bounded logs.                 | [`TaskRequest`], [`TaskSnapshot`]           |
//! | **Collaborators** | Connection and persistence seams.                             | [`Connector`], [`CredentialStore`]          |
//! | **Subscriber API**| Hook into lifecycle events (logging, metrics, audit).         | [`Subscribe`], [`LogWriter`]                |
//! | **Policies**      | Reconnect / connect-retry delay schedules.                    | [`BackoffPolicy`], [`JitterPolicy`]         |
//! | **Errors**        | Typed errors with stable labels.                              | [`Error`], [`TransportError`]               |
//! | **Configuration** | Centralized runtime settings.                                 | [`Config`]                                  |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use loopcast::{Config, DispatcherBuilder, LogWriter, LoopbackConnector, Subscribe, TaskRequest};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connector = LoopbackConnector::new();
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
//!     let dispatcher = DispatcherBuilder::new(Config::default(), Arc::new(connector.clone()))
//!         .with_subscribers(subs)
//!         .build();
//!
//!     let pairing = dispatcher.initiate_pairing("10.0.0.7", "+91 90000 00000").await?;
//!     connector.pair(&pairing.session_id);
//!
//!     let req = TaskRequest::new("9190000000", "user", ["a", "b"], 5).with_prefix("Hi");
//!     let task_id = dispatcher.submit_task("10.0.0.7", req).await?;
//!     println!("started {task_id}");
//!
//!     dispatcher.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod core;
mod error;
mod events;
mod policies;
mod subscribers;
mod tasks;
mod transport;

// ---- Public re-exports ----

pub use config::Config;
pub use core::{
    ConnectionState, CountersSnapshot, Dispatcher, DispatcherBuilder, Pairing, PersistedCounters,
    SessionSnapshot, SessionSummary, SweepReport,
};
pub use error::{Error, RuntimeError, StoreError, TransportError, ValidationError};
pub use events::{Bus, Event, EventKind};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use tasks::{LogEntry, LogKind, LogRingBuffer, TaskLogView, TaskRequest, TaskSnapshot, TaskState};
pub use transport::{
    CloseReason, Connection, ConnectionEvent, Connector, Credential, CredentialStore, GroupInfo,
    Link, LoopbackConnector, MemoryCredentialStore, MemoryStatsStore, Recipient, SentMessage,
    StatsStore, TargetKind,
};
