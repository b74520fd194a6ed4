//! # Collaborator seams.
//!
//! The runtime never speaks the chat protocol itself. It drives a [`Connector`] that opens
//! one [`Connection`] per session and reports lifecycle changes as [`ConnectionEvent`]s.
//! Credentials and aggregate counters are persisted through [`CredentialStore`] and
//! [`StatsStore`].
//!
//! ```text
//!   ConnectionSupervisor ──connect(session, cred)──► Connector
//!            ▲                                          │
//!            │  Link { connection, events }             │
//!            └──────────────────────────────────────────┘
//!   TaskScheduler ──send(recipient, text)──► Connection
//! ```
//!
//! [`LoopbackConnector`], [`MemoryCredentialStore`] and [`MemoryStatsStore`] are in-memory
//! implementations for demos and tests.

mod connection;
mod loopback;
mod store;

pub use connection::{
    CloseReason, Connection, ConnectionEvent, Connector, Credential, GroupInfo, Link, Recipient,
    TargetKind,
};
pub use loopback::{LoopbackConnector, SentMessage};
pub use store::{CredentialStore, MemoryCredentialStore, MemoryStatsStore, StatsStore};
