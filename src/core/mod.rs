//! Runtime core: sessions, connection supervision, task scheduling and maintenance.
//!
//! The public entry points are [`Dispatcher`] and [`DispatcherBuilder`]; everything else
//! here is plumbing they own.
//!
//! Internal modules:
//! - [`registry`]: owner → session index with atomic create/remove/evict;
//! - [`session`]: per-session state, connection handle and tasks;
//! - [`connection`]: per-session supervisor FSM (connect, pair, reconnect, teardown);
//! - [`scheduler`]: per-task cyclic send loop with panic isolation;
//! - [`runner`]: one send bounded by a timeout;
//! - [`janitor`]: idle eviction and log truncation;
//! - [`stats`]: aggregate counters and their periodic flush;
//! - [`shutdown`]: OS signal handling.

mod builder;
mod connection;
mod context;
mod dispatcher;
mod janitor;
mod registry;
mod runner;
mod scheduler;
mod session;
mod shutdown;
mod stats;

pub use builder::DispatcherBuilder;
pub use dispatcher::{Dispatcher, Pairing};
pub use janitor::SweepReport;
pub use session::{ConnectionState, SessionSnapshot, SessionSummary};
pub use stats::{CountersSnapshot, PersistedCounters};
