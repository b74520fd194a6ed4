//! # Send jobs: request validation, runtime state, and per-task log.
//!
//! - [`TaskRequest`] what an operator submits; validated synchronously.
//! - [`Task`] a live, cyclic send job owned by exactly one session.
//! - [`LogRingBuffer`] the bounded, newest-first log each task keeps.

mod log;
mod spec;
mod task;

pub use log::{LogEntry, LogKind, LogRingBuffer};
pub use spec::TaskRequest;
pub use task::{Task, TaskLogView, TaskSnapshot, TaskState};

pub(crate) use spec::TaskPlan;
