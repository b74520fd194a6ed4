//! # Bounded newest-first task log.
//!
//! Two independent bounds apply to a task's log:
//! - the **storage cap**: [`LogRingBuffer::append`] never keeps more than this many entries
//!   (the janitor also re-applies it via [`LogRingBuffer::truncate`]);
//! - the **render cap**: [`LogRingBuffer::render`] never returns more than this many.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Classification of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    /// State transitions, waits, summaries.
    Info,
    /// A message was delivered to the collaborator.
    Success,
    /// A send or the loop itself failed.
    Error,
}

/// One line of a task's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Entry classification.
    pub kind: LogKind,
    /// Headline.
    pub message: String,
    /// Supporting detail (message text, error, totals).
    pub detail: String,
    /// Wall-clock time the entry was created.
    pub at: DateTime<Utc>,
}

impl LogEntry {
    /// Creates an entry stamped with the current time.
    pub fn new(kind: LogKind, message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: detail.into(),
            at: Utc::now(),
        }
    }

    /// Shorthand for [`LogKind::Info`].
    pub fn info(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(LogKind::Info, message, detail)
    }

    /// Shorthand for [`LogKind::Success`].
    pub fn success(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(LogKind::Success, message, detail)
    }

    /// Shorthand for [`LogKind::Error`].
    pub fn error(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(LogKind::Error, message, detail)
    }
}

/// Newest-first ring of [`LogEntry`] bounded by a storage cap.
#[derive(Debug, Clone)]
pub struct LogRingBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogRingBuffer {
    /// Creates an empty buffer holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(256)),
            capacity,
        }
    }

    /// Inserts at the head; drops the oldest entry once the cap is exceeded.
    pub fn append(&mut self, entry: LogEntry) {
        self.entries.push_front(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_back();
        }
    }

    /// Drops the oldest entries beyond `cap`, returning how many were dropped.
    pub fn truncate(&mut self, cap: usize) -> usize {
        let before = self.entries.len();
        self.entries.truncate(cap);
        before - self.entries.len()
    }

    /// Returns at most `limit` entries, newest first.
    pub fn render(&self, limit: usize) -> Vec<LogEntry> {
        self.entries.iter().take(limit).cloned().collect()
    }

    /// Iterates entries newest first.
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing was logged yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Storage cap.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
