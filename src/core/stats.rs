//! # Aggregate counters.
//!
//! Lock-free atomics updated by schedulers and the dispatcher. A background flusher saves
//! [`PersistedCounters`] to the [`StatsStore`] on a fixed period and once more at shutdown.
//! Counters loaded at startup are added on top of whatever was counted meanwhile.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::context::Context;
use crate::transport::StatsStore;

/// Counters that survive restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedCounters {
    /// Successful sends.
    pub total_messages_sent: u64,
    /// Failed sends and crashed schedulers.
    pub errors: u64,
    /// Accepted task submissions.
    pub total_tasks: u64,
    /// Successful pairings.
    pub total_sessions: u64,
    /// Schedulers that ended without a stop request.
    pub successful_tasks: u64,
    /// Schedulers that were stopped or crashed.
    pub failed_tasks: u64,
}

/// Result of `aggregate_stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    /// Lifetime counters.
    #[serde(flatten)]
    pub counters: PersistedCounters,
    /// Sessions in the registry.
    pub active_sessions: usize,
    /// Tasks still running across all sessions.
    pub active_tasks: usize,
    /// Time since the dispatcher was built.
    #[serde(with = "secs")]
    pub uptime: Duration,
    /// Wall-clock start of this process' dispatcher.
    pub started_at: DateTime<Utc>,
}

mod secs {
    use serde::Serializer;
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

pub(crate) struct Stats {
    sent: AtomicU64,
    errors: AtomicU64,
    tasks: AtomicU64,
    sessions: AtomicU64,
    successful_tasks: AtomicU64,
    failed_tasks: AtomicU64,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            sent: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            tasks: AtomicU64::new(0),
            sessions: AtomicU64::new(0),
            successful_tasks: AtomicU64::new(0),
            failed_tasks: AtomicU64::new(0),
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

impl Stats {
    pub(crate) fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_task(&self) {
        self.tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_session(&self) {
        self.sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_task_end(&self, stopped: bool) {
        let counter = if stopped {
            &self.failed_tasks
        } else {
            &self.successful_tasks
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds counters from a previous run.
    pub(crate) fn restore(&self, prev: &PersistedCounters) {
        self.sent.fetch_add(prev.total_messages_sent, Ordering::Relaxed);
        self.errors.fetch_add(prev.errors, Ordering::Relaxed);
        self.tasks.fetch_add(prev.total_tasks, Ordering::Relaxed);
        self.sessions.fetch_add(prev.total_sessions, Ordering::Relaxed);
        self.successful_tasks
            .fetch_add(prev.successful_tasks, Ordering::Relaxed);
        self.failed_tasks.fetch_add(prev.failed_tasks, Ordering::Relaxed);
    }

    pub(crate) fn persisted(&self) -> PersistedCounters {
        PersistedCounters {
            total_messages_sent: self.sent.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            total_tasks: self.tasks.load(Ordering::Relaxed),
            total_sessions: self.sessions.load(Ordering::Relaxed),
            successful_tasks: self.successful_tasks.load(Ordering::Relaxed),
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn snapshot(&self, active_sessions: usize, active_tasks: usize) -> CountersSnapshot {
        CountersSnapshot {
            counters: self.persisted(),
            active_sessions,
            active_tasks,
            uptime: self.started.elapsed(),
            started_at: self.started_at,
        }
    }
}

/// Loads previous counters, then saves the current ones every `period` until `token` fires.
pub(crate) fn spawn_flusher(
    ctx: Arc<Context>,
    store: Arc<dyn StatsStore>,
    token: CancellationToken,
) -> JoinHandle<()> {
    let period = ctx.cfg.stats_flush_period.max(Duration::from_secs(1));
    tokio::spawn(async move {
        match store.load().await {
            Ok(Some(prev)) => {
                ctx.stats.restore(&prev);
                tracing::debug!(sent = prev.total_messages_sent, "restored aggregate counters");
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "failed to load aggregate counters"),
        }

        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => flush(&ctx.stats, store.as_ref()).await,
            }
        }
    })
}

pub(crate) async fn flush(stats: &Stats, store: &dyn StatsStore) {
    if let Err(err) = store.save(&stats.persisted()).await {
        tracing::warn!(error = %err, "failed to save aggregate counters");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_adds_on_top() {
        let stats = Stats::default();
        stats.record_sent();
        stats.record_task_end(true);
        stats.restore(&PersistedCounters {
            total_messages_sent: 10,
            failed_tasks: 2,
            ..PersistedCounters::default()
        });

        let p = stats.persisted();
        assert_eq!(p.total_messages_sent, 11);
        assert_eq!(p.failed_tasks, 3);
        assert_eq!(p.successful_tasks, 0);
    }

    #[test]
    fn test_snapshot_serializes_flat() {
        let stats = Stats::default();
        stats.record_session();
        let json = serde_json::to_value(stats.snapshot(1, 0)).unwrap();
        assert_eq!(json["total_sessions"], 1);
        assert_eq!(json["active_sessions"], 1);
        assert!(json["uptime"].is_u64());
    }
}
