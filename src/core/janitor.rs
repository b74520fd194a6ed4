//! # Janitor: periodic eviction of idle sessions and log truncation.
//!
//! Each sweep removes idle sessions from the registry in one atomic step and cancels
//! their tokens. Teardown then runs on every evicted session's own supervisor task, so a
//! slow close never delays the sweep or the other sessions.

use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::context::Context;
use super::session::TerminationCause;
use crate::events::{Event, EventKind};

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Identifiers of evicted sessions.
    pub evicted: Vec<String>,
    /// Log entries dropped across all remaining tasks.
    pub truncated_entries: usize,
}

pub(crate) struct Janitor {
    ctx: Arc<Context>,
}

impl Janitor {
    pub(crate) fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Sweeps every `sweep_period` until `token` fires. The first sweep is one period in.
    pub(crate) fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        let period = self.ctx.cfg.sweep_period.max(std::time::Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep(Instant::now());
                    }
                }
            }
        })
    }

    pub(crate) fn sweep(&self, now: Instant) -> SweepReport {
        let cfg = &self.ctx.cfg;
        let evicted = self.ctx.registry.evict_idle(now, cfg.idle_timeout);
        for session in &evicted {
            session.request_termination(TerminationCause::Idle);
            self.ctx
                .publish(Event::new(EventKind::SessionEvicted).with_session(session.id()));
        }

        let cap = cfg.log_storage_cap();
        let truncated_entries: usize = self
            .ctx
            .registry
            .list()
            .iter()
            .flat_map(|s| s.tasks())
            .map(|t| t.truncate_logs(cap))
            .sum();

        self.ctx.publish(
            Event::new(EventKind::SweepCompleted).with_attempt(evicted.len() as u64),
        );
        SweepReport {
            evicted: evicted.iter().map(|s| s.id().to_string()).collect(),
            truncated_entries,
        }
    }
}
