//! # Global runtime configuration.
//!
//! Provides [`Config`] centralized settings for the dispatcher, the per-session
//! connection supervisors, the per-task schedulers and the janitor sweep.
//!
//! ## Sentinel values
//! - `send_timeout = 0s` → sends are not bounded by a timeout
//! - `connect_timeout = 0s` → `connect` is not bounded by a timeout
//! - caps and capacities are clamped to a minimum of 1 by their accessors

use std::time::Duration;

use crate::policies::BackoffPolicy;

/// Global configuration for the loopcast runtime.
///
/// All fields are public for flexibility. Prefer the helper accessors to avoid
/// sprinkling sentinel checks (`0`) across the codebase.
#[derive(Clone, Debug)]
pub struct Config {
    /// How long a scheduler sleeps between "waiting for connection" checks.
    ///
    /// A scheduler is woken earlier if its session becomes connected.
    pub poll_interval: Duration,

    /// Pause after a failed send before the same message is retried.
    pub failure_backoff: Duration,

    /// Minimum accepted inter-message delay.
    pub min_delay: Duration,

    /// Upper bound for a single send (`0s` = unbounded).
    ///
    /// An elapsed send is reported as a transport-level timeout.
    pub send_timeout: Duration,

    /// Upper bound for `Connector::connect` (`0s` = unbounded).
    pub connect_timeout: Duration,

    /// Pause between opening a fresh connection and requesting a pairing code.
    pub pairing_settle: Duration,

    /// Delay schedule after a connection is lost.
    pub reconnect: BackoffPolicy,

    /// Delay schedule after `connect` itself failed.
    pub connect_retry: BackoffPolicy,

    /// Sessions without activity for longer than this are evicted by the janitor.
    pub idle_timeout: Duration,

    /// Period of the janitor sweep.
    pub sweep_period: Duration,

    /// Maximum number of log entries stored per task.
    pub log_storage_cap: usize,

    /// Maximum number of log entries returned when rendering a task log.
    pub log_render_cap: usize,

    /// Period of the aggregate-stats flush to the stats store.
    pub stats_flush_period: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,

    /// Maximum time to wait for session teardown on shutdown.
    pub grace: Duration,
}

impl Config {
    /// Returns the send timeout as an `Option` (`None` = unbounded).
    #[inline]
    pub fn send_timeout(&self) -> Option<Duration> {
        Some(self.send_timeout).filter(|d| !d.is_zero())
    }

    /// Returns the connect timeout as an `Option` (`None` = unbounded).
    #[inline]
    pub fn connect_timeout(&self) -> Option<Duration> {
        Some(self.connect_timeout).filter(|d| !d.is_zero())
    }

    /// Minimum delay in whole seconds (what callers submit in).
    #[inline]
    pub fn min_delay_secs(&self) -> u64 {
        self.min_delay.as_secs()
    }

    /// Storage cap clamped to a minimum of 1.
    #[inline]
    pub fn log_storage_cap(&self) -> usize {
        self.log_storage_cap.max(1)
    }

    /// Render cap clamped to a minimum of 1.
    #[inline]
    pub fn log_render_cap(&self) -> usize {
        self.log_render_cap.max(1)
    }

    /// Bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for Config {
    /// Defaults:
    ///
    /// - `poll_interval = 10s`, `failure_backoff = 5s`, `min_delay = 5s`
    /// - `send_timeout = 30s`, `connect_timeout = 60s`, `pairing_settle = 1.5s`
    /// - `reconnect = 10s constant`, `connect_retry = 30s constant`
    /// - `idle_timeout = 24h`, `sweep_period = 1h`
    /// - `log_storage_cap = 200`, `log_render_cap = 100`
    /// - `stats_flush_period = 5min`, `bus_capacity = 1024`, `grace = 30s`
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            failure_backoff: Duration::from_secs(5),
            min_delay: Duration::from_secs(5),
            send_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(60),
            pairing_settle: Duration::from_millis(1500),
            reconnect: BackoffPolicy::reconnect(),
            connect_retry: BackoffPolicy::connect_retry(),
            idle_timeout: Duration::from_secs(24 * 60 * 60),
            sweep_period: Duration::from_secs(60 * 60),
            log_storage_cap: 200,
            log_render_cap: 100,
            stats_flush_period: Duration::from_secs(5 * 60),
            bus_capacity: 1024,
            grace: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_timeouts_mean_unbounded() {
        let cfg = Config {
            send_timeout: Duration::ZERO,
            connect_timeout: Duration::ZERO,
            ..Config::default()
        };
        assert_eq!(cfg.send_timeout(), None);
        assert_eq!(cfg.connect_timeout(), None);
        assert_eq!(Config::default().send_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_caps_are_distinct_and_clamped() {
        let cfg = Config::default();
        assert_eq!(cfg.log_storage_cap(), 200);
        assert_eq!(cfg.log_render_cap(), 100);

        let zero = Config {
            log_storage_cap: 0,
            log_render_cap: 0,
            bus_capacity: 0,
            ..Config::default()
        };
        assert_eq!(zero.log_storage_cap(), 1);
        assert_eq!(zero.log_render_cap(), 1);
        assert_eq!(zero.bus_capacity_clamped(), 1);
    }
}
