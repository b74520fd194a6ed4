//! # Backoff policy for reconnect attempts.
//!
//! The delay before reconnect attempt `n` (0-indexed, reset after every successful open)
//! is `first × factor^n`, clamped to `max`, then jittered. The base is derived from the
//! attempt number alone so jitter never feeds back into later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use loopcast::{BackoffPolicy, JitterPolicy};
//!
//! // Fixed 10s between reconnects, forever.
//! let fixed = BackoffPolicy::reconnect();
//! assert_eq!(fixed.next(0), Duration::from_secs(10));
//! assert_eq!(fixed.next(500), Duration::from_secs(10));
//!
//! // Opt-in exponential growth.
//! let grow = BackoffPolicy {
//!     first: Duration::from_secs(1),
//!     max: Duration::from_secs(60),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//! assert_eq!(grow.next(3), Duration::from_secs(8));
//! assert_eq!(grow.next(10), Duration::from_secs(60));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Reconnect backoff policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Upper bound for any computed delay.
    pub max: Duration,
    /// Multiplicative growth factor (`1.0` = constant).
    pub factor: f64,
    /// Randomization applied to the clamped delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Same as [`BackoffPolicy::reconnect`].
    fn default() -> Self {
        Self::reconnect()
    }
}

impl BackoffPolicy {
    /// Constant delay `d` on every attempt.
    pub const fn constant(d: Duration) -> Self {
        Self {
            first: d,
            max: d,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Delay after a lost connection: constant 10s.
    pub const fn reconnect() -> Self {
        Self::constant(Duration::from_secs(10))
    }

    /// Delay after `connect` itself failed: constant 30s.
    pub const fn connect_retry() -> Self {
        Self::constant(Duration::from_secs(30))
    }

    /// Computes the delay for the given attempt number (0-indexed).
    pub fn next(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_default_is_fixed_ten_seconds() {
        let policy = BackoffPolicy::default();
        for attempt in [0, 1, 7, 1_000, u32::MAX] {
            assert_eq!(policy.next(attempt), Duration::from_secs(10));
        }
    }

    #[test]
    fn test_connect_retry_is_fixed_thirty_seconds() {
        assert_eq!(BackoffPolicy::connect_retry().next(4), Duration::from_secs(30));
    }

    #[test]
    fn test_exponential_growth_clamped() {
        let policy = BackoffPolicy {
            first: Duration::from_millis(500),
            max: Duration::from_secs(5),
            factor: 2.0,
            jitter: JitterPolicy::None,
        };
        assert_eq!(policy.next(0), Duration::from_millis(500));
        assert_eq!(policy.next(1), Duration::from_secs(1));
        assert_eq!(policy.next(2), Duration::from_secs(2));
        assert_eq!(policy.next(4), Duration::from_secs(5));
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_first_above_max_is_clamped() {
        let policy = BackoffPolicy {
            first: Duration::from_secs(20),
            max: Duration::from_secs(10),
            factor: 1.0,
            jitter: JitterPolicy::None,
        };
        assert_eq!(policy.next(0), Duration::from_secs(10));
    }

    #[test]
    fn test_equal_jitter_stays_in_upper_half() {
        let policy = BackoffPolicy {
            jitter: JitterPolicy::Equal,
            ..BackoffPolicy::reconnect()
        };
        for attempt in 0..50 {
            let d = policy.next(attempt);
            assert!(d >= Duration::from_secs(5), "attempt {attempt}: {d:?}");
            assert!(d <= Duration::from_secs(10), "attempt {attempt}: {d:?}");
        }
    }
}
