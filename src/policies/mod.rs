//! Retry delay policies.
//!
//! Used by the connection supervisor to schedule reconnect attempts:
//! - [`BackoffPolicy`] how the delay evolves across consecutive attempts (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization applied on top, to spread reconnect storms
//!
//! ## Defaults
//! Both reconnect paths default to a **constant** delay (factor 1.0, no jitter):
//! - after a lost connection: [`BackoffPolicy::reconnect`] (10s)
//! - after a failed `connect`: [`BackoffPolicy::connect_retry`] (30s)
//!
//! There is no retry ceiling; only a terminal authorization failure stops retries.

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
