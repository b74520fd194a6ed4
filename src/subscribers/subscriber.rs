//! # Event subscriber trait.
//!
//! Each subscriber gets a dedicated worker task, a bounded queue
//! (capacity via [`Subscribe::queue_capacity`]) and panic isolation.
//! A slow subscriber only affects its own queue; overflow drops the event
//! for that subscriber alone.
//!
//! ## Example
//! ```rust
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use async_trait::async_trait;
//! use loopcast::{Event, EventKind, Subscribe};
//!
//! #[derive(Default)]
//! struct SendCounter(AtomicU64);
//!
//! #[async_trait]
//! impl Subscribe for SendCounter {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::MessageSent {
//!             self.0.fetch_add(1, Ordering::Relaxed);
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "send-counter" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Event subscriber for runtime observability.
///
/// ### Implementation requirements
/// - Use async I/O; avoid blocking the executor.
/// - Handle errors internally; panics are caught and logged.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes a single event, in FIFO order per subscriber.
    async fn on_event(&self, event: &Event);

    /// Name used in diagnostics. Defaults to the type name.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred queue capacity (clamped to a minimum of 1). Default: 1024.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
