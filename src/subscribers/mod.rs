//! # Event subscribers.
//!
//! [`Subscribe`] is the extension point for observing runtime events
//! (logging, metrics, audit, dashboards). [`SubscriberSet`] fans each event
//! out to every subscriber through its own bounded queue and worker task.
//!
//! ```text
//! Bus ──► Dispatcher listener ──► SubscriberSet::emit(&Event)
//!                                   ├──► [queue] ─► worker ─► LogWriter::on_event
//!                                   └──► [queue] ─► worker ─► custom::on_event
//! ```

mod log;
mod set;
mod subscriber;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub(crate) use set::panic_message;
pub use subscriber::Subscribe;
