//! # One send attempt.
//!
//! Bounds a single [`Connection::send`] by the configured timeout. An elapsed timeout is
//! reported as [`TransportError::Timeout`], which counts as transport-level.

use std::time::Duration;

use tokio::time;

use crate::error::TransportError;
use crate::transport::{Connection, Recipient};

pub(crate) async fn send_once(
    conn: &dyn Connection,
    to: &Recipient,
    text: &str,
    timeout: Option<Duration>,
) -> Result<(), TransportError> {
    match timeout {
        Some(dur) => match time::timeout(dur, conn.send(to, text)).await {
            Ok(res) => res,
            Err(_elapsed) => Err(TransportError::Timeout(dur)),
        },
        None => conn.send(to, text).await,
    }
}
