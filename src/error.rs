//! Error types used by the loopcast runtime, its collaborators and its public operations.
//!
//! - [`Error`]: what every public [`Dispatcher`](crate::Dispatcher) operation returns on failure.
//! - [`ValidationError`]: malformed input rejected synchronously (no state created).
//! - [`TransportError`]: failures reported by the connection collaborator.
//! - [`StoreError`]: failures of credential / stats persistence collaborators.
//! - [`RuntimeError`]: failures of the runtime itself (shutdown grace exceeded).
//!
//! Every enum provides `as_label()`, a short stable snake_case label for logs/metrics.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by the loopcast runtime.
///
/// These represent failures in the orchestration system itself,
/// such as a shutdown sequence exceeding its grace period.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some sessions were still tearing down.
    #[error("shutdown timeout {grace:?} exceeded; stuck sessions: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Identifiers of sessions whose supervisor did not finish in time.
        stuck: Vec<String>,
    },

    /// Installing the OS signal handlers failed.
    #[error("signal handler registration failed: {0}")]
    Signal(#[from] std::io::Error),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use loopcast::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Signal(_) => "runtime_signal",
        }
    }
}

/// # Malformed input rejected before any state is created.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The message sequence is empty (or contains only blank lines).
    #[error("message list is empty")]
    EmptyMessages,

    /// Target kind is neither `user` nor `group`.
    #[error("unrecognized target kind {0:?}")]
    UnknownTargetKind(String),

    /// Inter-message delay is below the configured minimum.
    #[error("delay {got}s is below the minimum of {min}s")]
    DelayTooShort {
        /// Minimum accepted delay in seconds.
        min: u64,
        /// Delay that was requested.
        got: u64,
    },

    /// Target address is blank.
    #[error("target is empty")]
    EmptyTarget,

    /// Phone number contains no digits.
    #[error("phone number {0:?} contains no digits")]
    InvalidPhoneNumber(String),
}

impl ValidationError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ValidationError::EmptyMessages => "validation_empty_messages",
            ValidationError::UnknownTargetKind(_) => "validation_target_kind",
            ValidationError::DelayTooShort { .. } => "validation_delay",
            ValidationError::EmptyTarget => "validation_empty_target",
            ValidationError::InvalidPhoneNumber(_) => "validation_phone",
        }
    }
}

/// # Errors reported by the connection collaborator.
///
/// Transport-level failures (see [`TransportError::is_transport_level`]) drive the
/// session to `Disconnected`; other failures are retried on the same message.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The underlying connection is closed.
    #[error("connection closed")]
    Closed,

    /// Socket-level I/O failure.
    #[error("socket error: {0}")]
    Socket(String),

    /// Operation did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Credential was revoked / device logged out.
    #[error("unauthorized: credential revoked")]
    Unauthorized,

    /// The remote side rejected the request (bad recipient, payload, ...).
    #[error("rejected: {0}")]
    Rejected(String),

    /// Anything else the collaborator reports.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TransportError::Closed => "transport_closed",
            TransportError::Socket(_) => "transport_socket",
            TransportError::Timeout(_) => "transport_timeout",
            TransportError::Unauthorized => "transport_unauthorized",
            TransportError::Rejected(_) => "transport_rejected",
            TransportError::Other(_) => "transport_other",
        }
    }

    /// Indicates whether the failure means the connection itself is unusable.
    ///
    /// Free-form [`TransportError::Other`] messages are classified by signature:
    /// anything mentioning a connection, socket, timeout or "not connected".
    ///
    /// # Example
    /// ```
    /// use loopcast::TransportError;
    ///
    /// assert!(TransportError::Closed.is_transport_level());
    /// assert!(TransportError::Other("Socket hang up".into()).is_transport_level());
    /// assert!(!TransportError::Rejected("bad jid".into()).is_transport_level());
    /// ```
    pub fn is_transport_level(&self) -> bool {
        match self {
            TransportError::Closed
            | TransportError::Socket(_)
            | TransportError::Timeout(_)
            | TransportError::Unauthorized => true,
            TransportError::Rejected(_) => false,
            TransportError::Other(msg) => {
                let msg = msg.to_ascii_lowercase();
                ["connection", "socket", "timeout", "timed out", "not connected"]
                    .iter()
                    .any(|sig| msg.contains(sig))
            }
        }
    }

    /// True when the credential is gone and the operator must pair again.
    pub fn is_terminal_auth(&self) -> bool {
        matches!(self, TransportError::Unauthorized)
    }
}

/// # Errors produced by persistence collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("store {op} failed: {reason}")]
pub struct StoreError {
    /// Operation that failed (`load`, `save`, `remove`).
    pub op: &'static str,
    /// Collaborator-provided reason.
    pub reason: String,
}

impl StoreError {
    /// Builds a store error for the given operation.
    pub fn new(op: &'static str, reason: impl Into<String>) -> Self {
        Self {
            op,
            reason: reason.into(),
        }
    }
}

/// # Errors returned by public operations.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Input failed validation; nothing was created.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Unknown session identifier.
    #[error("session {0} not found")]
    SessionNotFound(String),

    /// Unknown task identifier within a known session.
    #[error("task {task} not found in session {session}")]
    TaskNotFound {
        /// Session that was searched.
        session: String,
        /// Task identifier that was not found.
        task: String,
    },

    /// The owner has no live session; pairing is required first.
    #[error("no active session for owner {0}")]
    NoActiveSession(String),

    /// Connection collaborator failure surfaced to the caller.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// Credential was revoked; the operator must pair again.
    #[error("credential revoked; pair again")]
    TerminalAuth,

    /// Unexpected internal fault.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use loopcast::{Error, ValidationError};
    ///
    /// let err = Error::from(ValidationError::EmptyMessages);
    /// assert_eq!(err.as_label(), "validation");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::SessionNotFound(_) => "session_not_found",
            Error::TaskNotFound { .. } => "task_not_found",
            Error::NoActiveSession(_) => "no_active_session",
            Error::Transport(_) => "transport",
            Error::TerminalAuth => "terminal_auth",
            Error::Internal(_) => "internal",
        }
    }

    /// True for "unknown session" and "unknown task".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::SessionNotFound(_) | Error::TaskNotFound { .. })
    }
}
