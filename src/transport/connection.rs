//! Connection collaborator traits and the values that cross them.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{TransportError, ValidationError};

/// Kind of address a task sends to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// A single account, addressed by phone number.
    User,
    /// A group the paired account participates in.
    Group,
}

impl TargetKind {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::User => "user",
            TargetKind::Group => "group",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = ValidationError;

    /// Accepts `user` / `group` in any case, surrounding whitespace ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(TargetKind::User),
            "group" => Ok(TargetKind::Group),
            _ => Err(ValidationError::UnknownTargetKind(s.to_string())),
        }
    }
}

/// Where a message goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Recipient {
    /// Phone number or group id, as the collaborator understands it.
    pub id: String,
    /// Address kind.
    pub kind: TargetKind,
}

impl Recipient {
    /// Builds a recipient.
    pub fn new(id: impl Into<String>, kind: TargetKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// Opaque credential blob produced by the collaborator after pairing.
///
/// `Debug` never prints the contents.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Vec<u8>);

impl Credential {
    /// Wraps raw credential bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<{} bytes redacted>)", self.0.len())
    }
}

/// A group visible to the paired account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    /// Identifier usable as a [`TargetKind::Group`] target.
    pub id: String,
    /// Display name.
    pub subject: String,
    /// Member count.
    pub participants: usize,
}

/// Why the collaborator closed a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The credential was revoked on the remote side. Terminal.
    LoggedOut,
    /// Anything else; the supervisor reconnects.
    Lost(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::LoggedOut => f.write_str("logged out"),
            CloseReason::Lost(reason) => write!(f, "lost: {reason}"),
        }
    }
}

/// Lifecycle notifications delivered on [`Link::events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Transport is open and usable for sends.
    Opened,
    /// Transport closed.
    Closed {
        /// Close classification.
        reason: CloseReason,
    },
    /// The collaborator produced new credentials (pairing completed or keys rotated).
    CredentialsUpdated(Credential),
}

/// Result of a successful [`Connector::connect`].
pub struct Link {
    /// Handle used for sends; exclusively owned by one session.
    pub connection: Arc<dyn Connection>,
    /// Lifecycle notifications for this handle. Ends when the handle is gone.
    pub events: mpsc::Receiver<ConnectionEvent>,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

/// Opens connections on behalf of sessions.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Opens a connection for `session`, authenticated with `credential` when present.
    ///
    /// Without a credential the returned handle is unregistered and can only request a
    /// pairing code.
    async fn connect(
        &self,
        session: &str,
        credential: Option<Credential>,
    ) -> Result<Link, TransportError>;
}

/// One live protocol connection.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// True when the handle was opened with a valid credential.
    fn is_registered(&self) -> bool;

    /// Asks the remote side for a pairing code bound to `phone` (digits only).
    async fn request_pairing_code(&self, phone: &str) -> Result<String, TransportError>;

    /// Sends one text message.
    async fn send(&self, to: &Recipient, text: &str) -> Result<(), TransportError>;

    /// Groups the paired account participates in.
    async fn groups(&self) -> Result<Vec<GroupInfo>, TransportError>;

    /// Closes the handle. Idempotent.
    async fn close(&self);
}
