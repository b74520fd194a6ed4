//! # LoopbackConnector: a scriptable in-process collaborator.
//!
//! Every session gets a "peer" record inside a shared hub. Tests and demos drive the peer
//! from the outside (complete pairing, drop the connection, inject failures) and inspect
//! what was sent.
//!
//! ```text
//!   LoopbackConnector::pair(sid)        ──► CredentialsUpdated + Opened
//!   LoopbackConnector::drop_link(sid,r) ──► Closed { r }, old handle dead
//!   LoopbackConnector::fail_next_send   ──► next Connection::send returns the error
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{
    CloseReason, Connection, ConnectionEvent, Connector, Credential, GroupInfo, Link, Recipient,
};
use crate::error::TransportError;

const EVENT_QUEUE: usize = 64;

/// One message accepted by a loopback connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Recipient as passed to `send`.
    pub to: Recipient,
    /// Final text (prefix already applied).
    pub text: String,
    /// Runtime clock at acceptance.
    pub at: Instant,
}

#[derive(Default)]
struct Peer {
    events: Option<mpsc::Sender<ConnectionEvent>>,
    generation: u64,
    registered: bool,
    connects: u32,
    closes: u32,
    sent: Vec<SentMessage>,
    send_failures: VecDeque<TransportError>,
    connect_failures: VecDeque<TransportError>,
    pairing_failure: Option<TransportError>,
    pairing_code: Option<String>,
    groups: Vec<GroupInfo>,
    send_latency: Duration,
}

impl Peer {
    fn emit(&self, ev: ConnectionEvent) -> bool {
        self.events
            .as_ref()
            .is_some_and(|tx| tx.try_send(ev).is_ok())
    }
}

type Hub = Arc<Mutex<HashMap<String, Peer>>>;

/// In-memory [`Connector`] with scripting hooks.
#[derive(Clone)]
pub struct LoopbackConnector {
    hub: Hub,
    auto_open: bool,
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackConnector {
    /// Connector that reports `Opened` right away for connects carrying a credential.
    pub fn new() -> Self {
        Self {
            hub: Arc::new(Mutex::new(HashMap::new())),
            auto_open: true,
        }
    }

    /// Controls whether credentialed connects report `Opened` on their own.
    ///
    /// With `false`, call [`LoopbackConnector::open`] to bring a link up.
    pub fn with_auto_open(mut self, auto_open: bool) -> Self {
        self.auto_open = auto_open;
        self
    }

    fn with_peer<R>(&self, session: &str, f: impl FnOnce(&mut Peer) -> R) -> R {
        let mut hub = self.hub.lock();
        f(hub.entry(session.to_string()).or_default())
    }

    /// Completes pairing as if the operator entered the code on their phone.
    ///
    /// Returns `false` if the session has no live link.
    pub fn pair(&self, session: &str) -> bool {
        self.with_peer(session, |peer| {
            peer.registered = true;
            let cred = Credential::new(format!("loopback:{session}").into_bytes());
            peer.emit(ConnectionEvent::CredentialsUpdated(cred)) && peer.emit(ConnectionEvent::Opened)
        })
    }

    /// Reports the current link as open.
    pub fn open(&self, session: &str) -> bool {
        self.with_peer(session, |peer| peer.emit(ConnectionEvent::Opened))
    }

    /// Kills the current link and reports it closed with `reason`.
    ///
    /// Sends on the dead handle fail with [`TransportError::Closed`].
    pub fn drop_link(&self, session: &str, reason: CloseReason) -> bool {
        self.with_peer(session, |peer| {
            peer.generation += 1;
            if reason == CloseReason::LoggedOut {
                peer.registered = false;
            }
            let delivered = peer.emit(ConnectionEvent::Closed { reason });
            peer.events = None;
            delivered
        })
    }

    /// The next `send` on this session fails with `err`.
    pub fn fail_next_send(&self, session: &str, err: TransportError) {
        self.with_peer(session, |peer| peer.send_failures.push_back(err));
    }

    /// The next `connect` for this session fails with `err`.
    pub fn fail_next_connect(&self, session: &str, err: TransportError) {
        self.with_peer(session, |peer| peer.connect_failures.push_back(err));
    }

    /// Every pairing-code request for this session fails with `err`.
    pub fn fail_pairing(&self, session: &str, err: TransportError) {
        self.with_peer(session, |peer| peer.pairing_failure = Some(err));
    }

    /// Groups reported by `Connection::groups`.
    pub fn set_groups(&self, session: &str, groups: Vec<GroupInfo>) {
        self.with_peer(session, |peer| peer.groups = groups);
    }

    /// Makes every send take `latency` before it resolves.
    pub fn set_send_latency(&self, session: &str, latency: Duration) {
        self.with_peer(session, |peer| peer.send_latency = latency);
    }

    /// Messages accepted so far, oldest first.
    pub fn sent(&self, session: &str) -> Vec<SentMessage> {
        self.with_peer(session, |peer| peer.sent.clone())
    }

    /// Texts accepted so far, oldest first.
    pub fn sent_texts(&self, session: &str) -> Vec<String> {
        self.with_peer(session, |peer| peer.sent.iter().map(|m| m.text.clone()).collect())
    }

    /// Number of successful `connect` calls.
    pub fn connects(&self, session: &str) -> u32 {
        self.with_peer(session, |peer| peer.connects)
    }

    /// Number of handles closed by the runtime.
    pub fn closes(&self, session: &str) -> u32 {
        self.with_peer(session, |peer| peer.closes)
    }

    /// Last pairing code issued.
    pub fn pairing_code(&self, session: &str) -> Option<String> {
        self.with_peer(session, |peer| peer.pairing_code.clone())
    }
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(
        &self,
        session: &str,
        credential: Option<Credential>,
    ) -> Result<Link, TransportError> {
        let auto_open = self.auto_open;
        self.with_peer(session, |peer| {
            if let Some(err) = peer.connect_failures.pop_front() {
                return Err(err);
            }

            peer.connects += 1;
            peer.generation += 1;
            peer.registered = credential.is_some();

            let (tx, rx) = mpsc::channel(EVENT_QUEUE);
            peer.events = Some(tx);
            if peer.registered && auto_open {
                peer.emit(ConnectionEvent::Opened);
            }

            let connection = LoopbackConnection {
                hub: Arc::clone(&self.hub),
                session: session.to_string(),
                generation: peer.generation,
                closed: AtomicBool::new(false),
            };
            Ok(Link {
                connection: Arc::new(connection),
                events: rx,
            })
        })
    }
}

struct LoopbackConnection {
    hub: Hub,
    session: String,
    generation: u64,
    closed: AtomicBool,
}

impl LoopbackConnection {
    fn with_live_peer<R>(
        &self,
        f: impl FnOnce(&mut Peer) -> Result<R, TransportError>,
    ) -> Result<R, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut hub = self.hub.lock();
        match hub.get_mut(&self.session) {
            Some(peer) if peer.generation == self.generation => f(peer),
            _ => Err(TransportError::Closed),
        }
    }
}

#[async_trait]
impl Connection for LoopbackConnection {
    fn is_registered(&self) -> bool {
        self.hub
            .lock()
            .get(&self.session)
            .is_some_and(|peer| peer.registered)
    }

    async fn request_pairing_code(&self, phone: &str) -> Result<String, TransportError> {
        self.with_live_peer(|peer| {
            if let Some(err) = peer.pairing_failure.clone() {
                return Err(err);
            }
            if phone.is_empty() {
                return Err(TransportError::Rejected("phone number required".into()));
            }
            let mut rng = rand::rng();
            let code = format!(
                "{:04}-{:04}",
                rng.random_range(0..10_000),
                rng.random_range(0..10_000)
            );
            peer.pairing_code = Some(code.clone());
            Ok(code)
        })
    }

    async fn send(&self, to: &Recipient, text: &str) -> Result<(), TransportError> {
        let latency = self.with_live_peer(|peer| Ok(peer.send_latency))?;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        self.with_live_peer(|peer| {
            if !peer.registered {
                return Err(TransportError::Other("not connected".into()));
            }
            if let Some(err) = peer.send_failures.pop_front() {
                return Err(err);
            }
            peer.sent.push(SentMessage {
                to: to.clone(),
                text: text.to_string(),
                at: Instant::now(),
            });
            Ok(())
        })
    }

    async fn groups(&self) -> Result<Vec<GroupInfo>, TransportError> {
        self.with_live_peer(|peer| Ok(peer.groups.clone()))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let mut hub = self.hub.lock();
            if let Some(peer) = hub.get_mut(&self.session) {
                peer.closes += 1;
            }
        }
    }
}
