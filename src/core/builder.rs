use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::context::Context;
use super::dispatcher::Dispatcher;
use super::janitor::Janitor;
use super::registry::SessionRegistry;
use super::stats::{self, Stats};
use crate::config::Config;
use crate::events::Bus;
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::transport::{
    Connector, CredentialStore, MemoryCredentialStore, MemoryStatsStore, StatsStore,
};

/// Builder for a [`Dispatcher`] and its collaborators.
///
/// Stores default to the in-memory implementations.
pub struct DispatcherBuilder {
    cfg: Config,
    connector: Arc<dyn Connector>,
    credentials: Option<Arc<dyn CredentialStore>>,
    stats_store: Option<Arc<dyn StatsStore>>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl DispatcherBuilder {
    /// Creates a builder with the given configuration and connection collaborator.
    pub fn new(cfg: Config, connector: Arc<dyn Connector>) -> Self {
        Self {
            cfg,
            connector,
            credentials: None,
            stats_store: None,
            subscribers: Vec::new(),
        }
    }

    /// Sets where session credentials are persisted.
    pub fn with_credentials(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    /// Sets where aggregate counters are persisted.
    pub fn with_stats_store(mut self, store: Arc<dyn StatsStore>) -> Self {
        self.stats_store = Some(store);
        self
    }

    /// Sets event subscribers.
    ///
    /// Subscribers receive runtime events through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the dispatcher and starts its background work:
    /// - subscriber listener (bus → subscriber set)
    /// - janitor sweep
    /// - stats restore and periodic flush
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Arc<Dispatcher> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let runtime_token = CancellationToken::new();
        let listener_token = CancellationToken::new();

        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(MemoryCredentialStore::new()));
        let stats_store = self
            .stats_store
            .unwrap_or_else(|| Arc::new(MemoryStatsStore::new()));

        let subs = Arc::new(SubscriberSet::new(self.subscribers));
        let listener = Dispatcher::spawn_listener(&bus, Arc::clone(&subs), listener_token.clone());

        let ctx = Arc::new(Context {
            cfg: self.cfg,
            bus,
            stats: Stats::default(),
            registry: SessionRegistry::new(runtime_token.clone()),
            connector: self.connector,
            credentials,
        });

        let background = vec![
            Janitor::new(Arc::clone(&ctx)).spawn(runtime_token.child_token()),
            stats::spawn_flusher(
                Arc::clone(&ctx),
                Arc::clone(&stats_store),
                runtime_token.child_token(),
            ),
        ];

        Arc::new(Dispatcher::new_internal(
            ctx,
            runtime_token,
            stats_store,
            subs,
            (listener_token, listener),
            background,
        ))
    }
}
