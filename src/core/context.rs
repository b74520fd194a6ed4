//! Shared runtime state handed to supervisors, schedulers and the janitor.

use std::sync::Arc;

use super::registry::SessionRegistry;
use super::stats::Stats;
use crate::config::Config;
use crate::events::{Bus, Event};
use crate::transport::{Connector, CredentialStore};

pub(crate) struct Context {
    pub(crate) cfg: Config,
    pub(crate) bus: Bus,
    pub(crate) stats: Stats,
    pub(crate) registry: SessionRegistry,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) credentials: Arc<dyn CredentialStore>,
}

impl Context {
    #[inline]
    pub(crate) fn publish(&self, ev: Event) {
        self.bus.publish(ev);
    }
}
