//! Persistence collaborators: credentials per session and aggregate counters.
//!
//! Failures here never stop the runtime; callers log them and continue.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::Credential;
use crate::core::PersistedCounters;
use crate::error::StoreError;

/// Durable storage for session credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync + 'static {
    /// Credential saved for `session`, if any.
    async fn load(&self, session: &str) -> Result<Option<Credential>, StoreError>;
    /// Replaces the credential saved for `session`.
    async fn save(&self, session: &str, credential: &Credential) -> Result<(), StoreError>;
    /// Forgets the credential saved for `session`.
    async fn remove(&self, session: &str) -> Result<(), StoreError>;
}

/// Durable storage for aggregate counters.
#[async_trait]
pub trait StatsStore: Send + Sync + 'static {
    /// Last saved counters, if any.
    async fn load(&self) -> Result<Option<PersistedCounters>, StoreError>;
    /// Overwrites the saved counters.
    async fn save(&self, counters: &PersistedCounters) -> Result<(), StoreError>;
}

/// [`CredentialStore`] kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<HashMap<String, Credential>>,
}

impl MemoryCredentialStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if a credential is held for `session`.
    pub fn contains(&self, session: &str) -> bool {
        self.inner.lock().contains_key(session)
    }

    /// Number of stored credentials.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, session: &str) -> Result<Option<Credential>, StoreError> {
        Ok(self.inner.lock().get(session).cloned())
    }

    async fn save(&self, session: &str, credential: &Credential) -> Result<(), StoreError> {
        self.inner
            .lock()
            .insert(session.to_string(), credential.clone());
        Ok(())
    }

    async fn remove(&self, session: &str) -> Result<(), StoreError> {
        self.inner.lock().remove(session);
        Ok(())
    }
}

/// [`StatsStore`] kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryStatsStore {
    inner: Mutex<Option<PersistedCounters>>,
}

impl MemoryStatsStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with counters from a previous run.
    pub fn with_counters(counters: PersistedCounters) -> Self {
        Self {
            inner: Mutex::new(Some(counters)),
        }
    }

    /// Last saved counters.
    pub fn snapshot(&self) -> Option<PersistedCounters> {
        self.inner.lock().clone()
    }
}

#[async_trait]
impl StatsStore for MemoryStatsStore {
    async fn load(&self) -> Result<Option<PersistedCounters>, StoreError> {
        Ok(self.inner.lock().clone())
    }

    async fn save(&self, counters: &PersistedCounters) -> Result<(), StoreError> {
        *self.inner.lock() = Some(counters.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_credential_store_lifecycle() {
        let store = MemoryCredentialStore::new();
        assert_eq!(store.load("s1").await, Ok(None));

        let cred = Credential::new(b"k".to_vec());
        store.save("s1", &cred).await.unwrap();
        assert!(store.contains("s1"));
        assert_eq!(store.load("s1").await, Ok(Some(cred)));

        store.remove("s1").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_stats_store_overwrites() {
        let store = MemoryStatsStore::new();
        assert_eq!(store.load().await, Ok(None));

        let counters = PersistedCounters {
            total_messages_sent: 3,
            ..PersistedCounters::default()
        };
        store.save(&counters).await.unwrap();
        assert_eq!(store.snapshot(), Some(counters));
    }
}
