use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::user::SessionKey;
use crate::flows::states::SessionState;

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("session backend failure: {0}")]
    Backend(String),
    #[error("session state could not be decoded: {0}")]
    Decode(String),
}

/// Keyed storage for in-progress dialogs. Saving a key replaces whatever it held.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, key: &SessionKey) -> Result<Option<SessionState>, SessionStoreError>;
    async fn save(&self, key: &SessionKey, state: SessionState) -> Result<(), SessionStoreError>;
    async fn remove(&self, key: &SessionKey) -> Result<bool, SessionStoreError>;
    /// Drops sessions idle longer than `idle_timeout`; returns how many were evicted.
    async fn sweep_expired(
        &self,
        idle_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<usize, SessionStoreError>;
}

#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionKey, SessionState>>>,
}

impl InMemorySessionStore {
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<SessionState>, SessionStoreError> {
        Ok(self.sessions.read().await.get(key).cloned())
    }

    async fn save(&self, key: &SessionKey, state: SessionState) -> Result<(), SessionStoreError> {
        self.sessions.write().await.insert(*key, state);
        Ok(())
    }

    async fn remove(&self, key: &SessionKey) -> Result<bool, SessionStoreError> {
        Ok(self.sessions.write().await.remove(key).is_some())
    }

    async fn sweep_expired(
        &self,
        idle_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<usize, SessionStoreError> {
        let cutoff = now - idle_timeout;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, state| !state.is_idle_since(cutoff));
        Ok(before - sessions.len())
    }
}
