//! In-Memory Session Storage Implementation
//!
//! Sessions live in an `Arc<RwLock<HashMap>>` of per-session mutexes. Lookups and updates
//! of one session hold the map's read lock plus that session's own mutex, so concurrent
//! requests only contend when they touch the same session. The write lock is reserved for
//! inserting and removing entries; the expiry sweep enumerates under a read lock and then
//! takes a short write lock per expired id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{SessionInfo, SessionStorage, SessionStorageError};

/// Configuration for in-memory session storage
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    /// Maximum sessions to keep (for memory management)
    pub max_sessions: usize,
    /// When set, lookups treat sessions idle for longer than this as gone
    pub ttl: Option<Duration>,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10_000,
            ttl: None,
        }
    }
}

type SessionEntry = Arc<Mutex<SessionInfo>>;

/// In-memory session storage
#[derive(Debug, Clone)]
pub struct InMemorySessionStorage {
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
    config: InMemoryConfig,
}

impl Default for InMemorySessionStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySessionStorage {
    /// Create new in-memory session storage with default configuration
    pub fn new() -> Self {
        Self::with_config(InMemoryConfig::default())
    }

    pub fn with_config(config: InMemoryConfig) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Storage whose lookups honour `ttl` between sweeps
    pub fn with_ttl(ttl: Duration) -> Self {
        Self::with_config(InMemoryConfig {
            ttl: Some(ttl),
            ..InMemoryConfig::default()
        })
    }

    fn expired(&self, session: &SessionInfo) -> bool {
        self.config
            .ttl
            .is_some_and(|ttl| session.is_expired(ttl))
    }

    /// Run `f` on a live session under the shared map lock
    async fn with_live_session<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut SessionInfo) -> T,
    ) -> Result<T, SessionStorageError> {
        {
            let sessions = self.sessions.read().await;
            let Some(entry) = sessions.get(session_id) else {
                return Err(SessionStorageError::SessionNotFound(session_id.to_string()));
            };
            let mut session = entry.lock();
            if !self.expired(&session) {
                return Ok(f(&mut *session));
            }
        }

        self.remove_if_expired(session_id).await;
        Err(SessionStorageError::SessionNotFound(session_id.to_string()))
    }

    async fn remove_if_expired(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        // Another request may have touched it between the two locks
        let still_expired = sessions
            .get(session_id)
            .is_some_and(|entry| self.expired(&entry.lock()));
        if still_expired {
            sessions.remove(session_id);
            debug!(session_id = %session_id, "Dropped expired session on access");
        }
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    type Error = SessionStorageError;

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }

    async fn create_session(&self) -> Result<SessionInfo, Self::Error> {
        let mut sessions = self.sessions.write().await;

        if sessions.len() >= self.config.max_sessions {
            return Err(SessionStorageError::MaxSessionsReached(
                self.config.max_sessions,
            ));
        }

        let session = SessionInfo::new();
        sessions.insert(
            session.session_id.clone(),
            Arc::new(Mutex::new(session.clone())),
        );

        info!(session_id = %session.session_id, "Session created");
        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionInfo>, Self::Error> {
        match self
            .with_live_session(session_id, |session| {
                session.touch();
                session.clone()
            })
            .await
        {
            Ok(session) => Ok(Some(session)),
            Err(SessionStorageError::SessionNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool, Self::Error> {
        let removed = self.sessions.write().await.remove(session_id).is_some();
        if removed {
            info!(session_id = %session_id, "Session deleted");
        }
        Ok(removed)
    }

    async fn mark_initialized(
        &self,
        session_id: &str,
        client_info: Value,
    ) -> Result<(), Self::Error> {
        self.with_live_session(session_id, |session| {
            session.is_initialized = true;
            session.client_info = Some(client_info);
            session.touch();
        })
        .await
    }

    async fn set_session_data(
        &self,
        session_id: &str,
        key: &str,
        value: Value,
    ) -> Result<(), Self::Error> {
        self.with_live_session(session_id, |session| {
            session.data.insert(key.to_string(), value);
            session.touch();
        })
        .await
    }

    async fn get_session_data(
        &self,
        session_id: &str,
        key: &str,
    ) -> Result<Option<Value>, Self::Error> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(session_id)
            .map(|entry| entry.lock())
            .filter(|session| !self.expired(session))
            .ok_or_else(|| SessionStorageError::SessionNotFound(session_id.to_string()))?;
        Ok(session.data.get(key).cloned())
    }

    async fn remove_session_data(
        &self,
        session_id: &str,
        key: &str,
    ) -> Result<Option<Value>, Self::Error> {
        self.with_live_session(session_id, |session| {
            let removed = session.data.remove(key);
            session.touch();
            removed
        })
        .await
    }

    async fn list_session_ids(&self) -> Result<Vec<String>, Self::Error> {
        let sessions = self.sessions.read().await;
        Ok(sessions.keys().cloned().collect())
    }

    async fn expire_sessions(&self, ttl: Duration) -> Result<Vec<String>, Self::Error> {
        let candidates: Vec<String> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .filter(|(_, entry)| entry.lock().is_expired(ttl))
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut expired = Vec::with_capacity(candidates.len());
        for session_id in candidates {
            let mut sessions = self.sessions.write().await;
            // Re-check: the session may have been touched since the scan
            if sessions
                .get(&session_id)
                .is_some_and(|entry| entry.lock().is_expired(ttl))
            {
                sessions.remove(&session_id);
                expired.push(session_id);
            }
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "Expired sessions removed");
        }
        Ok(expired)
    }

    async fn session_count(&self) -> Result<usize, Self::Error> {
        Ok(self.sessions.read().await.len())
    }
}
