//! Session Storage Trait
//!
//! The `SessionStorage` abstraction the transports and lifecycle handlers share. Sessions are
//! ephemeral bookkeeping: an id, activity timestamps, the initialized flag, the negotiated
//! client descriptor and a free-form key/value bag.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Server-side record of one client session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Unique session identifier (UUID v7 for temporal ordering)
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Set once by a successful `initialize` bound to this session; never cleared
    pub is_initialized: bool,
    /// Negotiated client descriptor (`clientInfo` of the initialize call)
    pub client_info: Option<Value>,
    /// Handler-attached state
    pub data: HashMap<String, Value>,
}

impl Default for SessionInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionInfo {
    pub fn new() -> Self {
        Self::with_id(Uuid::now_v7().to_string())
    }

    /// Create session with specific ID (for testing)
    pub fn with_id(session_id: String) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            created_at: now,
            last_activity: now,
            is_initialized: false,
            client_info: None,
            data: HashMap::new(),
        }
    }

    /// Update last activity timestamp
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Time since last activity
    pub fn idle_for(&self) -> Duration {
        (Utc::now() - self.last_activity)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Inactivity strictly longer than `ttl`
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.idle_for() > ttl
    }
}

/// Session storage errors
#[derive(Debug, thiserror::Error)]
pub enum SessionStorageError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Maximum sessions limit reached: {0}")]
    MaxSessionsReached(usize),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Generic(String),
}

/// Pluggable session backend
#[async_trait]
pub trait SessionStorage: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn backend_name(&self) -> &'static str;

    /// Allocate a new session with a fresh unique id
    async fn create_session(&self) -> Result<SessionInfo, Self::Error>;

    /// Look up a session; a hit refreshes its last activity
    async fn get_session(&self, session_id: &str) -> Result<Option<SessionInfo>, Self::Error>;

    /// Remove a session; deleting an unknown id is not an error
    async fn delete_session(&self, session_id: &str) -> Result<bool, Self::Error>;

    /// Flip the initialized flag to true and record the client descriptor
    async fn mark_initialized(&self, session_id: &str, client_info: Value)
    -> Result<(), Self::Error>;

    async fn set_session_data(
        &self,
        session_id: &str,
        key: &str,
        value: Value,
    ) -> Result<(), Self::Error>;

    async fn get_session_data(
        &self,
        session_id: &str,
        key: &str,
    ) -> Result<Option<Value>, Self::Error>;

    async fn remove_session_data(
        &self,
        session_id: &str,
        key: &str,
    ) -> Result<Option<Value>, Self::Error>;

    async fn list_session_ids(&self) -> Result<Vec<String>, Self::Error>;

    /// Delete every session idle for longer than `ttl`; returns the removed ids
    async fn expire_sessions(&self, ttl: Duration) -> Result<Vec<String>, Self::Error>;

    async fn session_count(&self) -> Result<usize, Self::Error>;
}

/// Type-erased storage shared by the transports and handlers
pub type BoxedSessionStorage = dyn SessionStorage<Error = SessionStorageError>;
