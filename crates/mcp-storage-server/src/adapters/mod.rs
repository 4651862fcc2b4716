//! Database adapters
//!
//! Each adapter owns one sqlx pool shared by every tool call. Only `SELECT` and `WITH`
//! statements are ever executed, and every call can be aborted through its
//! cancellation token.

pub mod mysql;
pub mod postgres;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use mysql::MySqlAdapter;
pub use postgres::PostgresAdapter;

/// Adapter error types
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("only SELECT queries are allowed")]
    NotSelect,

    #[error("failed to connect {adapter} adapter: {source}")]
    Connection {
        adapter: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("{0} adapter is not connected")]
    NotConnected(&'static str),

    #[error("query execution failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("request cancelled")]
    Cancelled,

    #[error("adapter {0} already registered")]
    AlreadyRegistered(String),

    #[error("failed to close adapters: {0}")]
    Close(String),
}

impl From<AdapterError> for mcp_storage_protocol::McpError {
    fn from(error: AdapterError) -> Self {
        match error {
            AdapterError::Cancelled => Self::Cancelled,
            other => Self::ToolExecutionError(other.to_string()),
        }
    }
}

/// A schema (PostgreSQL) or database (MySQL) name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
}

/// Column names plus rows of JSON values, in column order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Pool settings shared by both adapters
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// Connection timeout
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300), // 5 minutes
        }
    }
}

/// Read-only access to one database server
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Registry key, also the tool-name prefix
    fn name(&self) -> &'static str;

    /// True when a connection string was configured
    fn is_enabled(&self) -> bool;

    /// Open the pool and verify connectivity
    async fn connect(&self) -> Result<(), AdapterError>;

    async fn close(&self) -> Result<(), AdapterError>;

    async fn list_schemas(&self, cancel: &CancellationToken) -> Result<Vec<Schema>, AdapterError>;

    /// DDL statements describing `schema`, separated by blank lines
    async fn get_schema_ddl(
        &self,
        cancel: &CancellationToken,
        schema: &str,
    ) -> Result<String, AdapterError>;

    /// Run a read-only query; anything but `SELECT`/`WITH` is rejected before any I/O
    async fn execute_select(
        &self,
        cancel: &CancellationToken,
        query: &str,
    ) -> Result<QueryResult, AdapterError>;
}

/// Reject anything whose leading keyword is not `select` or `with`
pub fn ensure_select(query: &str) -> Result<&str, AdapterError> {
    let trimmed = query.trim();
    let lowered = trimmed.to_lowercase();
    if lowered.starts_with("select") || lowered.starts_with("with") {
        Ok(trimmed)
    } else {
        Err(AdapterError::NotSelect)
    }
}

/// Race `operation` against `cancel`; an already cancelled token always wins
pub(crate) async fn cancellable<T, F>(
    cancel: &CancellationToken,
    operation: F,
) -> Result<T, AdapterError>
where
    F: Future<Output = Result<T, AdapterError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AdapterError::Cancelled),
        result = operation => result,
    }
}

/// Hide the password part of a connection URL for logging
pub(crate) fn mask_db_url(url: &str) -> String {
    let Some(at_pos) = url.rfind('@') else {
        return url.to_string();
    };
    let (prefix, suffix) = url.split_at(at_pos);
    let scheme_end = prefix.find("://").map(|pos| pos + 3).unwrap_or(0);
    match prefix[scheme_end..].find(':') {
        Some(colon_pos) => format!("{}:***{}", &prefix[..scheme_end + colon_pos], suffix),
        None => url.to_string(),
    }
}

/// Connected adapters by name
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: RwLock<BTreeMap<&'static str, Arc<dyn DatabaseAdapter>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect and add an adapter
    ///
    /// A disabled adapter is skipped with `Ok(false)`. A duplicate name or a failed
    /// connect is an error and leaves the registry unchanged.
    pub async fn register(&self, adapter: Arc<dyn DatabaseAdapter>) -> Result<bool, AdapterError> {
        if !adapter.is_enabled() {
            return Ok(false);
        }

        let name = adapter.name();
        if self.adapters.read().contains_key(name) {
            return Err(AdapterError::AlreadyRegistered(name.to_string()));
        }

        adapter.connect().await?;

        let mut adapters = self.adapters.write();
        if adapters.contains_key(name) {
            return Err(AdapterError::AlreadyRegistered(name.to_string()));
        }
        adapters.insert(name, adapter);
        info!(adapter = name, "Database adapter registered");
        Ok(true)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DatabaseAdapter>> {
        self.adapters.read().get(name).cloned()
    }

    /// Registered names, sorted
    pub fn list(&self) -> Vec<String> {
        self.adapters
            .read()
            .keys()
            .map(|name| name.to_string())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.read().is_empty()
    }

    /// Close every adapter, reporting all failures together
    pub async fn close_all(&self) -> Result<(), AdapterError> {
        let adapters: Vec<_> = self.adapters.read().values().cloned().collect();

        let mut failures = Vec::new();
        for adapter in adapters {
            if let Err(e) = adapter.close().await {
                warn!(adapter = adapter.name(), "Failed to close adapter: {}", e);
                failures.push(format!("{}: {}", adapter.name(), e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AdapterError::Close(failures.join("; ")))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory adapter for registry and tool tests
    pub(crate) struct StubAdapter {
        pub name: &'static str,
        pub enabled: bool,
        pub fail_connect: bool,
        pub fail_close: bool,
        pub connects: AtomicUsize,
        pub closes: AtomicUsize,
    }

    impl StubAdapter {
        pub fn new(name: &'static str) -> Self {
            Self {
                name,
                enabled: true,
                fail_connect: false,
                fail_close: false,
                connects: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DatabaseAdapter for StubAdapter {
        fn name(&self) -> &'static str {
            self.name
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        async fn connect(&self) -> Result<(), AdapterError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect {
                return Err(AdapterError::Connection {
                    adapter: self.name,
                    source: sqlx::Error::PoolTimedOut,
                });
            }
            Ok(())
        }

        async fn close(&self) -> Result<(), AdapterError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                return Err(AdapterError::NotConnected(self.name));
            }
            Ok(())
        }

        async fn list_schemas(
            &self,
            cancel: &CancellationToken,
        ) -> Result<Vec<Schema>, AdapterError> {
            cancellable(cancel, async {
                Ok(vec![Schema {
                    name: "public".to_string(),
                }])
            })
            .await
        }

        async fn get_schema_ddl(
            &self,
            cancel: &CancellationToken,
            schema: &str,
        ) -> Result<String, AdapterError> {
            let ddl = format!("CREATE SCHEMA IF NOT EXISTS {};", schema);
            cancellable(cancel, async { Ok(ddl) }).await
        }

        async fn execute_select(
            &self,
            cancel: &CancellationToken,
            query: &str,
        ) -> Result<QueryResult, AdapterError> {
            ensure_select(query)?;
            cancellable(cancel, async {
                Ok(QueryResult {
                    columns: vec!["?column?".to_string()],
                    rows: vec![vec![Value::from(1)]],
                })
            })
            .await
        }
    }

    #[test]
    fn test_ensure_select() {
        assert_eq!(ensure_select("   select 1").unwrap(), "select 1");
        assert!(ensure_select("SeLeCt * FROM t").is_ok());
        assert!(ensure_select("\n WITH x AS (SELECT 1) SELECT * FROM x").is_ok());

        let rejected_queries = [
            "DROP TABLE x",
            "insert into t values (1)",
            "",
            "   ",
            "explain select 1",
        ];
        for rejected in rejected_queries {
            let err = ensure_select(rejected).unwrap_err();
            assert!(matches!(err, AdapterError::NotSelect));
            assert_eq!(err.to_string(), "only SELECT queries are allowed");
        }
    }

    #[test]
    fn test_mask_db_url() {
        assert_eq!(
            mask_db_url("postgres://app:secret@db:5432/app"),
            "postgres://app:***@db:5432/app"
        );
        assert_eq!(
            mask_db_url("mysql://root@localhost/test"),
            "mysql://root@localhost/test"
        );
        assert_eq!(mask_db_url("postgres://localhost/app"), "postgres://localhost/app");
    }

    #[tokio::test]
    async fn test_cancelled_call_is_rejected() {
        let token = CancellationToken::new();
        token.cancel();
        let err = cancellable(&token, std::future::pending::<Result<(), AdapterError>>())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Cancelled));

        // A ready operation still loses to a cancelled token
        for _ in 0..64 {
            let err = cancellable(&token, std::future::ready(Ok::<_, AdapterError>(1)))
                .await
                .unwrap_err();
            assert!(matches!(err, AdapterError::Cancelled));
        }
    }

    #[tokio::test]
    async fn test_register_skips_disabled_and_rejects_duplicates() {
        let registry = AdapterRegistry::new();

        let disabled = StubAdapter {
            enabled: false,
            ..StubAdapter::new("mysql")
        };
        assert!(!registry.register(Arc::new(disabled)).await.unwrap());
        assert!(registry.is_empty());

        let postgres = Arc::new(StubAdapter::new("postgres"));
        assert!(registry.register(postgres.clone()).await.unwrap());
        assert_eq!(postgres.connects.load(Ordering::SeqCst), 1);

        let err = registry
            .register(Arc::new(StubAdapter::new("postgres")))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::AlreadyRegistered(name) if name == "postgres"));
        assert_eq!(registry.list(), vec!["postgres"]);
        assert!(registry.get("postgres").is_some());
        assert!(registry.get("mysql").is_none());
    }

    #[tokio::test]
    async fn test_failed_connect_is_not_registered() {
        let registry = AdapterRegistry::new();
        let broken = StubAdapter {
            fail_connect: true,
            ..StubAdapter::new("postgres")
        };
        let err = registry.register(Arc::new(broken)).await.unwrap_err();
        assert!(matches!(err, AdapterError::Connection { adapter: "postgres", .. }));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_close_all_collects_errors() {
        let registry = AdapterRegistry::new();
        let mysql = Arc::new(StubAdapter {
            fail_close: true,
            ..StubAdapter::new("mysql")
        });
        let postgres = Arc::new(StubAdapter::new("postgres"));
        registry.register(mysql.clone()).await.unwrap();
        registry.register(postgres.clone()).await.unwrap();

        let err = registry.close_all().await.unwrap_err();
        assert!(err.to_string().contains("mysql"));
        assert_eq!(mysql.closes.load(Ordering::SeqCst), 1);
        assert_eq!(postgres.closes.load(Ordering::SeqCst), 1);
    }
}
