//! MySQL adapter

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use sqlx::mysql::{MySql, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Decode, Row, TypeInfo};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    AdapterError, DatabaseAdapter, PoolConfig, QueryResult, Schema, cancellable, ensure_select,
    mask_db_url,
};

const LIST_SCHEMAS: &str = r#"
    SELECT SCHEMA_NAME
    FROM INFORMATION_SCHEMA.SCHEMATA
    WHERE SCHEMA_NAME NOT IN ('mysql', 'information_schema', 'performance_schema', 'sys')
    ORDER BY SCHEMA_NAME
"#;

const LIST_TABLES: &str = r#"
    SELECT TABLE_NAME
    FROM INFORMATION_SCHEMA.TABLES
    WHERE TABLE_SCHEMA = ?
        AND TABLE_TYPE = 'BASE TABLE'
    ORDER BY TABLE_NAME
"#;

const LIST_VIEWS: &str = r#"
    SELECT TABLE_NAME
    FROM INFORMATION_SCHEMA.VIEWS
    WHERE TABLE_SCHEMA = ?
    ORDER BY TABLE_NAME
"#;

const LIST_ROUTINES: &str = r#"
    SELECT ROUTINE_NAME, ROUTINE_TYPE
    FROM INFORMATION_SCHEMA.ROUTINES
    WHERE ROUTINE_SCHEMA = ?
    ORDER BY ROUTINE_NAME
"#;

/// MySQL adapter backed by a `MySqlPool`
pub struct MySqlAdapter {
    url: Option<String>,
    config: PoolConfig,
    pool: RwLock<Option<MySqlPool>>,
}

impl MySqlAdapter {
    pub const NAME: &'static str = "mysql";

    /// Accepts a `mysql://` URL or a `user:pass@tcp(host:port)/db` DSN
    pub fn new(dsn: Option<String>) -> Self {
        Self::with_config(dsn, PoolConfig::default())
    }

    pub fn with_config(dsn: Option<String>, config: PoolConfig) -> Self {
        Self {
            url: dsn
                .filter(|dsn| !dsn.trim().is_empty())
                .map(|dsn| dsn_to_url(dsn.trim())),
            config,
            pool: RwLock::new(None),
        }
    }

    fn pool(&self) -> Result<MySqlPool, AdapterError> {
        self.pool
            .read()
            .clone()
            .ok_or(AdapterError::NotConnected(Self::NAME))
    }

    async fn schema_ddl(&self, pool: &MySqlPool, schema: &str) -> Result<String, AdapterError> {
        let db = quote_ident(schema);
        let mut ddls = vec![
            format!("CREATE DATABASE IF NOT EXISTS {};", db),
            format!("USE {};", db),
        ];

        let tables = sqlx::query_scalar::<_, String>(LIST_TABLES)
            .bind(schema)
            .fetch_all(pool)
            .await?;
        for table in tables {
            let statement = format!("SHOW CREATE TABLE {}.{}", db, quote_ident(&table));
            let row = sqlx::query(&statement).fetch_one(pool).await?;
            let create: String = row.try_get(1)?;
            ddls.push(format!("{};", create));
        }

        let views = sqlx::query_scalar::<_, String>(LIST_VIEWS)
            .bind(schema)
            .fetch_all(pool)
            .await?;
        for view in views {
            let statement = format!("SHOW CREATE VIEW {}.{}", db, quote_ident(&view));
            match fetch_create_statement(pool, &statement, 1).await {
                Ok(create) => ddls.push(format!("{};", create)),
                Err(e) => warn!(view = %view, "Failed to get create view statement: {}", e),
            }
        }

        let routines = sqlx::query_as::<_, (String, String)>(LIST_ROUTINES)
            .bind(schema)
            .fetch_all(pool)
            .await?;
        for (routine, routine_type) in routines {
            let kind = match routine_type.to_ascii_uppercase().as_str() {
                "PROCEDURE" => "PROCEDURE",
                "FUNCTION" => "FUNCTION",
                other => {
                    warn!(
                        routine = %routine,
                        routine_type = other,
                        "Skipping unknown routine type"
                    );
                    continue;
                }
            };
            let statement = format!("SHOW CREATE {} {}.{}", kind, db, quote_ident(&routine));
            // Column 2 holds the CREATE statement for both procedures and functions
            match fetch_create_statement(pool, &statement, 2).await {
                Ok(create) => {
                    ddls.push("DELIMITER $$".to_string());
                    ddls.push(format!("{}$$", create));
                    ddls.push("DELIMITER ;".to_string());
                }
                Err(e) => {
                    warn!(routine = %routine, "Failed to get create routine statement: {}", e)
                }
            }
        }

        Ok(ddls.join("\n\n"))
    }
}

async fn fetch_create_statement(
    pool: &MySqlPool,
    statement: &str,
    column: usize,
) -> Result<String, AdapterError> {
    let row = sqlx::query(statement).fetch_one(pool).await?;
    // NULL when the user lacks privileges on the routine body
    let create: Option<String> = row.try_get(column)?;
    create.ok_or_else(|| AdapterError::Database(sqlx::Error::ColumnNotFound(statement.to_string())))
}

#[async_trait]
impl DatabaseAdapter for MySqlAdapter {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    async fn connect(&self) -> Result<(), AdapterError> {
        let Some(url) = &self.url else {
            return Ok(());
        };
        info!("Connecting MySQL adapter to {}", mask_db_url(url));

        let pool = MySqlPoolOptions::new()
            .max_connections(self.config.max_connections)
            .min_connections(self.config.min_connections)
            .acquire_timeout(self.config.acquire_timeout)
            .idle_timeout(Some(self.config.idle_timeout))
            .test_before_acquire(true)
            .connect(url)
            .await
            .map_err(|source| AdapterError::Connection {
                adapter: Self::NAME,
                source,
            })?;

        *self.pool.write() = Some(pool);
        info!("MySQL adapter connected");
        Ok(())
    }

    async fn close(&self) -> Result<(), AdapterError> {
        let pool = self.pool.write().take();
        if let Some(pool) = pool {
            pool.close().await;
            debug!("MySQL pool closed");
        }
        Ok(())
    }

    async fn list_schemas(&self, cancel: &CancellationToken) -> Result<Vec<Schema>, AdapterError> {
        let pool = self.pool()?;
        cancellable(cancel, async move {
            let names = sqlx::query_scalar::<_, String>(LIST_SCHEMAS)
                .fetch_all(&pool)
                .await?;
            Ok(names.into_iter().map(|name| Schema { name }).collect())
        })
        .await
    }

    async fn get_schema_ddl(
        &self,
        cancel: &CancellationToken,
        schema: &str,
    ) -> Result<String, AdapterError> {
        let pool = self.pool()?;
        cancellable(cancel, self.schema_ddl(&pool, schema)).await
    }

    async fn execute_select(
        &self,
        cancel: &CancellationToken,
        query: &str,
    ) -> Result<QueryResult, AdapterError> {
        let query = ensure_select(query)?;
        let pool = self.pool()?;
        cancellable(cancel, async move {
            let rows = sqlx::query(query).fetch_all(&pool).await?;
            Ok(to_query_result(&rows))
        })
        .await
    }
}

/// Backtick-quote an identifier, doubling embedded backticks
fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Turn a `user:pass@tcp(host:port)/db?params` DSN into a `mysql://` URL
fn dsn_to_url(dsn: &str) -> String {
    if dsn.starts_with("mysql://") || dsn.starts_with("mariadb://") {
        return dsn.to_string();
    }

    let (credentials, rest) = match dsn.rfind('@') {
        Some(at) => (Some(&dsn[..at]), &dsn[at + 1..]),
        None => (None, dsn),
    };
    let (address, path) = match rest.find('/') {
        Some(slash) => (&rest[..slash], &rest[slash..]),
        None => (rest, "/"),
    };
    let host = address
        .strip_prefix("tcp(")
        .and_then(|inner| inner.strip_suffix(')'))
        .unwrap_or(address);
    let host = if host.is_empty() { "localhost:3306" } else { host };

    match credentials {
        Some(credentials) => format!("mysql://{}@{}{}", credentials, host, path),
        None => format!("mysql://{}{}", host, path),
    }
}

fn to_query_result(rows: &[MySqlRow]) -> QueryResult {
    let columns = rows
        .first()
        .map(|row| {
            row.columns()
                .iter()
                .map(|column| column.name().to_string())
                .collect()
        })
        .unwrap_or_default();

    let rows = rows
        .iter()
        .map(|row| (0..row.len()).map(|index| column_value(row, index)).collect())
        .collect();

    QueryResult { columns, rows }
}

/// Convert one cell to JSON by its MySQL type; undecodable values become null
fn column_value(row: &MySqlRow, index: usize) -> Value {
    let type_name = row.columns()[index].type_info().name().to_ascii_uppercase();

    fn get<'r, T>(row: &'r MySqlRow, index: usize) -> Option<T>
    where
        T: Decode<'r, MySql> + sqlx::Type<MySql>,
    {
        row.try_get::<Option<T>, _>(index).ok().flatten()
    }

    let text = |row: &MySqlRow| {
        row.try_get_unchecked::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(Value::String)
    };

    let value = match type_name.as_str() {
        "NULL" => None,
        "BOOLEAN" => get::<bool>(row, index).map(Value::from),
        name if name.ends_with("UNSIGNED") => get::<u64>(row, index).map(Value::from),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            get::<i64>(row, index).map(Value::from)
        }
        "YEAR" => row
            .try_get_unchecked::<Option<u16>, _>(index)
            .ok()
            .flatten()
            .map(Value::from),
        "FLOAT" => get::<f32>(row, index).map(|v| Value::from(f64::from(v))),
        "DOUBLE" => get::<f64>(row, index).map(Value::from),
        "DECIMAL" => text(row),
        "JSON" => get::<Value>(row, index),
        "DATE" => get::<chrono::NaiveDate>(row, index).map(|v| Value::String(v.to_string())),
        "TIME" => get::<chrono::NaiveTime>(row, index).map(|v| Value::String(v.to_string())),
        "DATETIME" => {
            get::<chrono::NaiveDateTime>(row, index).map(|v| Value::String(v.to_string()))
        }
        "TIMESTAMP" => get::<chrono::DateTime<chrono::Utc>>(row, index)
            .map(|v| Value::String(v.to_rfc3339())),
        "CHAR" | "VARCHAR" | "TINYTEXT" | "TEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" | "SET" => {
            get::<String>(row, index).map(Value::String)
        }
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => get::<Vec<u8>>(row, index)
            .map(|bytes| Value::String(String::from_utf8_lossy(&bytes).into_owned())),
        other => {
            debug!(column = index, type_name = other, "Unsupported column type, trying text");
            text(row)
        }
    };

    value.unwrap_or(Value::Null)
}
