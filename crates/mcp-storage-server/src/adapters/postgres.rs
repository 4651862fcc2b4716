//! PostgreSQL adapter

use std::fmt::Write as _;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow, PgValueFormat, PgValueRef, Postgres};
use sqlx::{Column, Decode, Row, TypeInfo};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    AdapterError, DatabaseAdapter, PoolConfig, QueryResult, Schema, cancellable, ensure_select,
    mask_db_url,
};

const LIST_SCHEMAS: &str = r#"
    SELECT schema_name
    FROM information_schema.schemata
    WHERE schema_name NOT IN ('pg_catalog', 'information_schema')
    ORDER BY schema_name
"#;

const TABLE_DDLS: &str = r#"
    SELECT
        'CREATE TABLE ' || t.schemaname || '.' || t.tablename || ' (' ||
        string_agg(
            a.attname || ' ' ||
            format_type(a.atttypid, a.atttypmod) ||
            CASE WHEN a.attnotnull THEN ' NOT NULL' ELSE '' END,
            ', ' ORDER BY a.attnum
        ) || ');' AS ddl
    FROM pg_attribute a
    JOIN pg_class c ON a.attrelid = c.oid
    JOIN pg_namespace n ON c.relnamespace = n.oid
    JOIN pg_tables t ON c.relname = t.tablename AND n.nspname = t.schemaname
    WHERE a.attnum > 0
        AND NOT a.attisdropped
        AND n.nspname = $1
    GROUP BY t.schemaname, t.tablename
    ORDER BY t.tablename
"#;

const INDEX_DDLS: &str = r#"
    SELECT pg_get_indexdef(i.indexrelid) || ';' AS ddl
    FROM pg_index i
    JOIN pg_class c ON i.indrelid = c.oid
    JOIN pg_namespace n ON c.relnamespace = n.oid
    WHERE n.nspname = $1
        AND NOT i.indisprimary
    ORDER BY c.relname, i.indexrelid
"#;

const CONSTRAINT_DDLS: &str = r#"
    SELECT
        'ALTER TABLE ' || n.nspname || '.' || c.relname ||
        ' ADD CONSTRAINT ' || con.conname || ' ' ||
        pg_get_constraintdef(con.oid) || ';' AS ddl
    FROM pg_constraint con
    JOIN pg_class c ON con.conrelid = c.oid
    JOIN pg_namespace n ON c.relnamespace = n.oid
    WHERE n.nspname = $1
        AND con.contype IN ('f', 'u', 'c')
    ORDER BY c.relname, con.conname
"#;

/// PostgreSQL adapter backed by a `PgPool`
pub struct PostgresAdapter {
    url: Option<String>,
    config: PoolConfig,
    pool: RwLock<Option<PgPool>>,
}

impl PostgresAdapter {
    pub const NAME: &'static str = "postgres";

    /// `None` or an empty URL leaves the adapter disabled
    pub fn new(url: Option<String>) -> Self {
        Self::with_config(url, PoolConfig::default())
    }

    pub fn with_config(url: Option<String>, config: PoolConfig) -> Self {
        Self {
            url: url.filter(|url| !url.trim().is_empty()),
            config,
            pool: RwLock::new(None),
        }
    }

    fn pool(&self) -> Result<PgPool, AdapterError> {
        self.pool
            .read()
            .clone()
            .ok_or(AdapterError::NotConnected(Self::NAME))
    }

    async fn ddl_rows(
        &self,
        pool: &PgPool,
        query: &str,
        schema: &str,
    ) -> Result<Vec<String>, AdapterError> {
        Ok(sqlx::query_scalar::<_, String>(query)
            .bind(schema)
            .fetch_all(pool)
            .await?)
    }
}

#[async_trait]
impl DatabaseAdapter for PostgresAdapter {
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
        info!("Connecting PostgreSQL adapter to {}", mask_db_url(url));

        let pool = PgPoolOptions::new()
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
        info!("PostgreSQL adapter connected");
        Ok(())
    }

    async fn close(&self) -> Result<(), AdapterError> {
        let pool = self.pool.write().take();
        if let Some(pool) = pool {
            pool.close().await;
            debug!("PostgreSQL pool closed");
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
        cancellable(cancel, async move {
            let mut ddls = vec![format!("CREATE SCHEMA IF NOT EXISTS {};", quote_ident(schema))];
            for query in [TABLE_DDLS, INDEX_DDLS, CONSTRAINT_DDLS] {
                ddls.extend(self.ddl_rows(&pool, query, schema).await?);
            }
            Ok(ddls.join("\n\n"))
        })
        .await
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

/// Double-quote an identifier when it is not a plain lowercase name
fn quote_ident(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

fn to_query_result(rows: &[PgRow]) -> QueryResult {
    // Column names come from the first row; an empty result has none to report
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

/// Convert one cell to JSON by its PostgreSQL type; undecodable values become null
fn column_value(row: &PgRow, index: usize) -> Value {
    let type_name = row.columns()[index].type_info().name().to_ascii_uppercase();

    fn get<'r, T>(row: &'r PgRow, index: usize) -> Option<T>
    where
        T: Decode<'r, Postgres> + sqlx::Type<Postgres>,
    {
        row.try_get::<Option<T>, _>(index).ok().flatten()
    }

    let value = match type_name.as_str() {
        "BOOL" => get::<bool>(row, index).map(Value::from),
        "INT2" => get::<i16>(row, index).map(Value::from),
        "INT4" => get::<i32>(row, index).map(Value::from),
        "INT8" => get::<i64>(row, index).map(Value::from),
        "OID" => get::<sqlx::postgres::types::Oid>(row, index).map(|oid| Value::from(oid.0)),
        "FLOAT4" => get::<f32>(row, index).map(|v| Value::from(f64::from(v))),
        "FLOAT8" => get::<f64>(row, index).map(Value::from),
        "NUMERIC" => row
            .try_get_unchecked::<Option<NumericText>, _>(index)
            .ok()
            .flatten()
            .map(|numeric| Value::String(numeric.0)),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CITEXT" | "UNKNOWN" => {
            get::<String>(row, index).map(Value::String)
        }
        "JSON" | "JSONB" => get::<Value>(row, index),
        "UUID" => get::<uuid::Uuid>(row, index).map(|v| Value::String(v.to_string())),
        "DATE" => get::<chrono::NaiveDate>(row, index).map(|v| Value::String(v.to_string())),
        "TIME" => get::<chrono::NaiveTime>(row, index).map(|v| Value::String(v.to_string())),
        "TIMESTAMP" => {
            get::<chrono::NaiveDateTime>(row, index).map(|v| Value::String(v.to_string()))
        }
        "TIMESTAMPTZ" => get::<chrono::DateTime<chrono::Utc>>(row, index)
            .map(|v| Value::String(v.to_rfc3339())),
        "BYTEA" => get::<Vec<u8>>(row, index)
            .map(|bytes| Value::String(String::from_utf8_lossy(&bytes).into_owned())),
        "TEXT[]" | "VARCHAR[]" | "NAME[]" => get::<Vec<String>>(row, index)
            .map(|items| Value::Array(items.into_iter().map(Value::String).collect())),
        "INT4[]" => get::<Vec<i32>>(row, index)
            .map(|items| Value::Array(items.into_iter().map(Value::from).collect())),
        "INT8[]" => get::<Vec<i64>>(row, index)
            .map(|items| Value::Array(items.into_iter().map(Value::from).collect())),
        other => {
            debug!(column = index, type_name = other, "Unsupported column type, returning null");
            None
        }
    };

    value.unwrap_or(Value::Null)
}

/// `NUMERIC` rendered as its exact decimal text
struct NumericText(String);

impl<'r> Decode<'r, Postgres> for NumericText {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(Self(value.as_str()?.to_string())),
            PgValueFormat::Binary => numeric_to_string(value.as_bytes()?).map(Self),
        }
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Decode the binary `NUMERIC` wire format: base-10000 digit groups plus weight, sign and scale
fn numeric_to_string(buf: &[u8]) -> Result<String, BoxDynError> {
    let read = |at: usize| -> Result<i16, BoxDynError> {
        buf.get(at..at + 2)
            .map(|b| i16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated NUMERIC value".into())
    };

    let ndigits = usize::try_from(read(0)?).map_err(|_| "negative NUMERIC digit count")?;
    let weight = i32::from(read(2)?);
    let sign = read(4)? as u16;
    let dscale = read(6)? as u16 as usize;

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| read(8 + 2 * i))
        .collect::<Result<Vec<_>, _>>()?;
    // Group at position p carries weight (weight - p)
    let digit = |position: i32| {
        usize::try_from(position)
            .ok()
            .and_then(|p| digits.get(p).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        for position in 0..=weight {
            if position == 0 {
                write!(out, "{}", digit(position))?;
            } else {
                write!(out, "{:04}", digit(position))?;
            }
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut position = weight + 1;
        while fraction.len() < dscale {
            write!(fraction, "{:04}", digit(position))?;
            position += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(weight: i16, sign: u16, dscale: u16, digits: &[i16]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(digits.len() as i16).to_be_bytes());
        buf.extend_from_slice(&weight.to_be_bytes());
        buf.extend_from_slice(&sign.to_be_bytes());
        buf.extend_from_slice(&dscale.to_be_bytes());
        for digit in digits {
            buf.extend_from_slice(&digit.to_be_bytes());
        }
        buf
    }

    #[test]
    fn test_numeric_to_string() {
        assert_eq!(numeric_to_string(&numeric(0, 0, 2, &[123, 4500])).unwrap(), "123.45");
        assert_eq!(numeric_to_string(&numeric(1, 0, 0, &[1])).unwrap(), "10000");
        assert_eq!(numeric_to_string(&numeric(-1, 0, 3, &[10])).unwrap(), "0.001");
        assert_eq!(numeric_to_string(&numeric(-2, 0, 5, &[1000])).unwrap(), "0.00001");
        assert_eq!(
            numeric_to_string(&numeric(1, NUMERIC_NEG, 1, &[12, 3456, 7000])).unwrap(),
            "-123456.7"
        );
        assert_eq!(numeric_to_string(&numeric(0, 0, 0, &[])).unwrap(), "0");
        assert_eq!(numeric_to_string(&numeric(0, NUMERIC_NAN, 0, &[])).unwrap(), "NaN");
        assert!(numeric_to_string(&[0, 1]).is_err());
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("public"), "public");
        assert_eq!(quote_ident("sales_2024"), "sales_2024");
        assert_eq!(quote_ident("Sales"), "\"Sales\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[tokio::test]
    async fn test_disabled_without_url() {
        assert!(!PostgresAdapter::new(None).is_enabled());
        assert!(!PostgresAdapter::new(Some("  ".into())).is_enabled());
        assert!(PostgresAdapter::new(Some("postgres://localhost/db".into())).is_enabled());
    }

    #[tokio::test]
    async fn test_rejects_writes_before_connecting() {
        let adapter = PostgresAdapter::new(Some("postgres://localhost/db".into()));
        let cancel = CancellationToken::new();

        let err = adapter.execute_select(&cancel, "DROP TABLE x").await.unwrap_err();
        assert!(matches!(err, AdapterError::NotSelect));

        let err = adapter.execute_select(&cancel, "  SELECT 1").await.unwrap_err();
        assert!(matches!(err, AdapterError::NotConnected("postgres")));
    }
}
