//! MySQL pool reached through a tunnel's loopback endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Number, Value};
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, MySql, Row as _, TypeInfo, ValueRef};
use tracing::debug;

use super::{Database, DatabaseFactory, Row, SqlParam};
use crate::config::TargetConfig;
use crate::error::Result;

/// Creates one pool per tunnel session.
#[derive(Debug, Clone)]
pub struct MySqlFactory {
    username: String,
    password: String,
    database: Option<String>,
    pool_size: u32,
    connect_timeout: Duration,
}

impl MySqlFactory {
    pub fn from_config(target: &TargetConfig) -> Self {
        Self {
            username: target.db_username.clone().unwrap_or_default(),
            password: target.db_password.clone().unwrap_or_default(),
            database: target.db_name.clone(),
            pool_size: target.pool_size.max(1),
            connect_timeout: target.connect_timeout(),
        }
    }
}

#[async_trait]
impl DatabaseFactory for MySqlFactory {
    async fn create(&self, endpoint: SocketAddr) -> Result<Arc<dyn Database>> {
        let mut options = MySqlConnectOptions::new()
            .host(&endpoint.ip().to_string())
            .port(endpoint.port())
            .username(&self.username)
            .password(&self.password);
        if let Some(db) = &self.database {
            options = options.database(db);
        }

        // Recovery is driven by the tunnel manager's error classification,
        // so the pool does not ping connections on checkout.
        let pool = MySqlPoolOptions::new()
            .max_connections(self.pool_size)
            .min_connections(0)
            .acquire_timeout(self.connect_timeout)
            .test_before_acquire(false)
            .connect_lazy_with(options);

        Ok(Arc::new(MySqlDatabase { pool }))
    }
}

pub struct MySqlDatabase {
    pool: MySqlPool,
}

#[async_trait]
impl Database for MySqlDatabase {
    async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>> {
        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn bind_all<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &[SqlParam],
) -> Query<'q, MySql, MySqlArguments> {
    for param in params {
        query = match param {
            SqlParam::Null => query.bind(None::<String>),
            SqlParam::Bool(v) => query.bind(*v),
            SqlParam::Int(v) => query.bind(*v),
            SqlParam::Float(v) => query.bind(*v),
            SqlParam::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

fn row_to_json(row: &MySqlRow) -> Row {
    let mut out = Row::new();
    for column in row.columns() {
        let value = column_value(row, column.ordinal(), column.type_info().name());
        out.insert(column.name().to_string(), value);
    }
    out
}

/// Decode one column by its declared MySQL type. Values that fail to decode
/// come back as `null` rather than failing the whole row set.
fn column_value(row: &MySqlRow, idx: usize, type_name: &str) -> Value {
    match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(_) => {}
        Err(e) => {
            debug!(column = idx, error = %e, "raw column read failed");
            return Value::Null;
        }
    }

    let decoded: std::result::Result<Value, sqlx::Error> = match type_name {
        "BOOLEAN" => row.try_get_unchecked::<bool, _>(idx).map(Value::from),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            row.try_get_unchecked::<i64, _>(idx).map(Value::from)
        }
        name if name.ends_with("UNSIGNED") => {
            row.try_get_unchecked::<u64, _>(idx).map(Value::from)
        }
        "FLOAT" | "DOUBLE" => row
            .try_get_unchecked::<f64, _>(idx)
            .map(|f| Number::from_f64(f).map_or(Value::Null, Value::Number)),
        "DECIMAL" => row
            .try_get_unchecked::<String, _>(idx)
            .map(|s| decimal_to_json(&s)),
        "DATE" => row
            .try_get_unchecked::<NaiveDate, _>(idx)
            .map(|d| Value::String(d.to_string())),
        "TIME" => row
            .try_get_unchecked::<NaiveTime, _>(idx)
            .map(|t| Value::String(t.to_string())),
        "DATETIME" => row
            .try_get_unchecked::<NaiveDateTime, _>(idx)
            .map(|d| Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        "TIMESTAMP" => row
            .try_get_unchecked::<DateTime<Utc>, _>(idx)
            .map(|d| Value::String(d.to_rfc3339())),
        "JSON" => row
            .try_get_unchecked::<sqlx::types::Json<Value>, _>(idx)
            .map(|j| j.0),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => row
            .try_get_unchecked::<Vec<u8>, _>(idx)
            .map(|b| Value::String(base64::engine::general_purpose::STANDARD.encode(b))),
        _ => row
            .try_get_unchecked::<String, _>(idx)
            .or_else(|_| {
                row.try_get_unchecked::<Vec<u8>, _>(idx)
                    .map(|b| String::from_utf8_lossy(&b).into_owned())
            })
            .map(Value::String),
    };

    decoded.unwrap_or_else(|e| {
        debug!(column = idx, type_name, error = %e, "column decode failed");
        Value::Null
    })
}

/// DECIMAL values arrive as text. Keep them numeric when JSON can represent
/// them, otherwise pass the text through.
fn decimal_to_json(text: &str) -> Value {
    match serde_json::from_str::<Number>(text) {
        Ok(n) => Value::Number(n),
        Err(_) => Value::String(text.to_string()),
    }
}
