//! Direct PostgreSQL pool.
//!
//! Rows are produced server-side by wrapping the query in `row_to_json`, so
//! every PostgreSQL type reaches the tools in its canonical JSON form.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::query::QueryScalar;
use sqlx::types::Json;
use sqlx::Postgres;
use tracing::info;

use super::{Database, Row, SqlParam};
use crate::config::DirectConfig;
use crate::error::{Error, Result};

pub struct PostgresDatabase {
    pool: PgPool,
}

impl PostgresDatabase {
    /// Build the pool without opening a connection. Fails only on a malformed URL.
    pub fn connect_lazy(config: &DirectConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| Error::configuration_missing("direct", "url"))?;

        let options = PgConnectOptions::from_str(url)
            .map_err(|e| Error::configuration_missing("direct", format!("valid url ({e})")))?
            .options([("statement_timeout", config.statement_timeout_ms.to_string())]);

        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections.max(1))
            .idle_timeout(Duration::from_millis(config.idle_timeout_ms))
            .acquire_timeout(Duration::from_millis(config.connect_timeout_ms))
            .connect_lazy_with(options);

        info!(
            max_connections = config.max_connections,
            statement_timeout_ms = config.statement_timeout_ms,
            "direct database pool created"
        );
        Ok(Self { pool })
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>> {
        let wrapped = wrap_row_to_json(sql);
        let values = bind_all(sqlx::query_scalar(&wrapped), params)
            .fetch_all(&self.pool)
            .await?;
        Ok(values.into_iter().map(|Json(v)| value_to_row(v)).collect())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn bind_all<'q>(
    mut query: QueryScalar<'q, Postgres, Json<Value>, PgArguments>,
    params: &[SqlParam],
) -> QueryScalar<'q, Postgres, Json<Value>, PgArguments> {
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

fn wrap_row_to_json(sql: &str) -> String {
    let inner = sql.trim().trim_end_matches(';').trim_end();
    format!("SELECT row_to_json(q) FROM ({inner}) q")
}

fn value_to_row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => {
            let mut row = Row::new();
            row.insert("value".to_string(), other);
            row
        }
    }
}
