//! Database access behind a small trait seam.
//!
//! - [`mysql`]: bounded pool addressed at a tunnel's local endpoint
//! - [`postgres`]: the directly reachable cloud database
//!
//! Every backend returns rows as JSON objects keyed by column name, which is
//! what the tool layer serializes anyway.

pub mod mysql;
pub mod postgres;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Result;

/// One result row: column name → value.
pub type Row = Map<String, Value>;

/// Positional query parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for SqlParam {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for SqlParam {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// A pooled database client.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run a read query with positional parameters.
    async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>>;

    /// Close every pooled connection. Safe to call more than once.
    async fn close(&self);
}

/// Builds a pool addressed at a tunnel's local endpoint.
#[async_trait]
pub trait DatabaseFactory: Send + Sync {
    async fn create(&self, endpoint: SocketAddr) -> Result<Arc<dyn Database>>;
}
