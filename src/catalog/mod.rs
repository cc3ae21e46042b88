//! SQL builders, one module per database.
//!
//! Every function here is pure: it returns a [`Statement`] and never touches
//! a connection. Execution and caching happen in the tools layer.
//!
//! - [`direct`]: cloud PostgreSQL (`$n` placeholders)
//! - [`companies`]: company registry tables in the same PostgreSQL database
//! - [`tarms`]: ERP MySQL behind the tunnel (`?` placeholders)
//! - [`mis`]: management-information MySQL behind the tunnel

pub mod companies;
pub mod direct;
pub mod mis;
pub mod tarms;

use crate::db::SqlParam;

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// `%term%` for LIKE / ILIKE matching.
fn contains_pattern(term: &str) -> String {
    format!("%{term}%")
}

/// Zero-based row offset for a one-based page.
fn page_offset(page: i64, limit: i64) -> i64 {
    (page.max(1) - 1) * limit
}
