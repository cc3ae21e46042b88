//! # bizdata-mcp
//!
//! MCP server exposing read-only business-data tools to an AI agent host.
//! Runs as a stdio JSON-RPC server.
//!
//! ## Architecture
//!
//! ```text
//! config.rs          TOML file / env-var configuration
//! error.rs           error kinds, transient classification
//! cache.rs           TTL + LRU memoizer keyed by canonical parameters
//! db/                Database trait, MySQL and PostgreSQL backends
//! tunnel/            SSH transport, local port forwarder, per-target lifecycle
//! catalog/           SQL builders per database
//! context.rs         process-wide state: tunnels, direct pool, cache, API clients
//! llm.rs             completion API client
//! email.rs           transactional email client
//! tools/             tool definitions and handlers
//! mcp.rs             JSON-RPC protocol handler
//! observability.rs   tracing subscriber
//! ```
//!
//! Two MySQL targets (`tarms`, `mis`) sit behind SSH hosts. Each gets a
//! [`TunnelManager`](tunnel::TunnelManager) that connects on first use,
//! shares one in-flight setup among concurrent callers, retries a query once
//! after a transient connection error, and tears everything down on shutdown.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod context;
pub mod db;
pub mod email;
pub mod error;
pub mod llm;
pub mod mcp;
pub mod observability;
pub mod tools;
pub mod tunnel;
pub mod util;
