//! Process-wide state shared by every tool call.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::info;

use crate::cache::Cache;
use crate::catalog::Statement;
use crate::config::{Config, DirectConfig, TargetId};
use crate::db::postgres::PostgresDatabase;
use crate::db::{Database, Row};
use crate::email::EmailClient;
use crate::error::{Error, Result};
use crate::llm::CompletionClient;
use crate::tunnel::TunnelManager;

pub struct AppContext {
    tunnels: BTreeMap<TargetId, TunnelManager>,
    direct_config: DirectConfig,
    direct: OnceCell<Arc<dyn Database>>,
    cache: Cache,
    llm: CompletionClient,
    email: EmailClient,
    shut_down: AtomicBool,
}

impl AppContext {
    /// Build every client without opening a connection.
    pub fn from_config(config: &Config) -> Result<Self> {
        let tunnels = TargetId::ALL
            .into_iter()
            .map(|id| (id, TunnelManager::from_config(id, config.targets.get(id))))
            .collect();
        Ok(Self {
            tunnels,
            direct_config: config.direct.clone(),
            direct: OnceCell::new(),
            cache: Cache::new(config.cache.max_entries),
            llm: CompletionClient::new(&config.apis)?,
            email: EmailClient::new(&config.apis)?,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn tunnel(&self, id: TargetId) -> Result<&TunnelManager> {
        self.tunnels
            .get(&id)
            .ok_or_else(|| Error::configuration_missing(id.name(), "target"))
    }

    /// The direct database, created on first use.
    pub async fn direct(&self) -> Result<Arc<dyn Database>> {
        let direct_config = &self.direct_config;
        self.direct
            .get_or_try_init(|| async move {
                let db = PostgresDatabase::connect_lazy(direct_config)?;
                Ok::<_, Error>(Arc::new(db) as Arc<dyn Database>)
            })
            .await
            .cloned()
    }

    pub async fn query_direct(&self, stmt: &Statement) -> Result<Vec<Row>> {
        self.direct().await?.query(&stmt.sql, &stmt.params).await
    }

    pub async fn query_target(&self, id: TargetId, stmt: &Statement) -> Result<Vec<Row>> {
        self.tunnel(id)?.execute(&stmt.sql, &stmt.params).await
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn llm(&self) -> &CompletionClient {
        &self.llm
    }

    pub fn email(&self) -> &EmailClient {
        &self.email
    }

    /// Configuration and connection state of every data source.
    pub async fn status(&self) -> Value {
        let mut tunnels = serde_json::Map::new();
        for (id, manager) in &self.tunnels {
            tunnels.insert(
                id.name().to_string(),
                json!({
                    "configured": manager.is_configured(),
                    "state": manager.state().await.as_str(),
                }),
            );
        }
        json!({
            "direct": {
                "configured": self.direct_config.url.is_some(),
                "connected": self.direct.initialized(),
            },
            "tunnels": tunnels,
            "completion": { "configured": self.llm.is_configured() },
            "email": { "configured": self.email.is_configured() },
        })
    }

    /// Close every tunnel and the direct pool. Later calls do nothing.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        join_all(self.tunnels.values().map(TunnelManager::shutdown)).await;
        if let Some(db) = self.direct.get() {
            db.close().await;
        }
        self.cache.clear();
        info!("shutdown complete");
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{context, RecordingDatabase};
    use super::*;

    #[tokio::test]
    async fn missing_direct_url_is_configuration_error() {
        let ctx = AppContext::from_config(&Config::default()).unwrap();
        let err = ctx.direct().await.err().unwrap();
        assert!(matches!(err, Error::ConfigurationMissing { .. }));
        assert!(err.to_string().contains("direct"));
    }

    #[tokio::test]
    async fn unconfigured_target_reports_missing_fields() {
        let ctx = AppContext::from_config(&Config::default()).unwrap();
        let err = ctx
            .query_target(TargetId::Mis, &Statement::new("SELECT 1", Vec::new()))
            .await
            .unwrap_err();
        let Error::ConfigurationMissing { target, missing } = err else {
            panic!("expected configuration error, got {err:?}");
        };
        assert_eq!(target, "mis");
        assert!(missing.contains("host"));
    }

    #[tokio::test]
    async fn status_lists_every_source() {
        let ctx = AppContext::from_config(&Config::default()).unwrap();
        let status = ctx.status().await;
        assert_eq!(status["direct"]["configured"], false);
        assert_eq!(status["tunnels"]["tarms"]["state"], "idle");
        assert_eq!(status["tunnels"]["mis"]["configured"], false);
        assert_eq!(status["completion"]["configured"], false);
    }

    #[tokio::test]
    async fn shutdown_closes_direct_pool_once() {
        let db = Arc::new(RecordingDatabase::default());
        let ctx = context(db.clone());
        ctx.query_direct(&Statement::new("SELECT 1", Vec::new()))
            .await
            .unwrap();

        ctx.shutdown().await;
        assert!(db.closed.load(Ordering::SeqCst));
        db.closed.store(false, Ordering::SeqCst);
        ctx.shutdown().await;
        assert!(!db.closed.load(Ordering::SeqCst));
    }
}
