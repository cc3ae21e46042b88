//! Per-target tunnel lifecycle.
//!
//! ```text
//! Idle ──ensure_ready──▶ Connecting ──handshake+forward+pool──▶ Ready
//!  ▲                         │                                   │
//!  └──── setup failure ──────┘◀──── transient error / closed ────┘
//! ```
//!
//! Setup runs in its own task and is shared through a cloneable future, so
//! every concurrent caller observes the same outcome and a caller that stops
//! waiting does not cancel it. There is no background reconnect: the next
//! demand call re-establishes.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::relay::PortForwarder;
use super::ssh::SshConnector;
use super::{Connector, ShellSession};
use crate::config::{TargetConfig, TargetId};
use crate::db::mysql::MySqlFactory;
use crate::db::{Database, DatabaseFactory, Row, SqlParam};
use crate::error::{Error, Result};

/// Externally visible tunnel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Idle,
    Connecting,
    Ready,
    /// Idle, and the most recent setup attempt failed.
    Failed,
}

impl TunnelState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upper bound on waiting for in-flight pool connections during close.
const POOL_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// One live forwarded path: shell session, relay listener and pool.
pub struct TunnelSession {
    target: TargetId,
    shell: Arc<dyn ShellSession>,
    forwarder: PortForwarder,
    database: Arc<dyn Database>,
    closed: AtomicBool,
}

impl TunnelSession {
    pub fn local_addr(&self) -> SocketAddr {
        self.forwarder.local_addr()
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.database
    }

    /// True once closed locally or once the shell transport has ended.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.shell.is_closed()
    }

    /// Close listener, shell session and pool, in that order. Only the first
    /// call does anything.
    ///
    /// The pool's close waits for checked-out connections, which only end
    /// once the relay under them is gone.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.forwarder.close().await;
        self.shell.close().await;
        if tokio::time::timeout(POOL_DRAIN_TIMEOUT, self.database.close())
            .await
            .is_err()
        {
            warn!(tunnel = %self.target, "pool did not drain in time, abandoning connections");
        }
        debug!(tunnel = %self.target, port = self.local_addr().port(), "tunnel session closed");
    }
}

type SharedSetup = Shared<BoxFuture<'static, Result<Arc<TunnelSession>>>>;

enum State {
    Idle,
    Connecting { generation: u64, setup: SharedSetup },
    Ready(Arc<TunnelSession>),
}

struct Slot {
    state: State,
    generation: u64,
    last_error: Option<Error>,
}

struct Inner {
    target: TargetId,
    missing: Vec<&'static str>,
    connector: Arc<dyn Connector>,
    factory: Arc<dyn DatabaseFactory>,
    slot: Mutex<Slot>,
}

/// Owns at most one [`TunnelSession`] for one target. Cheap to clone.
#[derive(Clone)]
pub struct TunnelManager {
    inner: Arc<Inner>,
}

impl TunnelManager {
    /// `missing` lists required settings that are absent; when non-empty
    /// every call fails with [`Error::ConfigurationMissing`] without connecting.
    pub fn new(
        target: TargetId,
        missing: Vec<&'static str>,
        connector: Arc<dyn Connector>,
        factory: Arc<dyn DatabaseFactory>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                target,
                missing,
                connector,
                factory,
                slot: Mutex::new(Slot {
                    state: State::Idle,
                    generation: 0,
                    last_error: None,
                }),
            }),
        }
    }

    /// SSH transport and MySQL pool for a configured target.
    pub fn from_config(target: TargetId, config: &TargetConfig) -> Self {
        Self::new(
            target,
            config.missing_credentials(),
            Arc::new(SshConnector::from_config(target, config)),
            Arc::new(MySqlFactory::from_config(config)),
        )
    }

    pub fn target(&self) -> TargetId {
        self.inner.target
    }

    pub fn is_configured(&self) -> bool {
        self.inner.missing.is_empty()
    }

    pub async fn state(&self) -> TunnelState {
        let slot = self.inner.slot.lock().await;
        match &slot.state {
            State::Ready(_) => TunnelState::Ready,
            State::Connecting { .. } => TunnelState::Connecting,
            State::Idle if slot.last_error.is_some() => TunnelState::Failed,
            State::Idle => TunnelState::Idle,
        }
    }

    /// Return the live session, starting or joining a setup if needed.
    pub async fn ensure_ready(&self) -> Result<Arc<TunnelSession>> {
        if !self.inner.missing.is_empty() {
            return Err(Error::configuration_missing(
                self.inner.target.name(),
                self.inner.missing.join(", "),
            ));
        }

        let (setup, stale) = {
            let mut slot = self.inner.slot.lock().await;
            let mut stale = None;
            if let State::Ready(session) = &slot.state {
                if !session.is_closed() {
                    return Ok(session.clone());
                }
                warn!(tunnel = %self.inner.target, "tunnel transport closed, re-establishing");
                stale = Some(session.clone());
                slot.state = State::Idle;
            }
            let setup = match &slot.state {
                State::Connecting { setup, .. } => setup.clone(),
                _ => self.start_setup(&mut slot),
            };
            (setup, stale)
        };

        if let Some(stale) = stale {
            stale.close().await;
        }
        setup.await
    }

    /// Run a query, re-establishing the tunnel and retrying once on a
    /// transient connection error.
    pub async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>> {
        let session = self.ensure_ready().await?;
        let err = match session.database().query(sql, params).await {
            Ok(rows) => return Ok(rows),
            Err(e) => e,
        };

        let Some(kind) = err.transient_kind() else {
            return Err(err);
        };
        warn!(tunnel = %self.inner.target, %kind, error = %err, "transient connection error, retrying once");
        self.invalidate(&session).await;

        let session = self.ensure_ready().await?;
        session.database().query(sql, params).await
    }

    /// Tear down every owned resource and return to Idle. A setup in flight
    /// is abandoned: its waiters receive [`Error::Shutdown`].
    pub async fn shutdown(&self) {
        let previous = {
            let mut slot = self.inner.slot.lock().await;
            slot.last_error = None;
            std::mem::replace(&mut slot.state, State::Idle)
        };
        match previous {
            State::Ready(session) => {
                session.close().await;
                info!(tunnel = %self.inner.target, "tunnel shut down");
            }
            State::Connecting { .. } => {
                info!(tunnel = %self.inner.target, "tunnel setup abandoned by shutdown");
            }
            State::Idle => {}
        }
    }

    /// Drop `session` if it is still the current one, then close it.
    async fn invalidate(&self, session: &Arc<TunnelSession>) {
        {
            let mut slot = self.inner.slot.lock().await;
            if matches!(&slot.state, State::Ready(current) if Arc::ptr_eq(current, session)) {
                slot.state = State::Idle;
            }
        }
        session.close().await;
    }

    fn start_setup(&self, slot: &mut Slot) -> SharedSetup {
        slot.generation += 1;
        let generation = slot.generation;
        let target = self.inner.target;
        info!(tunnel = %target, generation, "establishing tunnel");

        let task = tokio::spawn(self.inner.clone().run_setup(generation));
        let setup = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(Error::setup(target.name(), format!("setup task failed: {e}"))),
            }
        }
        .boxed()
        .shared();

        slot.state = State::Connecting {
            generation,
            setup: setup.clone(),
        };
        setup
    }
}

impl Inner {
    async fn run_setup(self: Arc<Self>, generation: u64) -> Result<Arc<TunnelSession>> {
        let result = self.establish().await;

        let mut slot = self.slot.lock().await;
        let current = matches!(
            &slot.state,
            State::Connecting { generation: g, .. } if *g == generation
        );
        if !current {
            drop(slot);
            if let Ok(session) = result {
                session.close().await;
            }
            return Err(Error::Shutdown(format!(
                "{} tunnel was shut down during setup",
                self.target
            )));
        }

        match result {
            Ok(session) => {
                info!(tunnel = %self.target, port = session.local_addr().port(), "tunnel ready");
                slot.state = State::Ready(session.clone());
                slot.last_error = None;
                Ok(session)
            }
            Err(e) => {
                warn!(tunnel = %self.target, error = %e, "tunnel setup failed");
                slot.state = State::Idle;
                slot.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<Arc<TunnelSession>> {
        let shell = self.connector.connect().await.map_err(|e| self.setup_error(e))?;
        match self.attach(shell.clone()).await {
            Ok(session) => Ok(session),
            Err(e) => {
                shell.close().await;
                Err(e)
            }
        }
    }

    /// Probe forwarding, start the relay, then build the pool against it.
    async fn attach(&self, shell: Arc<dyn ShellSession>) -> Result<Arc<TunnelSession>> {
        let target = self.target.name();

        let mut probe = shell
            .open_forward()
            .await
            .map_err(|e| Error::setup(target, format!("port forward refused: {e}")))?;
        if let Err(e) = probe.shutdown().await {
            debug!(tunnel = %self.target, error = %e, "probe channel shutdown failed");
        }
        drop(probe);

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| Error::setup(target, format!("local listener bind failed: {e}")))?;
        let forwarder = PortForwarder::spawn(listener, shell.clone(), self.target)
            .map_err(|e| Error::setup(target, format!("local listener unusable: {e}")))?;

        let database = match self.factory.create(forwarder.local_addr()).await {
            Ok(database) => database,
            Err(e) => {
                forwarder.close().await;
                return Err(self.setup_error(e));
            }
        };

        Ok(Arc::new(TunnelSession {
            target: self.target,
            shell,
            forwarder,
            database,
            closed: AtomicBool::new(false),
        }))
    }

    fn setup_error(&self, err: Error) -> Error {
        match err {
            Error::Setup { .. } => err,
            other => Error::setup(self.target.name(), other),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Notify;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::error::TransientKind;
    use crate::tunnel::ForwardStream;

    #[derive(Default)]
    struct FakeShell {
        closed: AtomicBool,
        close_calls: AtomicUsize,
    }

    #[async_trait]
    impl ShellSession for FakeShell {
        async fn open_forward(&self) -> io::Result<ForwardStream> {
            let (local, _remote) = tokio::io::duplex(64);
            Ok(Box::pin(local))
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        async fn close(&self) {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Counts handshakes; optionally blocks each one until released.
    #[derive(Default)]
    struct FakeConnector {
        handshakes: AtomicUsize,
        gate: Option<Arc<Notify>>,
        fail: AtomicBool,
        shells: std::sync::Mutex<Vec<Arc<FakeShell>>>,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self) -> Result<Arc<dyn ShellSession>> {
            self.handshakes.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::setup("tarms", "authentication rejected"));
            }
            let shell = Arc::new(FakeShell::default());
            self.shells.lock().unwrap().push(shell.clone());
            Ok(shell)
        }
    }

    /// Scripted query outcomes shared by every pool the factory builds.
    #[derive(Default)]
    struct Script {
        outcomes: std::sync::Mutex<VecDeque<Result<Vec<Row>>>>,
        attempts: AtomicUsize,
        block: Option<Arc<Notify>>,
        entered: Notify,
    }

    struct FakeDatabase {
        script: Arc<Script>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Database for FakeDatabase {
        async fn query(&self, _sql: &str, _params: &[SqlParam]) -> Result<Vec<Row>> {
            self.script.attempts.fetch_add(1, Ordering::SeqCst);
            self.script.entered.notify_one();
            if let Some(block) = &self.script.block {
                block.notified().await;
            }
            self.script
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![one_row()]))
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeFactory {
        script: Arc<Script>,
        pools: std::sync::Mutex<Vec<Arc<AtomicBool>>>,
    }

    #[async_trait]
    impl DatabaseFactory for FakeFactory {
        async fn create(&self, endpoint: SocketAddr) -> Result<Arc<dyn Database>> {
            assert!(endpoint.ip().is_loopback());
            assert_ne!(endpoint.port(), 0);
            let closed = Arc::new(AtomicBool::new(false));
            self.pools.lock().unwrap().push(closed.clone());
            Ok(Arc::new(FakeDatabase {
                script: self.script.clone(),
                closed,
            }))
        }
    }

    /// Session whose pool behaves like a draining sqlx pool: the in-flight
    /// query only ends once the transport under it is gone, and `close`
    /// waits for that query.
    #[derive(Default)]
    struct Teardown {
        order: std::sync::Mutex<Vec<&'static str>>,
        transport_down: CancellationToken,
        query_started: Notify,
        query_done: CancellationToken,
        connects: AtomicUsize,
    }

    struct DrainingShell(Arc<Teardown>);

    #[async_trait]
    impl ShellSession for DrainingShell {
        async fn open_forward(&self) -> io::Result<ForwardStream> {
            let (local, _remote) = tokio::io::duplex(64);
            Ok(Box::pin(local))
        }

        fn is_closed(&self) -> bool {
            self.0.transport_down.is_cancelled()
        }

        async fn close(&self) {
            self.0.order.lock().unwrap().push("shell");
            self.0.transport_down.cancel();
        }
    }

    struct DrainingConnector(Arc<Teardown>);

    #[async_trait]
    impl Connector for DrainingConnector {
        async fn connect(&self) -> Result<Arc<dyn ShellSession>> {
            if self.0.connects.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(Error::setup("mis", "host unreachable"));
            }
            Ok(Arc::new(DrainingShell(self.0.clone())))
        }
    }

    struct DrainingDatabase(Arc<Teardown>);

    #[async_trait]
    impl Database for DrainingDatabase {
        async fn query(&self, _sql: &str, _params: &[SqlParam]) -> Result<Vec<Row>> {
            self.0.query_started.notify_one();
            self.0.transport_down.cancelled().await;
            self.0.query_done.cancel();
            Err(Error::transient(TransientKind::ConnectionLost, "server closed the connection"))
        }

        async fn close(&self) {
            self.0.order.lock().unwrap().push("pool");
            self.0.query_done.cancelled().await;
        }
    }

    struct DrainingFactory(Arc<Teardown>);

    #[async_trait]
    impl DatabaseFactory for DrainingFactory {
        async fn create(&self, _endpoint: SocketAddr) -> Result<Arc<dyn Database>> {
            Ok(Arc::new(DrainingDatabase(self.0.clone())))
        }
    }

    fn one_row() -> Row {
        let mut row = Row::new();
        row.insert("1".into(), json!(1));
        row
    }

    fn reset() -> Error {
        Error::transient(TransientKind::ConnectionReset, "connection reset by peer")
    }

    fn manager(connector: Arc<FakeConnector>, factory: Arc<FakeFactory>) -> TunnelManager {
        TunnelManager::new(TargetId::Tarms, Vec::new(), connector, factory)
    }

    #[tokio::test]
    async fn concurrent_ensure_ready_shares_one_handshake() {
        let gate = Arc::new(Notify::new());
        let connector = Arc::new(FakeConnector {
            gate: Some(gate.clone()),
            ..FakeConnector::default()
        });
        let mgr = manager(connector.clone(), Arc::new(FakeFactory::default()));

        let a = tokio::spawn({
            let mgr = mgr.clone();
            async move { mgr.ensure_ready().await }
        });
        let b = tokio::spawn({
            let mgr = mgr.clone();
            async move { mgr.ensure_ready().await }
        });

        while connector.handshakes.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(mgr.state().await, TunnelState::Connecting);
        gate.notify_one();

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(connector.handshakes.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.state().await, TunnelState::Ready);

        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn ready_session_is_reused() {
        let connector = Arc::new(FakeConnector::default());
        let mgr = manager(connector.clone(), Arc::new(FakeFactory::default()));

        let first = mgr.ensure_ready().await.unwrap();
        let second = mgr.ensure_ready().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.handshakes.load(Ordering::SeqCst), 1);
        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn reset_then_success_retries_once() {
        let connector = Arc::new(FakeConnector::default());
        let factory = Arc::new(FakeFactory::default());
        factory.script.outcomes.lock().unwrap().push_back(Err(reset()));
        let mgr = manager(connector.clone(), factory.clone());

        let rows = mgr.execute("SELECT 1", &[]).await.unwrap();
        assert_eq!(rows, vec![one_row()]);
        assert_eq!(factory.script.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(connector.handshakes.load(Ordering::SeqCst), 2);

        // the first session was torn down
        assert!(factory.pools.lock().unwrap()[0].load(Ordering::SeqCst));
        assert!(connector.shells.lock().unwrap()[0].is_closed());
        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn second_transient_failure_keeps_its_classification() {
        let connector = Arc::new(FakeConnector::default());
        let factory = Arc::new(FakeFactory::default());
        {
            let mut outcomes = factory.script.outcomes.lock().unwrap();
            outcomes.push_back(Err(reset()));
            outcomes.push_back(Err(reset()));
        }
        let mgr = manager(connector, factory.clone());

        let err = mgr.execute("SELECT 1", &[]).await.unwrap_err();
        assert_eq!(err.transient_kind(), Some(TransientKind::ConnectionReset));
        assert_eq!(factory.script.attempts.load(Ordering::SeqCst), 2);
        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn query_errors_are_not_retried() {
        let connector = Arc::new(FakeConnector::default());
        let factory = Arc::new(FakeFactory::default());
        factory
            .script
            .outcomes
            .lock()
            .unwrap()
            .push_back(Err(Error::query("You have an error in your SQL syntax")));
        let mgr = manager(connector.clone(), factory.clone());

        let err = mgr.execute("SELEC 1", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Query(_)));
        assert_eq!(factory.script.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(connector.handshakes.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.state().await, TunnelState::Ready);
        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn missing_configuration_never_connects() {
        let connector = Arc::new(FakeConnector::default());
        let mgr = TunnelManager::new(
            TargetId::Mis,
            vec!["host", "db_password"],
            connector.clone(),
            Arc::new(FakeFactory::default()),
        );

        let err = mgr.execute("SELECT 1", &[]).await.unwrap_err();
        assert_eq!(
            err,
            Error::configuration_missing("mis", "host, db_password")
        );
        assert!(!mgr.is_configured());
        assert_eq!(connector.handshakes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn setup_failure_reaches_every_waiter_and_resets() {
        let gate = Arc::new(Notify::new());
        let connector = Arc::new(FakeConnector {
            gate: Some(gate.clone()),
            ..FakeConnector::default()
        });
        connector.fail.store(true, Ordering::SeqCst);
        let mgr = manager(connector.clone(), Arc::new(FakeFactory::default()));

        let a = tokio::spawn({
            let mgr = mgr.clone();
            async move { mgr.ensure_ready().await }
        });
        let b = tokio::spawn({
            let mgr = mgr.clone();
            async move { mgr.ensure_ready().await }
        });
        while connector.handshakes.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        assert!(matches!(a.await.unwrap().err().unwrap(), Error::Setup { .. }));
        assert!(matches!(b.await.unwrap().err().unwrap(), Error::Setup { .. }));
        assert_eq!(connector.handshakes.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.state().await, TunnelState::Failed);

        // the next demand call starts a fresh attempt
        connector.fail.store(false, Ordering::SeqCst);
        gate.notify_one();
        mgr.ensure_ready().await.unwrap();
        assert_eq!(connector.handshakes.load(Ordering::SeqCst), 2);
        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_during_query_then_fresh_session() {
        let connector = Arc::new(FakeConnector::default());
        let factory = Arc::new(FakeFactory {
            script: Arc::new(Script {
                block: Some(Arc::new(Notify::new())),
                ..Script::default()
            }),
            ..FakeFactory::default()
        });
        let mgr = manager(connector.clone(), factory.clone());

        let first = mgr.ensure_ready().await.unwrap();
        let in_flight = tokio::spawn({
            let mgr = mgr.clone();
            async move { mgr.execute("SELECT SLEEP(10)", &[]).await }
        });
        factory.script.entered.notified().await;

        mgr.shutdown().await;
        assert!(factory.pools.lock().unwrap()[0].load(Ordering::SeqCst));
        assert!(connector.shells.lock().unwrap()[0].is_closed());
        assert!(first.is_closed());
        assert_eq!(mgr.state().await, TunnelState::Idle);
        in_flight.abort();

        let second = mgr.ensure_ready().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(connector.handshakes.load(Ordering::SeqCst), 2);

        mgr.shutdown().await;
        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_while_connecting_rejects_waiters() {
        let gate = Arc::new(Notify::new());
        let connector = Arc::new(FakeConnector {
            gate: Some(gate.clone()),
            ..FakeConnector::default()
        });
        let mgr = manager(connector.clone(), Arc::new(FakeFactory::default()));

        let waiter = tokio::spawn({
            let mgr = mgr.clone();
            async move { mgr.ensure_ready().await }
        });
        while connector.handshakes.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        mgr.shutdown().await;
        gate.notify_one();

        let err = waiter.await.unwrap().err().unwrap();
        assert!(matches!(err, Error::Shutdown(_)), "{err}");
        // the abandoned session was closed, not installed
        tokio::time::timeout(Duration::from_secs(1), async {
            while !connector.shells.lock().unwrap()[0].is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(mgr.state().await, TunnelState::Idle);
    }

    #[tokio::test]
    async fn closed_transport_is_replaced_on_demand() {
        let connector = Arc::new(FakeConnector::default());
        let factory = Arc::new(FakeFactory::default());
        let mgr = manager(connector.clone(), factory.clone());

        let first = mgr.ensure_ready().await.unwrap();
        connector.shells.lock().unwrap()[0]
            .closed
            .store(true, Ordering::SeqCst);

        let second = mgr.ensure_ready().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(factory.pools.lock().unwrap()[0].load(Ordering::SeqCst));
        assert_eq!(connector.handshakes.load(Ordering::SeqCst), 2);
        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_breaks_transport_before_draining_pool() {
        let teardown = Arc::new(Teardown::default());
        let mgr = TunnelManager::new(
            TargetId::Mis,
            Vec::new(),
            Arc::new(DrainingConnector(teardown.clone())),
            Arc::new(DrainingFactory(teardown.clone())),
        );

        let session = mgr.ensure_ready().await.unwrap();
        let addr = session.local_addr();
        let in_flight = tokio::spawn({
            let mgr = mgr.clone();
            async move { mgr.execute("SELECT 1", &[]).await }
        });
        teardown.query_started.notified().await;

        tokio::time::timeout(Duration::from_secs(2), mgr.shutdown())
            .await
            .expect("shutdown waited on the in-flight query");
        assert_eq!(teardown.order.lock().unwrap()[..2], ["shell", "pool"]);
        assert!(session.is_closed());
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());

        // the retry after the lost connection cannot reconnect
        let err = in_flight.await.unwrap().err().unwrap();
        assert!(matches!(err, Error::Setup { .. }), "{err}");
        assert_eq!(mgr.state().await, TunnelState::Failed);
    }
}
