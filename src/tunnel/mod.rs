//! SSH port-forwarded database tunnels.
//!
//! ```text
//! TunnelManager (one per target)
//!   └── TunnelSession (at most one live)
//!         ├── ShellSession    authenticated SSH connection
//!         ├── PortForwarder   127.0.0.1:<ephemeral> → direct-tcpip channel per socket
//!         └── Database        pool connecting to the forwarder's address
//! ```
//!
//! The transport and the pool sit behind traits so the lifecycle can be
//! exercised in-process.

pub mod manager;
pub mod relay;
pub mod ssh;

use std::io;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

pub use manager::{TunnelManager, TunnelSession, TunnelState};
pub use relay::{DuplexPipe, PortForwarder};
pub use ssh::SshConnector;

/// Byte stream of one forwarded channel.
pub trait ForwardIo: AsyncRead + AsyncWrite + Send {}

impl<T: AsyncRead + AsyncWrite + Send> ForwardIo for T {}

pub type ForwardStream = Pin<Box<dyn ForwardIo>>;

/// Opens authenticated shell sessions to one remote host.
#[async_trait]
pub trait Connector: Send + Sync {
    /// TCP connect, handshake and authenticate. Failures are setup errors.
    async fn connect(&self) -> Result<Arc<dyn ShellSession>>;
}

/// One authenticated shell session that can carry forwarded channels.
#[async_trait]
pub trait ShellSession: Send + Sync {
    /// Open a fresh channel to the remote database port.
    async fn open_forward(&self) -> io::Result<ForwardStream>;

    /// True once the transport has ended (EOF, error, disconnect).
    fn is_closed(&self) -> bool;

    /// Disconnect. Best-effort and safe to call more than once.
    async fn close(&self);
}
