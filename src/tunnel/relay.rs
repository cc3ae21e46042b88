//! Local relay: every socket accepted on the loopback listener is spliced to
//! its own forwarded channel.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ShellSession;
use crate::config::TargetId;

/// Back-off after a failed `accept` so a persistent error cannot spin.
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

/// Full-duplex splice of two byte streams. Either side reaching EOF shuts
/// down the other side's write half; an error on either side ends both.
pub struct DuplexPipe<A, B> {
    local: A,
    remote: B,
}

impl<A, B> DuplexPipe<A, B>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(local: A, remote: B) -> Self {
        Self { local, remote }
    }

    /// Run until both directions finish. Returns bytes copied
    /// `(local → remote, remote → local)`.
    pub async fn run(mut self) -> io::Result<(u64, u64)> {
        tokio::io::copy_bidirectional(&mut self.local, &mut self.remote).await
    }
}

/// Accept loop over a loopback listener, bound to one shell session.
pub struct PortForwarder {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PortForwarder {
    /// Start relaying on an already bound listener. The listener's address
    /// is the endpoint the pool connects to.
    pub fn spawn(
        listener: TcpListener,
        shell: Arc<dyn ShellSession>,
        target: TargetId,
    ) -> io::Result<Self> {
        let local_addr = listener.local_addr()?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(accept_loop(listener, shell, cancel.clone(), target));
        debug!(tunnel = %target, %local_addr, "relay listening");
        Ok(Self {
            local_addr,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, drop the listener and abort every live pipe.
    pub async fn close(&self) {
        self.cancel.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                debug!(error = %e, "relay task ended abnormally");
            }
        }
    }
}

impl Drop for PortForwarder {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    shell: Arc<dyn ShellSession>,
    cancel: CancellationToken,
    target: TargetId,
) {
    let mut pipes = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    pipes.spawn(relay_connection(socket, peer, shell.clone(), target));
                }
                Err(e) => {
                    warn!(tunnel = %target, error = %e, "relay accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
                }
            },
            Some(_) = pipes.join_next(), if !pipes.is_empty() => {}
        }
    }

    drop(listener);
    pipes.shutdown().await;
    debug!(tunnel = %target, "relay stopped");
}

async fn relay_connection(
    socket: TcpStream,
    peer: SocketAddr,
    shell: Arc<dyn ShellSession>,
    target: TargetId,
) {
    let channel = match shell.open_forward().await {
        Ok(channel) => channel,
        Err(e) => {
            // Dropping the socket closes it; the pool sees the failure.
            warn!(tunnel = %target, %peer, error = %e, "forwarded channel refused");
            return;
        }
    };

    match DuplexPipe::new(socket, channel).run().await {
        Ok((sent, received)) => {
            debug!(tunnel = %target, %peer, sent, received, "relay connection closed");
        }
        Err(e) => {
            debug!(tunnel = %target, %peer, error = %e, "relay connection ended with error");
        }
    }
}
