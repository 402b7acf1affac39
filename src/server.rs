//! Relay server - streams a local capture source to one TCP client at a time.
//!
//! A newly accepted connection displaces the active one: the old session is
//! cancelled, its socket shut down and its task joined before the new
//! session starts forwarding.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{CaptureError, RelayError, Result};
use crate::session::{SessionHandle, SessionManager};
use crate::source::MediaSource;

/// Why a forwarding session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// A newer client took over.
    Superseded,
    /// The server is shutting down.
    Shutdown,
    /// The client went away or a write failed.
    ClientGone,
    /// The capture source failed for this session.
    CaptureFailed(CaptureError),
}

/// Builder for creating a relay server.
pub struct RelayServerBuilder {
    host: String,
    port: u16,
    backlog: u32,
    max_capture_failures: u32,
    nodelay: bool,
}

impl RelayServerBuilder {
    /// Create a new builder with defaults (0.0.0.0:40917, backlog 1).
    pub fn new() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 40917,
            backlog: 1,
            max_capture_failures: 1,
            nodelay: true,
        }
    }

    /// Set the listen host (an IP address).
    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    /// Set the listen port (0 picks a free port).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the OS listen queue depth.
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog.max(1);
        self
    }

    /// Consecutive transient capture errors tolerated before a session ends.
    pub fn max_capture_failures(mut self, failures: u32) -> Self {
        self.max_capture_failures = failures.max(1);
        self
    }

    /// Set TCP_NODELAY on accepted sockets (default: true).
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Resolve the listen address.
    pub fn addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| RelayError::InvalidHost(self.host.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Bind the listening socket and build the server around `source`.
    pub async fn build<S: MediaSource>(self, source: S) -> Result<RelayServer<S>> {
        let addr = self.addr()?;
        let listen_err = |source: std::io::Error| RelayError::Listen { addr, source };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(listen_err)?;
        socket.set_reuseaddr(true).map_err(listen_err)?;
        socket.bind(addr).map_err(listen_err)?;
        let listener = socket.listen(self.backlog).map_err(listen_err)?;
        let local_addr = listener.local_addr().map_err(listen_err)?;

        tracing::info!("{} server listening on {}", source.kind(), local_addr);

        Ok(RelayServer {
            listener,
            local_addr,
            source: Arc::new(Mutex::new(source)),
            sessions: Arc::new(SessionManager::new()),
            max_capture_failures: self.max_capture_failures,
            nodelay: self.nodelay,
        })
    }
}

impl Default for RelayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A server that forwards a capture source to the most recent TCP client.
pub struct RelayServer<S: MediaSource> {
    listener: TcpListener,
    local_addr: SocketAddr,
    source: Arc<Mutex<S>>,
    sessions: Arc<SessionManager>,
    max_capture_failures: u32,
    nodelay: bool,
}

impl<S: MediaSource> RelayServer<S> {
    /// The bound listen address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The session slot shared with forwarding tasks.
    pub fn sessions(&self) -> Arc<SessionManager> {
        self.sessions.clone()
    }

    /// Run until the process is killed.
    pub async fn run(&self) -> Result<()> {
        self.run_until(CancellationToken::new()).await
    }

    /// Run the accept loop until `shutdown` is cancelled.
    pub async fn run_until(&self, shutdown: CancellationToken) -> Result<()> {
        let mut active_task: Option<JoinHandle<SessionOutcome>> = None;

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.listener.accept() => result,
            };

            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    continue;
                }
            };

            tracing::info!("New connection from {}", peer);

            if self.nodelay {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                }
            }

            let (handle, displaced) = self.sessions.supersede(peer);
            if let Some(old) = displaced {
                tracing::info!("Closed previous connection from {}", old.peer);
            }
            if let Some(task) = active_task.take() {
                // The old loop stops writing as soon as it observes the cancel.
                join_session(task).await;
            }

            let source = self.source.clone();
            let sessions = self.sessions.clone();
            let max_failures = self.max_capture_failures;
            let shutdown = shutdown.clone();
            active_task = Some(tokio::spawn(async move {
                let peer = handle.peer;
                let outcome =
                    forward(stream, handle, source, sessions, shutdown, max_failures).await;
                match &outcome {
                    SessionOutcome::CaptureFailed(e) => {
                        tracing::error!("Session for {} ended: {}", peer, e)
                    }
                    other => tracing::info!("Session for {} ended: {:?}", peer, other),
                }
                outcome
            }));
        }

        tracing::info!("Shutting down");
        self.sessions.close_current();
        if let Some(task) = active_task.take() {
            join_session(task).await;
        }
        Ok(())
    }
}

async fn join_session(task: JoinHandle<SessionOutcome>) {
    if let Err(e) = task.await {
        tracing::error!("Forwarding task failed: {}", e);
    }
}

/// Tell the source its last unit reached the client.
fn mark_delivered<S: MediaSource>(source: &Arc<Mutex<S>>) {
    source
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .unit_delivered();
}

/// Pull the next unit on the blocking pool.
async fn capture<S: MediaSource>(
    source: Arc<Mutex<S>>,
) -> std::result::Result<bytes::Bytes, CaptureError> {
    tokio::task::spawn_blocking(move || {
        let mut source = source.lock().unwrap_or_else(PoisonError::into_inner);
        source.next_unit()
    })
    .await
    .unwrap_or_else(|e| Err(CaptureError::Failed(format!("capture worker panicked: {}", e))))
}

/// Forwarding loop for one session. Owns and closes the socket.
async fn forward<S: MediaSource>(
    mut stream: TcpStream,
    handle: SessionHandle,
    source: Arc<Mutex<S>>,
    sessions: Arc<SessionManager>,
    shutdown: CancellationToken,
    max_failures: u32,
) -> SessionOutcome {
    let begin = {
        let source = source.clone();
        tokio::task::spawn_blocking(move || {
            source
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .begin_session()
        })
    };

    let mut failures = 0u32;
    let outcome = 'session: {
        tokio::select! {
            biased;
            _ = handle.cancel.cancelled() => break 'session SessionOutcome::Superseded,
            _ = begin => {}
        }

        loop {
            if !sessions.is_current(handle.id) {
                break SessionOutcome::Superseded;
            }

            let unit = tokio::select! {
                biased;
                _ = handle.cancel.cancelled() => break SessionOutcome::Superseded,
                result = capture(source.clone()) => result,
            };

            let unit = match unit {
                Ok(unit) => {
                    failures = 0;
                    unit
                }
                Err(CaptureError::Transient(msg)) => {
                    failures += 1;
                    tracing::warn!(
                        "Transient capture error ({}/{}): {}",
                        failures,
                        max_failures,
                        msg
                    );
                    if failures >= max_failures {
                        break SessionOutcome::CaptureFailed(CaptureError::Transient(msg));
                    }
                    continue;
                }
                Err(e) => break SessionOutcome::CaptureFailed(e),
            };

            tokio::select! {
                biased;
                _ = handle.cancel.cancelled() => break SessionOutcome::Superseded,
                result = stream.write_all(&unit) => {
                    if let Err(e) = result {
                        tracing::debug!("Write to {} failed: {}", handle.peer, e);
                        break SessionOutcome::ClientGone;
                    }
                    mark_delivered(&source);
                }
            }
        }
    };

    let outcome = match outcome {
        SessionOutcome::Superseded if shutdown.is_cancelled() => SessionOutcome::Shutdown,
        other => other,
    };

    let _ = stream.shutdown().await;
    drop(stream);
    sessions.release(handle.id);
    outcome
}
