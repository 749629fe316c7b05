//! Signaling relay server
//!
//! Accepts WebSocket connections on one path and floods every text frame
//! received from a connection, unmodified, to all other connections.
//! Frames are never interpreted here; only the client-side codec knows
//! message shapes, so any peer dialect passes through.

use super::registry::{SessionId, SessionRegistry};
use super::{enabled, keepalive, next_tick, tls, websocket_config};
use crate::config::RelayConfig;
use crate::signaling::{RelayListener, SignalingError};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, Instant};
use tokio_native_tls::TlsAcceptor;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::Message;

/// Relay lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Initializing,
    Running,
    Failed,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownPhase {
    Running,
    /// Not accepting; open connections keep relaying
    Draining,
    /// Connections flush and close
    Closing,
}

struct ConnectionContext {
    registry: Arc<SessionRegistry>,
    listener: Arc<dyn RelayListener>,
    path: String,
    max_frame_size: usize,
    ping_interval: Duration,
    /// `None` when idle connections are kept
    idle_timeout: Option<Duration>,
}

/// WebSocket relay server
pub struct RelayServer {
    config: RelayConfig,
    listener: Arc<dyn RelayListener>,
    registry: Arc<SessionRegistry>,
    state: RwLock<RelayState>,
    started: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
    shutdown_tx: watch::Sender<ShutdownPhase>,
    accept_task: Mutex<Option<JoinHandle<JoinSet<()>>>>,
}

impl RelayServer {
    /// Create a relay; nothing is bound until [`RelayServer::start`]
    pub fn new(config: RelayConfig, listener: Arc<dyn RelayListener>) -> Self {
        let (shutdown_tx, _) = watch::channel(ShutdownPhase::Running);
        Self {
            config,
            listener,
            registry: Arc::new(SessionRegistry::new()),
            state: RwLock::new(RelayState::Initializing),
            started: AtomicBool::new(false),
            local_addr: Mutex::new(None),
            shutdown_tx,
            accept_task: Mutex::new(None),
        }
    }

    /// Bind and start accepting.
    ///
    /// Returns once the bind outcome is known; accepting continues on a
    /// background task. A relay can be started once.
    pub async fn start(&self) -> Result<SocketAddr, SignalingError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SignalingError::Config("relay was already started".to_string()));
        }

        let acceptor = match self.config.tls.as_ref().map(tls::load_acceptor).transpose() {
            Ok(acceptor) => acceptor,
            Err(e) => {
                error!("Relay TLS setup failed: {}", e);
                self.fail();
                return Err(e);
            }
        };

        let addr = self.config.bind_addr();
        let tcp = match TcpListener::bind(&addr).await {
            Ok(tcp) => tcp,
            Err(e) => {
                error!("Relay failed to bind {}: {}", addr, e);
                self.fail();
                return Err(SignalingError::BindFailure(e));
            }
        };
        let local_addr = match tcp.local_addr() {
            Ok(local_addr) => local_addr,
            Err(e) => {
                self.fail();
                return Err(SignalingError::BindFailure(e));
            }
        };

        let scheme = if acceptor.is_some() { "wss" } else { "ws" };
        info!("Relay listening on {}://{}{}", scheme, local_addr, self.config.path);

        let ctx = Arc::new(ConnectionContext {
            registry: self.registry.clone(),
            listener: self.listener.clone(),
            path: self.config.path.clone(),
            max_frame_size: self.config.max_frame_size,
            ping_interval: self.config.ping_interval(),
            idle_timeout: enabled(self.config.idle_timeout()),
        });
        let shutdown = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(accept_loop(tcp, acceptor, ctx, shutdown));

        *self.accept_task.lock() = Some(handle);
        *self.local_addr.lock() = Some(local_addr);
        *self.state.write() = RelayState::Running;
        self.listener.on_server_running();

        Ok(local_addr)
    }

    /// Stop accepting, let in-flight frames drain for the grace period, then
    /// close what is left and drop anything still open at the hard timeout.
    pub async fn stop(&self) {
        let Some(handle) = self.accept_task.lock().take() else {
            return;
        };

        let deadline = Instant::now() + self.config.stop_timeout();
        self.shutdown_tx.send_replace(ShutdownPhase::Draining);

        let mut connections = match handle.await {
            Ok(connections) => connections,
            Err(e) => {
                error!("Relay accept loop failed: {}", e);
                JoinSet::new()
            }
        };

        if !connections.is_empty() {
            info!("Draining {} relay connection(s)", connections.len());
        }
        if time::timeout(self.config.stop_grace(), join_all(&mut connections))
            .await
            .is_err()
        {
            info!("Grace period over, closing {} connection(s)", connections.len());
            self.shutdown_tx.send_replace(ShutdownPhase::Closing);
            if time::timeout_at(deadline, join_all(&mut connections))
                .await
                .is_err()
            {
                warn!("Stop timeout reached, dropping {} connection(s)", connections.len());
                connections.shutdown().await;
            }
        }

        *self.state.write() = RelayState::Stopped;
        info!("Relay stopped");
    }

    /// Number of live connections
    pub fn connections(&self) -> usize {
        self.registry.len()
    }

    pub fn state(&self) -> RelayState {
        *self.state.read()
    }

    /// Bound address once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    fn fail(&self) {
        *self.state.write() = RelayState::Failed;
        self.listener.on_server_failed();
    }
}

async fn join_all(connections: &mut JoinSet<()>) {
    while connections.join_next().await.is_some() {}
}

async fn accept_loop(
    tcp: TcpListener,
    acceptor: Option<TlsAcceptor>,
    ctx: Arc<ConnectionContext>,
    mut shutdown: watch::Receiver<ShutdownPhase>,
) -> JoinSet<()> {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = tcp.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Accept failed: {}", e);
                        time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                };
                debug!("New connection from {}", peer);

                let ctx = ctx.clone();
                let acceptor = acceptor.clone();
                let phase = shutdown.clone();
                connections.spawn(async move {
                    let result = match acceptor {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(stream) => serve_connection(stream, peer, ctx, phase).await,
                            Err(e) => {
                                warn!("TLS handshake with {} failed: {}", peer, e);
                                return;
                            }
                        },
                        None => serve_connection(stream, peer, ctx, phase).await,
                    };
                    if let Err(e) = result {
                        debug!("Connection {} ended: {}", peer, e);
                    }
                });
            }
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("Relay connection task panicked: {}", e);
                    }
                }
            }
        }
    }

    info!("Relay stopped accepting connections");
    connections
}

/// Removes the session and reports the abort on every exit path, task abort included
struct SessionGuard {
    id: SessionId,
    ctx: Arc<ConnectionContext>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let (removed, count) = self.ctx.registry.remove(&self.id);
        if removed {
            info!("Removing client with ID: {} ({} connected)", self.id, count);
            self.ctx.listener.on_connection_aborted();
        }
    }
}

/// Resolves once the peer has been silent for `idle`; never when idle drop is off
async fn idle_expiry(last_seen: Instant, idle: Option<Duration>) {
    match idle {
        Some(idle) => time::sleep_until(last_seen + idle).await,
        None => std::future::pending().await,
    }
}

async fn serve_connection<S>(
    stream: S,
    peer: SocketAddr,
    ctx: Arc<ConnectionContext>,
    mut phase: watch::Receiver<ShutdownPhase>,
) -> Result<(), SignalingError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let path = ctx.path.clone();
    let check_path = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if request.uri().path() == path {
            Ok(response)
        } else {
            let mut rejection =
                ErrorResponse::new(Some(format!("No signaling endpoint at {}", request.uri().path())));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    let handshake = tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        check_path,
        Some(websocket_config(ctx.max_frame_size)),
    );
    let handshake = match ctx.idle_timeout {
        Some(limit) => time::timeout(limit, handshake).await,
        None => Ok(handshake.await),
    };
    let ws = match handshake {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            return Err(SignalingError::ConnectFailure(format!("handshake with {}: {}", peer, e)))
        }
        Err(_) => {
            return Err(SignalingError::ConnectFailure(format!("handshake with {} timed out", peer)))
        }
    };

    let (mut write, mut read) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let id = SessionId::generate();
    let count = ctx.registry.insert(id.clone(), tx.clone());
    info!("New client connected with ID: {} from {} ({} connected)", id, peer, count);
    let _guard = SessionGuard {
        id: id.clone(),
        ctx: ctx.clone(),
    };
    ctx.listener.on_connection_established();

    let mut ping = keepalive(ctx.ping_interval);
    let mut last_seen = Instant::now();
    let mut closing = false;

    loop {
        tokio::select! {
            frame = read.next() => {
                last_seen = Instant::now();
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        trace!("Received from {}: {}", id, text);
                        let delivered = ctx.registry.broadcast_except(&id, &text);
                        trace!("Relayed frame from {} to {} client(s)", id, delivered);
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!("Ignoring binary frame ({} bytes) from {}", data.len(), id);
                    }
                    // tungstenite answers pings itself
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client {} closed the connection", id);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error (id={}): {}", id, e);
                        break;
                    }
                }
            }
            Some(message) = rx.recv() => {
                if let Err(e) = write.send(message).await {
                    warn!("WebSocket send error (id={}): {}", id, e);
                    break;
                }
            }
            _ = next_tick(&mut ping) => {
                let _ = tx.send(Message::Ping(Vec::new()));
            }
            _ = idle_expiry(last_seen, ctx.idle_timeout) => {
                warn!("Client {} silent for {:?}, dropping", id, last_seen.elapsed());
                break;
            }
            changed = phase.changed() => {
                if changed.is_err() || *phase.borrow() == ShutdownPhase::Closing {
                    closing = true;
                    break;
                }
            }
        }
    }

    if closing {
        // Flush frames already queued for this client before closing
        while let Ok(message) = rx.try_recv() {
            if write.send(message).await.is_err() {
                return Ok(());
            }
        }
        let _ = write.send(Message::Close(None)).await;
    }

    Ok(())
}
