//! Signaling client
//!
//! Keeps one outbound WebSocket connection to a relay. Outbound messages go
//! through a single latest-wins slot and are encoded in the configured
//! dialect; inbound frames are decoded and handed to the listener. The client
//! tracks its own state and attempt counter, but whether to retry is left to
//! the owner.

use super::{keepalive, next_tick, tls, websocket_config};
use crate::config::ClientConfig;
use crate::signaling::{
    MessageCodec, SdpKind, SignalingClientListener, SignalingError, SignalingMessage,
};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Initializing,
    Connecting,
    Established,
    Aborted,
    Failed,
}

/// Conflated outbound channel: holds at most one message, newer replaces older
#[derive(Default)]
struct OutboundSlot {
    value: Mutex<Option<SignalingMessage>>,
    notify: Notify,
}

impl OutboundSlot {
    fn put(&self, message: SignalingMessage) {
        if let Some(superseded) = self.value.lock().replace(message) {
            trace!("Outbound {} superseded before it was sent", superseded.label());
        }
        self.notify.notify_one();
    }

    fn take(&self) -> Option<SignalingMessage> {
        self.value.lock().take()
    }
}

struct ClientInner {
    config: ClientConfig,
    listener: Arc<dyn SignalingClientListener>,
    state: RwLock<ClientState>,
    retries_done: AtomicU32,
    outbound: OutboundSlot,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Bumped by every connect and by destroy; older attempts stay silent
    generation: AtomicU64,
    destroyed: AtomicBool,
}

/// Handle to a signaling client; clones share the same connection
#[derive(Clone)]
pub struct SignalingClient {
    inner: Arc<ClientInner>,
}

impl SignalingClient {
    pub fn new(config: ClientConfig, listener: Arc<dyn SignalingClientListener>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                listener,
                state: RwLock::new(ClientState::Initializing),
                retries_done: AtomicU32::new(0),
                outbound: OutboundSlot::default(),
                tasks: Mutex::new(Vec::new()),
                generation: AtomicU64::new(0),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    /// Schedule a connection attempt to `host:port` at `path`.
    ///
    /// Returns immediately; the attempt runs on its own task after
    /// `wait_millis`. A connection from an earlier call is dropped without
    /// callbacks. Must be called within a Tokio runtime.
    pub fn connect(
        &self,
        host: &str,
        port: u16,
        path: &str,
        wait_millis: u64,
    ) -> Result<(), SignalingError> {
        let scheme = if self.inner.config.secure { "wss" } else { "ws" };
        let url = format!("{}://{}:{}{}", scheme, host, port, path);

        // Held across the spawn so destroy() cannot slip in between
        let mut tasks = self.inner.tasks.lock();
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Err(SignalingError::Destroyed);
        }
        for previous in tasks.drain(..) {
            if !previous.is_finished() {
                debug!("Dropping previous relay connection");
                previous.abort();
            }
        }

        let generation = {
            let mut state = self.inner.state.write();
            if *state != ClientState::Connecting {
                debug!("Signaling client {:?} -> Connecting", *state);
            }
            *state = ClientState::Connecting;
            self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        let inner = self.inner.clone();
        tasks.push(tokio::spawn(async move {
            if wait_millis > 0 {
                time::sleep(Duration::from_millis(wait_millis)).await;
            }
            inner.attempt(&url, generation).await;
        }));
        Ok(())
    }

    /// Connect to the relay named in the client configuration
    pub fn connect_configured(&self, wait_millis: u64) -> Result<(), SignalingError> {
        let config = &self.inner.config;
        self.connect(&config.host, config.port, &config.path, wait_millis)
    }

    /// Queue a message for the relay, replacing any message not yet sent
    pub fn send(&self, message: impl Into<SignalingMessage>) {
        self.inner.outbound.put(message.into());
    }

    /// Cancel all background work and release the connection. No listener
    /// callback fires.
    pub fn destroy(&self) {
        let mut tasks = self.inner.tasks.lock();
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        for task in tasks.drain(..) {
            task.abort();
        }
        drop(tasks);

        let mut state = self.inner.state.write();
        if matches!(*state, ClientState::Connecting | ClientState::Established) {
            *state = ClientState::Aborted;
        }
        info!("Signaling client destroyed");
    }

    pub fn state(&self) -> ClientState {
        *self.inner.state.read()
    }

    pub fn retries_done(&self) -> u32 {
        self.inner.retries_done.load(Ordering::SeqCst)
    }

    pub fn retries_total(&self) -> u32 {
        self.inner.config.retries_total
    }

    pub fn has_retries_left(&self) -> bool {
        self.retries_done() < self.retries_total()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }
}

impl ClientInner {
    /// Move to `state` on behalf of attempt `generation`, unless a later
    /// connect or destroy superseded it
    fn transition(&self, generation: u64, state: ClientState) -> bool {
        let mut current = self.state.write();
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Ignoring {:?} from superseded attempt {}", state, generation);
            return false;
        }
        if *current != state {
            debug!("Signaling client {:?} -> {:?}", *current, state);
            *current = state;
        }
        true
    }

    async fn attempt(&self, url: &str, generation: u64) {
        let attempt = self.retries_done.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "Connecting to relay at {} (attempt {}/{})",
            url, attempt, self.config.retries_total
        );

        match self.open(url).await {
            Ok(ws) => {
                info!(
                    "Connected to relay at {} ({} dialect)",
                    url,
                    self.config.dialect.as_str()
                );
                if self.transition(generation, ClientState::Established) {
                    self.listener.on_connection_established();
                    self.run(ws, generation).await;
                }
            }
            Err(e) => {
                warn!("{}", e);
                if self.transition(generation, ClientState::Failed) {
                    self.listener.on_connection_failed();
                }
            }
        }
    }

    async fn open(&self, url: &str) -> Result<WsStream, SignalingError> {
        let connector = if self.config.secure {
            Some(Connector::NativeTls(tls::client_connector(
                self.config.accept_invalid_certs,
            )?))
        } else {
            None
        };

        let (ws, response) = tokio_tungstenite::connect_async_tls_with_config(
            url,
            Some(websocket_config(self.config.max_frame_size)),
            false,
            connector,
        )
        .await
        .map_err(|e| SignalingError::ConnectFailure(format!("{}: {}", url, e)))?;

        debug!("Relay handshake answered with {}", response.status());
        Ok(ws)
    }

    /// Read/write loop; returns when the connection is gone
    async fn run(&self, ws: WsStream, generation: u64) {
        let (mut write, mut read) = ws.split();
        let mut ping = keepalive(self.config.ping_interval());

        let reason = loop {
            tokio::select! {
                _ = self.outbound.notify.notified() => {
                    let Some(message) = self.outbound.take() else {
                        continue;
                    };
                    let text = MessageCodec::encode(&message, self.config.dialect);
                    trace!("Sending {}: {}", message.label(), text);
                    if let Err(e) = write.send(Message::Text(text)).await {
                        break format!("send failed: {}", e);
                    }
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.dispatch(&text),
                    Some(Ok(Message::Binary(data))) => {
                        debug!("Ignoring binary frame ({} bytes)", data.len());
                    }
                    Some(Ok(Message::Close(_))) | None => break "closed by relay".to_string(),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break e.to_string(),
                },
                _ = next_tick(&mut ping) => {
                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                        break format!("ping failed: {}", e);
                    }
                }
            }
        };

        info!("Relay connection aborted: {}", reason);
        if self.transition(generation, ClientState::Aborted) {
            self.listener.on_connection_aborted();
        }
    }

    fn dispatch(&self, raw: &str) {
        trace!("Received: {}", raw);
        match MessageCodec::decode(raw) {
            Ok(SignalingMessage::Empty) => {}
            Ok(SignalingMessage::IceCandidate(candidate)) => {
                self.listener.on_ice_candidate_received(candidate);
            }
            Ok(SignalingMessage::SessionDescription(description)) => {
                if !self.config.role.accepts(description.kind) {
                    error!(
                        "Unexpected {} for a {:?} node, dropping it",
                        description.kind, self.config.role
                    );
                    return;
                }
                match description.kind {
                    SdpKind::Offer => self.listener.on_offer_received(description),
                    SdpKind::Answer => self.listener.on_answer_received(description),
                }
            }
            Err(e) => warn!("Ignoring frame: {}", e),
        }
    }
}
