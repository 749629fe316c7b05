//! signal-relay - Main entry point
//!
//! Runs a signaling relay and, with `--attach`, a local client that logs what
//! it receives and retries failed connections within its budget.

mod args;

use args::Args;
use clap::Parser;
use log::{debug, error, info, warn};
use signal_relay::config::{ClientConfig, Config};
use signal_relay::signaling::{ChannelClientListener, ClientEvent, RelayListener};
use signal_relay::{RelayServer, SignalingClient};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task;

struct LoggingRelayListener;

impl RelayListener for LoggingRelayListener {
    fn on_server_running(&self) {
        info!("Relay is running");
    }

    fn on_server_failed(&self) {
        error!("Relay failed to start");
    }

    fn on_connection_established(&self) {
        debug!("Relay accepted a peer");
    }

    fn on_connection_aborted(&self) {
        debug!("Relay lost a peer");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();
    let loaded = args.load_config();

    // Initialize logging with noise filtering for the WebSocket crates
    let log_level = match (&loaded, args.verbose) {
        (_, true) => "debug".to_string(),
        (Ok(cfg), false) => cfg.logging.level.clone(),
        (Err(_), false) => "info".to_string(),
    };
    env_logger::Builder::new()
        .parse_filters(&std::env::var("SIGNAL_RELAY_LOG").unwrap_or(log_level))
        .filter_module("tungstenite", log::LevelFilter::Warn)
        .filter_module("tokio_tungstenite", log::LevelFilter::Warn)
        .init();

    info!("signal-relay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = match loaded {
        Ok(cfg) => {
            info!("Loaded configuration from {:?}", args.config);
            cfg
        }
        Err(e) => {
            warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        }
    };
    args.apply_overrides(&mut config);

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e);
    }

    let relay = RelayServer::new(config.relay.clone(), Arc::new(LoggingRelayListener));
    let addr = relay.start().await?;

    let attached = if args.attach {
        let client_config = attach_config(&config.client, addr);
        let retry_wait_millis = client_config.retry_wait_millis;
        let (listener, events) = ChannelClientListener::new();
        let client = SignalingClient::new(client_config, Arc::new(listener));
        client.connect_configured(0)?;
        let handle = task::spawn(run_attached_client(client.clone(), events, retry_wait_millis));
        Some((client, handle))
    } else {
        None
    };

    // Wait for shutdown signal
    let _ = signal::ctrl_c().await;
    info!("Shutdown signal received, initiating graceful shutdown...");

    if let Some((client, handle)) = attached {
        client.destroy();
        if !handle.is_finished() {
            handle.abort();
            let _ = handle.await;
        }
    }

    relay.stop().await;
    info!("signal-relay stopped");

    Ok(())
}

/// Point the attached client at the relay just started, over loopback when
/// the relay listens on every interface
fn attach_config(client: &ClientConfig, relay_addr: SocketAddr) -> ClientConfig {
    let mut config = client.clone();
    if !relay_addr.ip().is_unspecified() {
        config.host = relay_addr.ip().to_string();
    }
    config.port = relay_addr.port();
    config
}

async fn run_attached_client(
    client: SignalingClient,
    mut events: UnboundedReceiver<ClientEvent>,
    retry_wait_millis: u64,
) {
    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::ConnectionEstablished => {
                info!("Attached client connected");
            }
            ClientEvent::ConnectionFailed | ClientEvent::ConnectionAborted => {
                if !client.has_retries_left() {
                    error!(
                        "Relay unreachable after {} attempts, giving up",
                        client.retries_done()
                    );
                    break;
                }
                info!(
                    "Reconnecting in {} ms ({}/{} attempts used)",
                    retry_wait_millis,
                    client.retries_done(),
                    client.retries_total()
                );
                if let Err(e) = client.connect_configured(retry_wait_millis) {
                    warn!("Attached client cannot reconnect: {}", e);
                    break;
                }
            }
            ClientEvent::OfferReceived(description) | ClientEvent::AnswerReceived(description) => {
                info!("Received {} ({} bytes of SDP)", description.kind, description.sdp.len());
            }
            ClientEvent::IceCandidateReceived(candidate) => {
                debug!(
                    "Received ICE candidate for {}:{} {}",
                    candidate.sdp_mid, candidate.sdp_mline_index, candidate.candidate
                );
            }
        }
    }
}
