use clap::Parser;
use std::path::PathBuf;

use signal_relay::config;

#[derive(Parser, Debug)]
#[command(name = "signal-relay")]
#[command(version)]
#[command(about = "WebRTC signaling relay", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/signal-relay.toml")]
    pub config: PathBuf,

    /// Relay bind address
    #[arg(long)]
    pub host: Option<String>,

    /// Relay port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// WebSocket endpoint path
    #[arg(long)]
    pub path: Option<String>,

    /// PEM certificate chain for wss://
    #[arg(long, requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// PEM PKCS#8 private key for wss://
    #[arg(long, requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// Also run a local signaling client against the relay
    #[arg(long, action)]
    pub attach: bool,

    /// Connection attempts for the attached client
    #[arg(long)]
    pub retries: Option<u32>,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,
}

impl Args {
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        config::Config::load(&self.config)
    }

    /// Apply command line overrides on top of the file configuration
    pub fn apply_overrides(&self, config: &mut config::Config) {
        if let Some(ref host) = self.host {
            config.relay.host = host.clone();
        }
        if let Some(port) = self.port {
            config.relay.port = port;
        }
        if let Some(ref path) = self.path {
            config.relay.path = path.clone();
            config.client.path = path.clone();
        }
        if let (Some(cert_path), Some(key_path)) = (&self.tls_cert, &self.tls_key) {
            config.relay.tls = Some(config::TlsConfig {
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
            });
            config.client.secure = true;
            config.client.accept_invalid_certs = true;
        }
        if let Some(retries) = self.retries {
            config.client.retries_total = retries;
        }
    }
}
