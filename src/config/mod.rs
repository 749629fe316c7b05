//! Configuration management for signal-relay

use crate::signaling::{ClientRole, Dialect};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Relay server configuration
    #[serde(default)]
    pub relay: RelayConfig,

    /// Signaling client configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Bind address
    #[serde(default = "default_relay_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// WebSocket endpoint path
    #[serde(default = "default_path")]
    pub path: String,

    /// Keep-alive ping interval in seconds, 0 disables pings
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// Drop connections silent for this long, 0 keeps them
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Maximum frame and message size in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Time in-flight frames get to drain on stop
    #[serde(default = "default_stop_grace_millis")]
    pub stop_grace_millis: u64,

    /// Hard limit after which remaining connections are dropped
    #[serde(default = "default_stop_timeout_millis")]
    pub stop_timeout_millis: u64,

    /// Serve wss:// with a supplied credential
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM certificate chain
    pub cert_path: PathBuf,

    /// PEM PKCS#8 private key
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Relay host
    #[serde(default = "default_client_host")]
    pub host: String,

    /// Relay port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Relay path
    #[serde(default = "default_path")]
    pub path: String,

    /// Connect with wss://
    #[serde(default)]
    pub secure: bool,

    /// Trust self-signed relay certificates
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Connection attempts allowed before the peer counts as unreachable
    #[serde(default = "default_retries_total")]
    pub retries_total: u32,

    /// Delay before each reconnect attempt
    #[serde(default = "default_retry_wait_millis")]
    pub retry_wait_millis: u64,

    /// Dialect used for outbound frames
    #[serde(default)]
    pub dialect: Dialect,

    /// Which descriptions this node expects to receive
    #[serde(default)]
    pub role: ClientRole,

    /// Keep-alive ping interval in seconds, 0 disables pings
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// Maximum frame and message size in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_relay_host(),
            port: default_port(),
            path: default_path(),
            ping_interval_secs: default_ping_interval_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_frame_size: default_max_frame_size(),
            stop_grace_millis: default_stop_grace_millis(),
            stop_timeout_millis: default_stop_timeout_millis(),
            tls: None,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_client_host(),
            port: default_port(),
            path: default_path(),
            secure: false,
            accept_invalid_certs: false,
            retries_total: default_retries_total(),
            retry_wait_millis: default_retry_wait_millis(),
            dialect: Dialect::default(),
            role: ClientRole::default(),
            ping_interval_secs: default_ping_interval_secs(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl RelayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_millis)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_millis)
    }
}

impl ClientConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        validate_path("Relay", &self.relay.path)?;
        validate_path("Client", &self.client.path)?;

        // Peers only answer pings, so an idle limit needs pings well inside it
        if self.relay.idle_timeout_secs > 0
            && (self.relay.ping_interval_secs == 0
                || self.relay.ping_interval_secs >= self.relay.idle_timeout_secs)
        {
            return Err("Relay ping interval must be non-zero and shorter than the idle timeout".into());
        }

        if self.relay.max_frame_size == 0 || self.client.max_frame_size == 0 {
            return Err("Maximum frame size must be non-zero".into());
        }

        if self.relay.stop_grace_millis > self.relay.stop_timeout_millis {
            return Err("Relay stop grace period cannot exceed the stop timeout".into());
        }

        if let Some(ref tls) = self.relay.tls {
            if tls.cert_path.as_os_str().is_empty() || tls.key_path.as_os_str().is_empty() {
                return Err("Relay TLS needs both cert_path and key_path".into());
            }
        }

        if self.client.port == 0 {
            return Err("Client port must be non-zero".into());
        }

        if self.client.retries_total == 0 {
            return Err("Client retries_total must be at least 1".into());
        }

        Ok(())
    }
}

fn validate_path(owner: &str, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.starts_with('/') {
        return Err(format!("{} path must start with '/'", owner).into());
    }
    Ok(())
}

fn default_relay_host() -> String {
    "0.0.0.0".to_string()
}

fn default_client_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 { 8080 }
fn default_path() -> String { "/socket".to_string() }
fn default_ping_interval_secs() -> u64 { 15 }
fn default_idle_timeout_secs() -> u64 { 60 }
fn default_max_frame_size() -> usize { 1 << 20 }
fn default_stop_grace_millis() -> u64 { 5000 }
fn default_stop_timeout_millis() -> u64 { 10000 }
fn default_retries_total() -> u32 { 3 }
fn default_retry_wait_millis() -> u64 { 1000 }

fn default_log_level() -> String {
    "info".to_string()
}
