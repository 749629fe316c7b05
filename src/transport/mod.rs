//! Transport layer for signal-relay
//!
//! WebSocket relay server, the signaling client that talks to it, and the
//! shared socket settings.

pub mod client;
pub mod registry;
pub mod relay;
pub mod tls;

pub use client::{ClientState, SignalingClient};
pub use registry::{SessionId, SessionRegistry};
pub use relay::{RelayServer, RelayState};

use std::time::Duration;
use tokio::time::{self, Instant, Interval};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

/// Socket settings shared by both ends: frames and messages capped at `max_frame_size`
pub(crate) fn websocket_config(max_frame_size: usize) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_frame_size = Some(max_frame_size);
    config.max_message_size = Some(max_frame_size);
    config
}

/// A zero duration switches the corresponding timer off
pub(crate) fn enabled(period: Duration) -> Option<Duration> {
    (!period.is_zero()).then_some(period)
}

/// Keep-alive ticker, first tick one period from now; `None` when disabled
pub(crate) fn keepalive(period: Duration) -> Option<Interval> {
    enabled(period).map(|period| time::interval_at(Instant::now() + period, period))
}

/// Next keep-alive tick; pending forever when keep-alive is off
pub(crate) async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
