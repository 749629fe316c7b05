//! signal-relay - WebRTC signaling relay and client
//!
//! Relays offer, answer and ICE candidate frames between two peers over
//! WebSocket, normalizing the browser and native mobile message dialects.

pub mod config;
pub mod signaling;
pub mod transport;

// Re-exports
pub use config::{ClientConfig, Config, RelayConfig};
pub use signaling::{
    ClientRole, CodecError, Dialect, IceCandidate, MessageCodec, RelayListener, SdpKind,
    SessionDescription, SignalingClientListener, SignalingError, SignalingMessage,
};
pub use transport::{ClientState, RelayServer, RelayState, SignalingClient};
