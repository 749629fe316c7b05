//! Signaling protocol
//!
//! Message types exchanged between peers through the relay, the two peer
//! dialects, and the listener interfaces the relay and client report through.

pub mod codec;
pub mod listener;

pub use codec::MessageCodec;
pub use listener::{
    ChannelClientListener, ChannelRelayListener, ClientEvent, RelayEvent, RelayListener,
    SignalingClientListener,
};

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

/// Kind of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdpKind {
    Offer,
    Answer,
}

impl SdpKind {
    /// Canonical (upper case) name used for classification
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpKind::Offer => "OFFER",
            SdpKind::Answer => "ANSWER",
        }
    }

    /// Parse a type value regardless of the sender's casing
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "OFFER" => Some(SdpKind::Offer),
            "ANSWER" => Some(SdpKind::Answer),
            _ => None,
        }
    }
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One connectivity option proposed for the direct peer path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: String,
    pub sdp_mline_index: i32,
}

/// An offer or answer describing one party's media parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpKind::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpKind::Answer, sdp: sdp.into() }
    }
}

/// A decoded signaling frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingMessage {
    /// ICE candidate
    IceCandidate(IceCandidate),
    /// SDP offer or answer
    SessionDescription(SessionDescription),
    /// `null` frame, tolerated and ignored
    Empty,
}

impl SignalingMessage {
    pub fn ice_candidate(candidate: impl Into<String>, sdp_mid: impl Into<String>, sdp_mline_index: i32) -> Self {
        SignalingMessage::IceCandidate(IceCandidate {
            candidate: candidate.into(),
            sdp_mid: sdp_mid.into(),
            sdp_mline_index,
        })
    }

    pub fn offer(sdp: impl Into<String>) -> Self {
        SignalingMessage::SessionDescription(SessionDescription::offer(sdp))
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        SignalingMessage::SessionDescription(SessionDescription::answer(sdp))
    }

    /// Short label for log lines
    pub fn label(&self) -> &'static str {
        match self {
            SignalingMessage::IceCandidate(_) => "ICE candidate",
            SignalingMessage::SessionDescription(desc) => match desc.kind {
                SdpKind::Offer => "OFFER",
                SdpKind::Answer => "ANSWER",
            },
            SignalingMessage::Empty => "null",
        }
    }
}

impl From<IceCandidate> for SignalingMessage {
    fn from(candidate: IceCandidate) -> Self {
        SignalingMessage::IceCandidate(candidate)
    }
}

impl From<SessionDescription> for SignalingMessage {
    fn from(description: SessionDescription) -> Self {
        SignalingMessage::SessionDescription(description)
    }
}

/// JSON field naming convention of a peer implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Browser peers: lower case `type`, body under `sdp`, candidate under `candidate`
    #[default]
    Browser,
    /// Native mobile stack: upper case `type`, body under `description`, candidate under `sdp`
    Native,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Browser => "browser",
            Dialect::Native => "native",
        }
    }
}

/// Which session descriptions this node expects to receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    /// Either side may initiate; offers and answers are both delivered
    #[default]
    Peer,
    /// Only ever originates offers; an incoming offer is an anomaly
    Offerer,
    /// Only ever answers; an incoming answer is an anomaly
    Answerer,
}

impl ClientRole {
    /// Whether a description of `kind` may be delivered to a node with this role
    pub fn accepts(&self, kind: SdpKind) -> bool {
        !matches!(
            (self, kind),
            (ClientRole::Offerer, SdpKind::Offer) | (ClientRole::Answerer, SdpKind::Answer)
        )
    }
}

/// A frame that could not be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecError(pub String);

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Malformed frame: {}", self.0)
    }
}

impl Error for CodecError {}

/// Signaling errors
#[derive(Debug)]
pub enum SignalingError {
    /// Relay could not open its listening port
    BindFailure(std::io::Error),
    /// Client could not reach the relay
    ConnectFailure(String),
    /// TLS credential or handshake problem
    Tls(String),
    /// Invalid configuration value
    Config(String),
    /// Operation on a client that was already destroyed
    Destroyed,
    /// Transport I/O error
    Io(std::io::Error),
}

impl fmt::Display for SignalingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalingError::BindFailure(e) => write!(f, "Bind failed: {}", e),
            SignalingError::ConnectFailure(msg) => write!(f, "Connect failed: {}", msg),
            SignalingError::Tls(msg) => write!(f, "TLS error: {}", msg),
            SignalingError::Config(msg) => write!(f, "Invalid configuration: {}", msg),
            SignalingError::Destroyed => write!(f, "Signaling client was destroyed"),
            SignalingError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for SignalingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SignalingError::BindFailure(e) | SignalingError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SignalingError {
    fn from(e: std::io::Error) -> Self {
        SignalingError::Io(e)
    }
}

impl From<native_tls::Error> for SignalingError {
    fn from(e: native_tls::Error) -> Self {
        SignalingError::Tls(e.to_string())
    }
}
