//! Listener interfaces for relay and client events
//!
//! The relay and the client report to their owner through these traits.
//! Callbacks run on the reporting task, in the order the events happen.
//! The channel adapters hand events to another execution context (a UI or
//! negotiation-engine loop) without reordering them.

use super::{IceCandidate, SessionDescription};
use tokio::sync::mpsc;

/// Events raised by a relay server
pub trait RelayListener: Send + Sync {
    fn on_server_running(&self);
    fn on_server_failed(&self);
    fn on_connection_established(&self);
    fn on_connection_aborted(&self);
}

/// Events raised by a signaling client
pub trait SignalingClientListener: Send + Sync {
    fn on_connection_established(&self);
    fn on_connection_failed(&self);
    fn on_connection_aborted(&self);
    fn on_offer_received(&self, description: SessionDescription);
    fn on_answer_received(&self, description: SessionDescription);
    fn on_ice_candidate_received(&self, candidate: IceCandidate);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    ServerRunning,
    ServerFailed,
    ConnectionEstablished,
    ConnectionAborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    ConnectionEstablished,
    ConnectionFailed,
    ConnectionAborted,
    OfferReceived(SessionDescription),
    AnswerReceived(SessionDescription),
    IceCandidateReceived(IceCandidate),
}

/// Forwards relay events into a channel
pub struct ChannelRelayListener {
    tx: mpsc::UnboundedSender<RelayEvent>,
}

impl ChannelRelayListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RelayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: RelayEvent) {
        // Receiver gone means the owner stopped listening
        let _ = self.tx.send(event);
    }
}

impl RelayListener for ChannelRelayListener {
    fn on_server_running(&self) {
        self.emit(RelayEvent::ServerRunning);
    }

    fn on_server_failed(&self) {
        self.emit(RelayEvent::ServerFailed);
    }

    fn on_connection_established(&self) {
        self.emit(RelayEvent::ConnectionEstablished);
    }

    fn on_connection_aborted(&self) {
        self.emit(RelayEvent::ConnectionAborted);
    }
}

/// Forwards client events into a channel
pub struct ChannelClientListener {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelClientListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.tx.send(event);
    }
}

impl SignalingClientListener for ChannelClientListener {
    fn on_connection_established(&self) {
        self.emit(ClientEvent::ConnectionEstablished);
    }

    fn on_connection_failed(&self) {
        self.emit(ClientEvent::ConnectionFailed);
    }

    fn on_connection_aborted(&self) {
        self.emit(ClientEvent::ConnectionAborted);
    }

    fn on_offer_received(&self, description: SessionDescription) {
        self.emit(ClientEvent::OfferReceived(description));
    }

    fn on_answer_received(&self, description: SessionDescription) {
        self.emit(ClientEvent::AnswerReceived(description));
    }

    fn on_ice_candidate_received(&self, candidate: IceCandidate) {
        self.emit(ClientEvent::IceCandidateReceived(candidate));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_client_listener_preserves_order() {
        let (listener, mut rx) = ChannelClientListener::new();
        listener.on_connection_established();
        listener.on_offer_received(SessionDescription::offer("v=0"));
        listener.on_connection_aborted();

        assert_eq!(rx.try_recv().unwrap(), ClientEvent::ConnectionEstablished);
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientEvent::OfferReceived(SessionDescription::offer("v=0"))
        );
        assert_eq!(rx.try_recv().unwrap(), ClientEvent::ConnectionAborted);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn channel_relay_listener_survives_dropped_receiver() {
        let (listener, rx) = ChannelRelayListener::new();
        drop(rx);
        listener.on_server_running();
        listener.on_connection_aborted();
    }
}
