//! End-to-end scenarios: a relay on a loopback port with raw WebSocket peers
//! and signaling clients attached.

use futures::{SinkExt, StreamExt};
use signal_relay::config::{ClientConfig, RelayConfig, TlsConfig};
use signal_relay::signaling::{
    ChannelClientListener, ChannelRelayListener, ClientEvent, ClientRole, Dialect, IceCandidate,
    MessageCodec, RelayEvent, SessionDescription, SignalingMessage,
};
use signal_relay::{ClientState, RelayServer, RelayState, SignalingClient};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type RawPeer = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

fn loopback_relay() -> RelayConfig {
    RelayConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        stop_grace_millis: 100,
        stop_timeout_millis: 1000,
        ..RelayConfig::default()
    }
}

async fn start_relay() -> (RelayServer, SocketAddr, UnboundedReceiver<RelayEvent>) {
    start_relay_with(loopback_relay()).await
}

async fn start_relay_with(config: RelayConfig) -> (RelayServer, SocketAddr, UnboundedReceiver<RelayEvent>) {
    let (listener, mut events) = ChannelRelayListener::new();
    let relay = RelayServer::new(config, Arc::new(listener));
    let addr = relay.start().await.expect("relay start");
    assert_eq!(relay.local_addr(), Some(addr));
    assert_eq!(next(&mut events).await, RelayEvent::ServerRunning);
    (relay, addr, events)
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

async fn next<T>(events: &mut UnboundedReceiver<T>) -> T {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn wait_for_connections(relay: &RelayServer, expected: usize) {
    timeout(WAIT, async {
        while relay.connections() != expected {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("relay never reached {} connections", expected));
}

async fn raw_peer(addr: SocketAddr) -> RawPeer {
    let url = format!("ws://{}/socket", addr);
    let (ws, _) = tokio_tungstenite::connect_async(url).await.expect("connect");
    ws
}

async fn next_text(peer: &mut RawPeer) -> String {
    timeout(WAIT, async {
        loop {
            match peer.next().await {
                Some(Ok(Message::Text(text))) => return text,
                Some(Ok(_)) => continue,
                other => panic!("peer stream ended: {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for frame")
}

async fn assert_silent(peer: &mut RawPeer) {
    if let Ok(Some(Ok(Message::Text(text)))) = timeout(QUIET, peer.next()).await {
        panic!("unexpected frame: {}", text);
    }
}

fn client(dialect: Dialect, role: ClientRole) -> (SignalingClient, UnboundedReceiver<ClientEvent>) {
    let config = ClientConfig {
        dialect,
        role,
        ..ClientConfig::default()
    };
    let (listener, events) = ChannelClientListener::new();
    (SignalingClient::new(config, Arc::new(listener)), events)
}

#[tokio::test]
async fn broadcast_skips_the_sender() {
    let (relay, addr, _events) = start_relay().await;
    let mut a = raw_peer(addr).await;
    let mut b = raw_peer(addr).await;
    let mut c = raw_peer(addr).await;
    wait_for_connections(&relay, 3).await;

    a.send(Message::Text("hello".to_string())).await.expect("send");

    assert_eq!(next_text(&mut b).await, "hello");
    assert_eq!(next_text(&mut c).await, "hello");
    assert_silent(&mut a).await;

    relay.stop().await;
}

#[tokio::test]
async fn relay_forwards_frames_unmodified() {
    let (relay, addr, _events) = start_relay().await;
    let mut a = raw_peer(addr).await;
    let mut b = raw_peer(addr).await;
    wait_for_connections(&relay, 2).await;

    // Not a signaling message; the relay does not care
    let frame = r#"{"whatever": [1, 2, 3], "type": "bogus"}"#;
    a.send(Message::Text(frame.to_string())).await.expect("send");
    assert_eq!(next_text(&mut b).await, frame);

    relay.stop().await;
}

#[tokio::test]
async fn offer_answer_and_candidates_cross_dialects() {
    let (relay, addr, _events) = start_relay().await;
    let (mobile, mut mobile_events) = client(Dialect::Native, ClientRole::Offerer);
    let (browser, mut browser_events) = client(Dialect::Browser, ClientRole::Answerer);

    mobile.connect("127.0.0.1", addr.port(), "/socket", 0).expect("connect");
    browser.connect("127.0.0.1", addr.port(), "/socket", 0).expect("connect");
    assert_eq!(next(&mut mobile_events).await, ClientEvent::ConnectionEstablished);
    assert_eq!(next(&mut browser_events).await, ClientEvent::ConnectionEstablished);
    assert_eq!(mobile.state(), ClientState::Established);
    wait_for_connections(&relay, 2).await;

    mobile.send(SessionDescription::offer("v=0\r\no=mobile"));
    assert_eq!(
        next(&mut browser_events).await,
        ClientEvent::OfferReceived(SessionDescription::offer("v=0\r\no=mobile"))
    );

    browser.send(SessionDescription::answer("v=0\r\no=browser"));
    assert_eq!(
        next(&mut mobile_events).await,
        ClientEvent::AnswerReceived(SessionDescription::answer("v=0\r\no=browser"))
    );

    let candidate = IceCandidate {
        candidate: "candidate:1 1 udp 2122260223 192.168.1.2 54321 typ host".to_string(),
        sdp_mid: "0".to_string(),
        sdp_mline_index: 0,
    };
    mobile.send(candidate.clone());
    assert_eq!(
        next(&mut browser_events).await,
        ClientEvent::IceCandidateReceived(candidate.clone())
    );
    browser.send(candidate.clone());
    assert_eq!(
        next(&mut mobile_events).await,
        ClientEvent::IceCandidateReceived(candidate)
    );

    mobile.destroy();
    browser.destroy();
    relay.stop().await;
}

#[tokio::test]
async fn null_and_garbage_frames_are_ignored() {
    let (relay, addr, _events) = start_relay().await;
    let mut raw = raw_peer(addr).await;
    let (peer, mut events) = client(Dialect::Browser, ClientRole::Peer);
    peer.connect("127.0.0.1", addr.port(), "/socket", 0).expect("connect");
    assert_eq!(next(&mut events).await, ClientEvent::ConnectionEstablished);
    wait_for_connections(&relay, 2).await;

    for frame in ["null", "{not json", "[1,2]", r#"{"type":"rollback"}"#] {
        raw.send(Message::Text(frame.to_string())).await.expect("send");
    }
    raw.send(Message::Text(r#"{"type":"offer","sdp":"v=0"}"#.to_string()))
        .await
        .expect("send");

    // Only the well-formed offer surfaces, and the connection survived the rest
    assert_eq!(
        next(&mut events).await,
        ClientEvent::OfferReceived(SessionDescription::offer("v=0"))
    );
    assert_eq!(peer.state(), ClientState::Established);

    peer.destroy();
    relay.stop().await;
}

#[tokio::test]
async fn only_the_latest_queued_message_is_sent() {
    let (relay, addr, _events) = start_relay().await;
    let mut observer = raw_peer(addr).await;
    wait_for_connections(&relay, 1).await;

    let (sender, mut events) = client(Dialect::Browser, ClientRole::Peer);
    sender.send(SignalingMessage::offer("first"));
    sender.send(SignalingMessage::offer("second"));
    sender.connect("127.0.0.1", addr.port(), "/socket", 0).expect("connect");
    assert_eq!(next(&mut events).await, ClientEvent::ConnectionEstablished);

    let frame = next_text(&mut observer).await;
    assert_eq!(
        MessageCodec::decode(&frame).expect("decode"),
        SignalingMessage::offer("second")
    );
    assert_silent(&mut observer).await;

    sender.destroy();
    relay.stop().await;
}

#[tokio::test]
async fn disconnect_is_reported_once() {
    let (relay, addr, mut events) = start_relay().await;
    let mut a = raw_peer(addr).await;
    let mut b = raw_peer(addr).await;
    assert_eq!(next(&mut events).await, RelayEvent::ConnectionEstablished);
    assert_eq!(next(&mut events).await, RelayEvent::ConnectionEstablished);
    wait_for_connections(&relay, 2).await;

    a.close(None).await.expect("close");
    drop(a);

    assert_eq!(next(&mut events).await, RelayEvent::ConnectionAborted);
    wait_for_connections(&relay, 1).await;

    // Nobody left to hear it
    b.send(Message::Text("anyone?".to_string())).await.expect("send");
    sleep(QUIET).await;
    assert!(events.try_recv().is_err());
    assert_eq!(relay.connections(), 1);

    relay.stop().await;
}

#[tokio::test]
async fn connection_count_follows_churn() {
    let (relay, addr, _events) = start_relay().await;

    let peers = futures::future::join_all((0..10).map(|_| raw_peer(addr))).await;
    wait_for_connections(&relay, 10).await;

    let mut peers = peers.into_iter();
    for mut peer in peers.by_ref().take(5) {
        peer.close(None).await.expect("close");
    }
    wait_for_connections(&relay, 5).await;

    drop(peers);
    wait_for_connections(&relay, 0).await;

    relay.stop().await;
}

#[tokio::test]
async fn stop_closes_clients() {
    let (relay, addr, mut relay_events) = start_relay().await;
    let (peer, mut events) = client(Dialect::Browser, ClientRole::Peer);
    peer.connect("127.0.0.1", addr.port(), "/socket", 0).expect("connect");
    assert_eq!(next(&mut events).await, ClientEvent::ConnectionEstablished);
    assert_eq!(next(&mut relay_events).await, RelayEvent::ConnectionEstablished);

    relay.stop().await;
    assert_eq!(relay.state(), RelayState::Stopped);
    assert_eq!(relay.connections(), 0);
    assert_eq!(next(&mut relay_events).await, RelayEvent::ConnectionAborted);

    assert_eq!(next(&mut events).await, ClientEvent::ConnectionAborted);
    assert_eq!(peer.state(), ClientState::Aborted);

    // New connections are refused once stopped
    let (late, mut late_events) = client(Dialect::Browser, ClientRole::Peer);
    late.connect("127.0.0.1", addr.port(), "/socket", 0).expect("connect");
    assert_eq!(next(&mut late_events).await, ClientEvent::ConnectionFailed);
    assert_eq!(late.state(), ClientState::Failed);
}

#[tokio::test]
async fn retry_budget_runs_out_against_a_dead_relay() {
    let (relay, addr, _events) = start_relay().await;
    relay.stop().await;

    let config = ClientConfig {
        retries_total: 2,
        ..ClientConfig::default()
    };
    let (listener, mut events) = ChannelClientListener::new();
    let peer = SignalingClient::new(config, Arc::new(listener));

    peer.connect("127.0.0.1", addr.port(), "/socket", 0).expect("connect");
    let mut failures = 0;
    while next(&mut events).await == ClientEvent::ConnectionFailed {
        failures += 1;
        if !peer.has_retries_left() {
            break;
        }
        peer.connect("127.0.0.1", addr.port(), "/socket", 10).expect("retry");
    }

    assert_eq!(failures, 2);
    assert_eq!(peer.retries_done(), 2);
    assert!(!peer.has_retries_left());
}

#[tokio::test]
async fn other_paths_get_404() {
    let (relay, addr, _events) = start_relay().await;

    let url = format!("ws://{}/elsewhere", addr);
    match tokio_tungstenite::connect_async(url).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 404);
        }
        other => panic!("expected 404, got {:?}", other.map(|(_, r)| r.status())),
    }
    assert_eq!(relay.connections(), 0);

    relay.stop().await;
}

#[tokio::test]
async fn silent_peers_are_dropped_after_the_idle_window() {
    let config = RelayConfig {
        ping_interval_secs: 1,
        idle_timeout_secs: 2,
        ..loopback_relay()
    };
    let (relay, addr, mut relay_events) = start_relay_with(config).await;

    // Answers the relay's pings from its read loop
    let (peer, mut events) = client(Dialect::Browser, ClientRole::Peer);
    peer.connect("127.0.0.1", addr.port(), "/socket", 0).expect("connect");
    assert_eq!(next(&mut events).await, ClientEvent::ConnectionEstablished);

    // Never read, so never answers
    let _silent = raw_peer(addr).await;
    wait_for_connections(&relay, 2).await;
    assert_eq!(next(&mut relay_events).await, RelayEvent::ConnectionEstablished);
    assert_eq!(next(&mut relay_events).await, RelayEvent::ConnectionEstablished);

    assert_eq!(next(&mut relay_events).await, RelayEvent::ConnectionAborted);
    assert_eq!(relay.connections(), 1);

    // Well past the window the pinged client is still there
    sleep(Duration::from_millis(2500)).await;
    assert_eq!(relay.connections(), 1);
    assert_eq!(peer.state(), ClientState::Established);
    assert!(events.try_recv().is_err());

    peer.destroy();
    relay.stop().await;
}

#[tokio::test]
async fn zero_timers_disable_keepalive_and_idle_drop() {
    let config = RelayConfig {
        ping_interval_secs: 0,
        idle_timeout_secs: 0,
        ..loopback_relay()
    };
    let (relay, addr, _events) = start_relay_with(config).await;
    let mut observer = raw_peer(addr).await;

    let client_config = ClientConfig {
        ping_interval_secs: 0,
        ..ClientConfig::default()
    };
    let (listener, mut events) = ChannelClientListener::new();
    let peer = SignalingClient::new(client_config, Arc::new(listener));
    peer.connect("127.0.0.1", addr.port(), "/socket", 0).expect("connect");
    assert_eq!(next(&mut events).await, ClientEvent::ConnectionEstablished);
    wait_for_connections(&relay, 2).await;

    sleep(QUIET).await;
    assert_eq!(relay.connections(), 2);
    assert_eq!(peer.state(), ClientState::Established);

    peer.send(SignalingMessage::offer("v=0"));
    let frame = next_text(&mut observer).await;
    assert_eq!(
        MessageCodec::decode(&frame).expect("decode"),
        SignalingMessage::offer("v=0")
    );

    // The client loop is alive and notices the relay going away
    relay.stop().await;
    assert_eq!(next(&mut events).await, ClientEvent::ConnectionAborted);
    assert_eq!(peer.state(), ClientState::Aborted);
}

#[tokio::test]
async fn oversized_frames_drop_the_sender() {
    let config = RelayConfig {
        max_frame_size: 64,
        ..loopback_relay()
    };
    let (relay, addr, _events) = start_relay_with(config).await;
    let mut sender = raw_peer(addr).await;
    let mut other = raw_peer(addr).await;
    wait_for_connections(&relay, 2).await;

    sender.send(Message::Text("x".repeat(1000))).await.expect("send");
    wait_for_connections(&relay, 1).await;
    assert_silent(&mut other).await;

    // Small frames still flow
    let mut late = raw_peer(addr).await;
    wait_for_connections(&relay, 2).await;
    late.send(Message::Text("ok".to_string())).await.expect("send");
    assert_eq!(next_text(&mut other).await, "ok");

    relay.stop().await;
}

#[tokio::test]
async fn client_aborts_on_oversized_inbound_frame() {
    let (relay, addr, _events) = start_relay().await;
    let mut raw = raw_peer(addr).await;

    let config = ClientConfig {
        max_frame_size: 64,
        ..ClientConfig::default()
    };
    let (listener, mut events) = ChannelClientListener::new();
    let peer = SignalingClient::new(config, Arc::new(listener));
    peer.connect("127.0.0.1", addr.port(), "/socket", 0).expect("connect");
    assert_eq!(next(&mut events).await, ClientEvent::ConnectionEstablished);
    wait_for_connections(&relay, 2).await;

    let big_offer = MessageCodec::encode(&SignalingMessage::offer("a".repeat(1000)), Dialect::Browser);
    raw.send(Message::Text(big_offer)).await.expect("send");

    assert_eq!(next(&mut events).await, ClientEvent::ConnectionAborted);
    assert_eq!(peer.state(), ClientState::Aborted);
    wait_for_connections(&relay, 1).await;

    relay.stop().await;
}

fn secure_client(accept_invalid_certs: bool) -> (SignalingClient, UnboundedReceiver<ClientEvent>) {
    let config = ClientConfig {
        secure: true,
        accept_invalid_certs,
        ..ClientConfig::default()
    };
    let (listener, events) = ChannelClientListener::new();
    (SignalingClient::new(config, Arc::new(listener)), events)
}

#[tokio::test]
async fn wss_relay_carries_signaling() {
    let config = RelayConfig {
        tls: Some(TlsConfig {
            cert_path: fixture("relay-cert.pem"),
            key_path: fixture("relay-key.pem"),
        }),
        ..loopback_relay()
    };
    let (relay, addr, _events) = start_relay_with(config).await;

    let (offerer, mut offerer_events) = secure_client(true);
    let (answerer, mut answerer_events) = secure_client(true);
    offerer.connect("127.0.0.1", addr.port(), "/socket", 0).expect("connect");
    answerer.connect("127.0.0.1", addr.port(), "/socket", 0).expect("connect");
    assert_eq!(next(&mut offerer_events).await, ClientEvent::ConnectionEstablished);
    assert_eq!(next(&mut answerer_events).await, ClientEvent::ConnectionEstablished);
    wait_for_connections(&relay, 2).await;

    offerer.send(SessionDescription::offer("v=0\r\no=secure"));
    assert_eq!(
        next(&mut answerer_events).await,
        ClientEvent::OfferReceived(SessionDescription::offer("v=0\r\no=secure"))
    );

    // Self-signed relay is refused unless trusted explicitly
    let (strict, mut strict_events) = secure_client(false);
    strict.connect("127.0.0.1", addr.port(), "/socket", 0).expect("connect");
    assert_eq!(next(&mut strict_events).await, ClientEvent::ConnectionFailed);

    // Plain ws cannot talk to a wss relay
    let (plain, mut plain_events) = client(Dialect::Browser, ClientRole::Peer);
    plain.connect("127.0.0.1", addr.port(), "/socket", 0).expect("connect");
    assert_eq!(next(&mut plain_events).await, ClientEvent::ConnectionFailed);
    assert_eq!(relay.connections(), 2);

    offerer.destroy();
    answerer.destroy();
    relay.stop().await;
}
