use criterion::{criterion_group, criterion_main, Criterion};
use signal_relay::signaling::{Dialect, MessageCodec, SignalingMessage};
use std::hint::black_box;

const OFFER_SDP: &str = "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
a=group:BUNDLE 0 1\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\nc=IN IP4 0.0.0.0\r\n\
a=rtpmap:111 opus/48000/2\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=rtpmap:96 VP8/90000\r\n";

fn bench_decode(c: &mut Criterion) {
    let native_offer = MessageCodec::encode(&SignalingMessage::offer(OFFER_SDP), Dialect::Native);
    let browser_ice = r#"{"candidate":"candidate:842163049 1 udp 1677729535 203.0.113.7 46154 typ srflx raddr 0.0.0.0 rport 0 generation 0","sdpMid":"0","sdpMLineIndex":0}"#;

    c.bench_function("decode_native_offer", |b| {
        b.iter(|| MessageCodec::decode(black_box(&native_offer)).expect("decode"))
    });
    c.bench_function("decode_browser_ice", |b| {
        b.iter(|| MessageCodec::decode(black_box(browser_ice)).expect("decode"))
    });
}

fn bench_translate(c: &mut Criterion) {
    let native_offer = MessageCodec::encode(&SignalingMessage::offer(OFFER_SDP), Dialect::Native);

    c.bench_function("translate_native_to_browser", |b| {
        b.iter(|| MessageCodec::translate(black_box(&native_offer), Dialect::Browser).expect("translate"))
    });
}

criterion_group!(benches, bench_decode, bench_translate);
criterion_main!(benches);
