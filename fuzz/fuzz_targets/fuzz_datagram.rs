#![no_main]

//! Fuzz target for datagram handling.
//!
//! Feeds arbitrary bytes to an unbound server, a client waiting for its
//! cookie and a listener. Malformed input must be dropped silently: no
//! panic and no reply.

use libfuzzer_sys::fuzz_target;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use dtls_flight::{
    Config, CookieStore, HandshakeCoordinator, Listener, ListenerOutput, NullRecordLayer, Output,
};

fuzz_target!(|data: &[u8]| {
    let config = Arc::new(Config::builder().rng_seed(0).build().unwrap());
    let now = Instant::now();
    let cookies = Arc::new(CookieStore::new(&config, now));
    let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
    let mut buf = vec![0u8; 2048];

    // Server
    {
        let mut server = HandshakeCoordinator::accept(
            Arc::clone(&config),
            Arc::clone(&cookies),
            NullRecordLayer::server().with_psk(true),
        );
        let _ = server.on_datagram(data, peer, now);
        for _ in 0..10 {
            if let Output::Timeout(_) = server.poll_output(&mut buf) {
                break;
            }
        }
    }

    // Client awaiting a cookie
    {
        let mut client = HandshakeCoordinator::connect(
            Arc::clone(&config),
            peer,
            NullRecordLayer::client().with_psk(true),
        );
        let _ = client.start(now);
        for _ in 0..10 {
            if let Output::Timeout(_) = client.poll_output(&mut buf) {
                break;
            }
        }
        let _ = client.on_datagram(data, peer, now);
        let _ = client.on_timer(now);
    }

    // Listener
    {
        let mut listener = Listener::new(config, cookies, |_| NullRecordLayer::server());
        listener.handle_datagram(data, peer, now);
        for _ in 0..10 {
            if let ListenerOutput::Timeout(_) = listener.poll_output(&mut buf) {
                break;
            }
        }
    }
});
