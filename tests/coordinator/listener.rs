//! Many peers behind one listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use dtls_flight::{HandshakeCoordinator, Listener, NullRecordLayer, State};

use crate::common::*;
use crate::common::DrainedListenerEvent as Ev;

fn peer(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

#[test]
fn cookie_requests_create_no_sessions() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let config = config();
    let cookies = cookie_store(&config, now);
    let mut listener = Listener::new(Arc::clone(&config), cookies, |_| NullRecordLayer::server());

    let mut client =
        HandshakeCoordinator::connect(config, server_addr(), NullRecordLayer::client());
    client.start(now).expect("client start");
    let ch1 = collect_packets(&mut client);

    let mut events = Vec::new();
    for port in 10_000..10_100 {
        listener.handle_datagram(&ch1[0], peer(port), now);
        events.extend(drain_listener(&mut listener));
    }

    assert_eq!(listener.session_count(), 0);
    assert_eq!(events.len(), 100);
    assert!(events.iter().all(|(_, e)| matches!(e, Ev::Packet(_))));
    assert_eq!(packets_for(&events, peer(10_042)).len(), 1);
}

#[test]
fn valid_cookie_creates_session() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let config = config();
    let cookies = cookie_store(&config, now);
    let mut listener = Listener::new(Arc::clone(&config), cookies, |_| {
        NullRecordLayer::server().with_psk(true)
    });

    let mut client = HandshakeCoordinator::connect(
        config,
        server_addr(),
        NullRecordLayer::client().with_psk(true),
    );
    client.start(now).expect("client start");
    client.write_early_data(b"hi early").expect("early");

    let mut connected = false;
    let mut received = Vec::new();
    let mut client_data = Vec::new();

    for _ in 0..10 {
        let c = drain_outputs(&mut client);
        client_data.extend(c.app_data);
        for p in c.packets {
            listener.handle_datagram(&p, client_addr(), now);
        }

        if let Some(session) = listener.session_mut(client_addr()) {
            while let (Some(data), _) = session.read_early_data() {
                received.push(data);
                session
                    .send_application_data(b"0.5")
                    .expect("provisional reply");
            }
        }

        let events = drain_listener(&mut listener);
        for (peer, event) in &events {
            if *peer == client_addr() && *event == Ev::Connected {
                connected = true;
            }
        }
        deliver_packets(
            &packets_for(&events, client_addr()),
            &mut client,
            server_addr(),
            now,
        );

        if connected {
            break;
        }
    }

    assert!(connected);
    assert_eq!(received, vec![b"hi early".to_vec()]);
    assert_eq!(listener.session_count(), 1);
    assert_eq!(client.state(), State::Established);
    client_data.extend(drain_outputs(&mut client).app_data);
    assert_eq!(client_data, vec![b"0.5".to_vec()]);

    // Round trip through the listener.
    client.send_application_data(b"ping").expect("send");
    for p in collect_packets(&mut client) {
        listener.handle_datagram(&p, client_addr(), now);
    }
    let events = drain_listener(&mut listener);
    assert!(events.contains(&(client_addr(), Ev::ApplicationData(b"ping".to_vec()))));

    listener
        .send_application_data(client_addr(), b"pong")
        .expect("reply");
    let events = drain_listener(&mut listener);
    deliver_packets(
        &packets_for(&events, client_addr()),
        &mut client,
        server_addr(),
        now,
    );
    assert_eq!(drain_outputs(&mut client).app_data, vec![b"pong".to_vec()]);
}

#[test]
fn cookie_from_another_address_is_dropped() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let config = config();
    let cookies = cookie_store(&config, now);
    let mut listener = Listener::new(Arc::clone(&config), cookies, |_| NullRecordLayer::server());

    let mut client =
        HandshakeCoordinator::connect(config, server_addr(), NullRecordLayer::client());
    client.start(now).expect("client start");

    let ch1 = collect_packets(&mut client);
    listener.handle_datagram(&ch1[0], client_addr(), now);
    let events = drain_listener(&mut listener);
    deliver_packets(
        &packets_for(&events, client_addr()),
        &mut client,
        server_addr(),
        now,
    );

    // Replay the cookie-bearing ClientHello from a spoofed address.
    let ch2 = collect_packets(&mut client);
    listener.handle_datagram(&ch2[0], peer(7000), now);

    assert_eq!(listener.session_count(), 0);
    assert!(drain_listener(&mut listener).is_empty());

    // Unknown peers sending anything else are ignored too.
    listener.handle_datagram(b"\x17\xfe\xfd garbage", peer(7001), now);
    assert!(drain_listener(&mut listener).is_empty());
}

#[test]
fn closed_session_is_removed() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let config = config();
    let cookies = cookie_store(&config, now);
    let mut listener = Listener::new(Arc::clone(&config), cookies, |_| NullRecordLayer::server());

    let mut client =
        HandshakeCoordinator::connect(config, server_addr(), NullRecordLayer::client());
    client.start(now).expect("client start");

    for _ in 0..10 {
        for p in collect_packets(&mut client) {
            listener.handle_datagram(&p, client_addr(), now);
        }
        let events = drain_listener(&mut listener);
        deliver_packets(
            &packets_for(&events, client_addr()),
            &mut client,
            server_addr(),
            now,
        );
        if client.state() == State::Established {
            break;
        }
    }
    for p in collect_packets(&mut client) {
        listener.handle_datagram(&p, client_addr(), now);
    }
    drain_listener(&mut listener);
    assert_eq!(listener.session(client_addr()).map(|s| s.state()), Some(State::Established));

    client.close(now).expect("close");
    for p in collect_packets(&mut client) {
        listener.handle_datagram(&p, client_addr(), now);
    }

    let events = drain_listener(&mut listener);
    assert_eq!(events, vec![(client_addr(), Ev::Closed(false))]);
    assert_eq!(listener.session_count(), 0);
}
