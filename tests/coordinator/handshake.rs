//! Cookie exchange and handshake completion.

use std::sync::Arc;
use std::time::Instant;

use dtls_flight::message::{parse_datagram, ContentType, EPOCH_APPLICATION};
use dtls_flight::{Config, Error, FailureKind, HandshakeCoordinator, NullRecordLayer, State};

use crate::common::*;

#[test]
fn resumed_handshake_with_early_data() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let (mut client, mut server) = new_pair(config(), true, now);

    client.start(now).expect("client start");
    client
        .write_early_data(&[0xAB; 64])
        .expect("early data before cookie");

    // ClientHello without a cookie.
    let ch1 = collect_packets(&mut client);
    assert_eq!(ch1.len(), 1);

    deliver_packets(&ch1, &mut server, client_addr(), now);
    assert_eq!(server.state(), State::AwaitingCookieEcho);
    assert_eq!(server.peer(), None, "no state bound before the cookie");

    let hvr = collect_packets(&mut server);
    assert_eq!(hvr.len(), 1);

    // ClientHello with cookie, followed by the early data record.
    deliver_packets(&hvr, &mut client, server_addr(), now);
    assert_eq!(client.state(), State::AcceptingEarlyData);
    let ch2 = collect_packets(&mut client);
    assert_eq!(ch2.len(), 2);

    deliver_packets(&ch2, &mut server, client_addr(), now);
    assert_eq!(server.state(), State::AcceptingEarlyData);
    assert_eq!(server.peer(), Some(client_addr()));

    // Provisional reply before the handshake completes.
    server
        .send_application_data(b"0.5-RTT reply")
        .expect("0.5-RTT reply");

    let server_flight = drain_outputs(&mut server);
    assert!(!server_flight.connected);
    deliver_packets(&server_flight.packets, &mut client, server_addr(), now);

    let c = drain_outputs(&mut client);
    assert!(c.connected);
    assert_eq!(c.app_data, vec![b"0.5-RTT reply".to_vec()]);
    assert_eq!(client.state(), State::Established);

    deliver_packets(&c.packets, &mut server, client_addr(), now);
    assert_eq!(server.state(), State::Established);
    assert!(drain_outputs(&mut server).connected);

    assert_eq!(server.read_early_data(), (Some(vec![0xAB; 64]), false));
    assert_eq!(server.read_early_data(), (None, false));
}

#[test]
fn full_handshake_without_psk() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let (mut client, mut server) = new_pair(config(), false, now);

    run_handshake(&mut client, &mut server, now);

    client.send_application_data(b"ping").expect("client send");
    let packets = collect_packets(&mut client);
    deliver_packets(&packets, &mut server, client_addr(), now);

    let s = drain_outputs(&mut server);
    assert_eq!(s.app_data, vec![b"ping".to_vec()]);

    server.send_application_data(b"pong").expect("server send");
    let packets = collect_packets(&mut server);
    deliver_packets(&packets, &mut client, server_addr(), now);
    assert_eq!(drain_outputs(&mut client).app_data, vec![b"pong".to_vec()]);

    assert_eq!(server.read_early_data(), (None, false));
}

#[test]
fn early_data_needs_an_offer() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let (mut client, _server) = new_pair(config(), false, now);

    assert!(matches!(
        client.write_early_data(b"too soon"),
        Err(Error::InvalidState(State::Idle))
    ));

    client.start(now).expect("client start");
    assert!(matches!(
        client.write_early_data(b"not offered"),
        Err(Error::InvalidState(State::AwaitingCookieEcho))
    ));
}

#[test]
fn application_data_before_established_is_refused() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let (mut client, mut server) = new_pair(config(), false, now);

    client.start(now).expect("client start");
    assert!(matches!(
        client.send_application_data(b"x"),
        Err(Error::InvalidState(State::AwaitingCookieEcho))
    ));
    assert!(matches!(
        server.send_application_data(b"x"),
        Err(Error::InvalidState(State::Idle))
    ));
}

#[test]
fn server_with_early_data_disabled_completes_full_handshake() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let server_config = Arc::new(
        Config::builder()
            .early_data_enabled(false)
            .rng_seed(1)
            .build()
            .expect("config"),
    );
    let cookies = cookie_store(&server_config, now);

    // The client still offers 0-RTT; only the server refuses it.
    let mut client = HandshakeCoordinator::connect(
        config(),
        server_addr(),
        NullRecordLayer::client().with_psk(true),
    );
    let mut server = HandshakeCoordinator::accept(
        server_config,
        cookies,
        NullRecordLayer::server().with_psk(true),
    );

    client.start(now).expect("client start");
    client.write_early_data(b"dropped").expect("client queues");

    let ch1 = collect_packets(&mut client);
    deliver_packets(&ch1, &mut server, client_addr(), now);
    let hvr = collect_packets(&mut server);
    deliver_packets(&hvr, &mut client, server_addr(), now);

    let ch2 = collect_packets(&mut client);
    deliver_packets(&ch2, &mut server, client_addr(), now);
    assert_eq!(server.state(), State::CompletingHandshake);
    assert_eq!(server.read_early_data(), (None, false));

    run_handshake(&mut client, &mut server, now);
    assert_eq!(server.read_early_data(), (None, false));
}

#[test]
fn client_with_early_data_disabled_does_not_send_it() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let config = Arc::new(
        Config::builder()
            .early_data_enabled(false)
            .rng_seed(3)
            .build()
            .expect("config"),
    );
    let (mut client, mut server) = new_pair(config, true, now);

    client.start(now).expect("client start");
    assert!(matches!(
        client.write_early_data(b"should be refused"),
        Err(Error::InvalidState(State::AwaitingCookieEcho))
    ));

    let ch1 = collect_packets(&mut client);
    deliver_packets(&ch1, &mut server, client_addr(), now);
    let hvr = collect_packets(&mut server);
    deliver_packets(&hvr, &mut client, server_addr(), now);
    assert_eq!(client.state(), State::CompletingHandshake);

    // Only the cookie-bearing ClientHello goes out.
    let ch2 = collect_packets(&mut client);
    assert_eq!(ch2.len(), 1);
    assert!(matches!(
        client.write_early_data(b"still refused"),
        Err(Error::InvalidState(State::CompletingHandshake))
    ));

    deliver_packets(&ch2, &mut server, client_addr(), now);
    let (_, server_data) = run_handshake(&mut client, &mut server, now);
    assert!(server_data.is_empty());
    assert_eq!(server.read_early_data(), (None, false));
    assert_eq!(client.state(), State::Established);
    assert_eq!(server.state(), State::Established);
}

#[test]
fn oversized_application_data_is_refused() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let (mut client, mut server) = new_pair(config(), false, now);
    run_handshake(&mut client, &mut server, now);

    assert!(matches!(
        client.send_application_data(&[0x41; 70_000]),
        Err(Error::RecordTooLarge(70_000))
    ));
    assert!(matches!(
        client.send_application_data(&[0x41; (1 << 14) + 1]),
        Err(Error::RecordTooLarge(_))
    ));
    assert!(collect_packets(&mut client).is_empty());
    assert_eq!(client.state(), State::Established);

    client.send_application_data(b"fits").expect("send");
    let packets = collect_packets(&mut client);
    deliver_packets(&packets, &mut server, client_addr(), now);
    assert_eq!(drain_outputs(&mut server).app_data, vec![b"fits".to_vec()]);
}

#[test]
fn oversized_early_data_is_refused() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let (mut client, _server) = new_pair(config(), true, now);

    client.start(now).expect("client start");
    assert!(matches!(
        client.write_early_data(&[0; 20_000]),
        Err(Error::RecordTooLarge(20_000))
    ));
    client.write_early_data(b"small").expect("within limits");
}

#[test]
fn unprotected_alerts_ignored_once_established() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let (mut client, mut server) = new_pair(config(), false, now);
    run_handshake(&mut client, &mut server, now);

    // Plaintext epoch 0 alerts: fatal handshake_failure, then close_notify.
    let fatal = vec![0x15, 0xFE, 0xFD, 0, 0, 0, 0, 0, 0, 0, 99, 0, 2, 2, 40];
    let close_notify = vec![0x15, 0xFE, 0xFD, 0, 0, 0, 0, 0, 0, 0, 100, 0, 2, 1, 0];
    server
        .on_datagram(&fatal, client_addr(), now)
        .expect("ignored");
    server
        .on_datagram(&close_notify, client_addr(), now)
        .expect("ignored");

    assert_eq!(server.state(), State::Established);
    assert!(server.failure().is_none());
    assert!(!drain_outputs(&mut server).closed);

    client.send_application_data(b"still here").expect("send");
    let packets = collect_packets(&mut client);
    deliver_packets(&packets, &mut server, client_addr(), now);
    assert_eq!(drain_outputs(&mut server).app_data, vec![b"still here".to_vec()]);
}

#[test]
fn tampered_close_notify_is_dropped() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let (mut client, mut server) = new_pair(config(), false, now);
    run_handshake(&mut client, &mut server, now);

    client.close(now).expect("close");
    let packets = collect_packets(&mut client);
    assert_eq!(packets.len(), 1);

    let records = parse_datagram(&packets[0]).expect("parse");
    assert_eq!(records[0].content_type, ContentType::Alert);
    assert_eq!(records[0].epoch, EPOCH_APPLICATION);

    let mut tampered = packets[0].clone();
    if let Some(last) = tampered.last_mut() {
        *last ^= 0xFF;
    }
    server
        .on_datagram(&tampered, client_addr(), now)
        .expect("dropped");
    assert_eq!(server.state(), State::Established);

    deliver_packets(&packets, &mut server, client_addr(), now);
    assert_eq!(server.state(), State::Closed);
    assert!(server.failure().is_none());
}

#[test]
fn malformed_input_produces_nothing() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let (mut client, mut server) = new_pair(config(), true, now);

    let garbage: Vec<Vec<u8>> = vec![
        vec![],
        vec![0x16],
        vec![0x16, 0xFE, 0xFD, 0, 0, 0, 0, 0, 0, 0, 0, 0, 200, 1, 2, 3],
        vec![0x17, 0xFE, 0xFF, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1, 0],
        vec![0xFF; 64],
    ];
    deliver_packets(&garbage, &mut server, client_addr(), now);

    let s = drain_outputs(&mut server);
    assert!(s.packets.is_empty());
    assert_eq!(server.state(), State::Idle);
    assert_eq!(server.peer(), None);

    client.start(now).expect("client start");
    collect_packets(&mut client);
    deliver_packets(&garbage, &mut client, server_addr(), now);
    assert!(collect_packets(&mut client).is_empty());
    assert_eq!(client.state(), State::AwaitingCookieEcho);
}

#[test]
fn fatal_record_layer_error_closes_both_sides() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let config = config();
    let cookies = cookie_store(&config, now);

    let mut client = HandshakeCoordinator::connect(
        Arc::clone(&config),
        server_addr(),
        NullRecordLayer::client(),
    );
    let mut server =
        HandshakeCoordinator::accept(config, cookies, NullRecordLayer::server().failing(40));

    client.start(now).expect("client start");
    let ch1 = collect_packets(&mut client);
    deliver_packets(&ch1, &mut server, client_addr(), now);
    let hvr = collect_packets(&mut server);
    deliver_packets(&hvr, &mut client, server_addr(), now);
    let ch2 = collect_packets(&mut client);

    let err = server
        .on_datagram(&ch2[0], client_addr(), now)
        .expect_err("record layer fails");
    let Error::Failed(failure) = err else {
        panic!("unexpected error {:?}", err);
    };
    assert_eq!(failure.kind, FailureKind::Handshake);
    assert_eq!(failure.code, Some(40));
    assert_eq!(server.state(), State::Closed);

    // The fatal alert reaches the client.
    let s = drain_outputs(&mut server);
    assert!(s.closed);
    assert_eq!(s.packets.len(), 1);

    let err = client
        .on_datagram(&s.packets[0], server_addr(), now)
        .expect_err("alert fails client");
    assert!(matches!(err, Error::Failed(f) if f.code == Some(40)));
    assert_eq!(client.state(), State::Closed);
    assert!(drain_outputs(&mut client).closed);

    // Closed sessions ignore everything.
    server.on_datagram(&ch2[0], client_addr(), now).expect("ignored");
    assert!(collect_packets(&mut server).is_empty());
}

#[test]
fn close_notify_closes_peer_cleanly() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let (mut client, mut server) = new_pair(config(), false, now);
    run_handshake(&mut client, &mut server, now);

    client.close(now).expect("close");
    let c = drain_outputs(&mut client);
    assert!(c.closed);
    assert_eq!(c.packets.len(), 1);

    deliver_packets(&c.packets, &mut server, client_addr(), now);
    assert_eq!(server.state(), State::Closed);
    assert!(server.failure().is_none());
    assert!(drain_outputs(&mut server).closed);
}

#[test]
fn datagrams_from_other_peers_are_ignored_once_bound() {
    let _ = env_logger::try_init();

    let now = Instant::now();
    let (mut client, mut server) = new_pair(config(), false, now);
    run_handshake(&mut client, &mut server, now);

    client.send_application_data(b"hello").expect("send");
    let packets = collect_packets(&mut client);

    let stranger = "127.0.0.1:6000".parse().expect("addr");
    deliver_packets(&packets, &mut server, stranger, now);
    assert!(drain_outputs(&mut server).app_data.is_empty());
}
