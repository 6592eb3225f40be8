//! Flight retransmission, backoff and timeouts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dtls_flight::{
    Config, ConfigBuilder, Error, FailureKind, HandshakeCoordinator, NullRecordLayer, State,
};

use crate::common::*;

fn config_with(f: impl FnOnce(ConfigBuilder) -> ConfigBuilder) -> Arc<Config> {
    Arc::new(f(Config::builder().rng_seed(3)).build().expect("config"))
}

#[test]
fn client_resends_identical_client_hello() {
    let _ = env_logger::try_init();

    let mut now = Instant::now();
    let (mut client, _server) = new_pair(config(), false, now);

    client.start(now).expect("client start");
    let initial = collect_packets(&mut client);
    assert_eq!(initial.len(), 1);

    trigger_timeout(&mut client, &mut now).expect("timeout");
    let resent = collect_packets(&mut client);
    assert_eq!(initial, resent, "resend must be byte-identical");
}

#[test]
fn backoff_doubles_up_to_ceiling() {
    let _ = env_logger::try_init();

    let start = Instant::now();
    let mut now = start;
    let config = config_with(|b| {
        b.max_timeout(Duration::from_secs(4))
            .max_retransmits(6)
            .idle_timeout(Duration::from_secs(600))
    });
    let (mut client, _server) = new_pair(config, false, now);

    client.start(now).expect("client start");

    let mut intervals = Vec::new();
    for _ in 0..5 {
        let before = now;
        trigger_timeout(&mut client, &mut now).expect("timeout");
        intervals.push(now - before);
    }

    let secs: Vec<u64> = intervals.iter().map(|d| d.as_secs()).collect();
    assert_eq!(secs, vec![1, 2, 4, 4, 4]);
}

#[test]
fn retransmission_ceiling_closes_session() {
    let _ = env_logger::try_init();

    let mut now = Instant::now();
    let config = config_with(|b| b.max_retransmits(5).idle_timeout(Duration::from_secs(600)));
    let (mut client, _server) = new_pair(config, false, now);

    client.start(now).expect("client start");
    let initial = collect_packets(&mut client);

    for i in 0..5 {
        trigger_timeout(&mut client, &mut now).expect("resend");
        let resent = collect_packets(&mut client);
        assert_eq!(resent, initial, "resend {} differs", i + 1);
    }

    let err = trigger_timeout(&mut client, &mut now).expect_err("ceiling");
    let Error::Failed(failure) = err else {
        panic!("unexpected error {:?}", err);
    };
    assert_eq!(failure.kind, FailureKind::RetransmitLimit);
    assert!(failure.is_timeout());
    assert_eq!(client.state(), State::Closed);
    assert_eq!(client.failure(), Some(failure));

    let c = drain_outputs(&mut client);
    assert!(c.closed);
    assert!(c.packets.is_empty(), "no further retransmission");

    // Later expiries are no-ops.
    client
        .on_timer(now + Duration::from_secs(3600))
        .expect("no-op on closed session");
    let c = drain_outputs(&mut client);
    assert!(!c.closed);
    assert!(c.packets.is_empty());
}

#[test]
fn multi_datagram_flight_resent_whole() {
    let _ = env_logger::try_init();

    let mut now = Instant::now();
    let config = config();
    let server_config = config_with(|b| b.mtu(128));
    let cookies = cookie_store(&config, now);

    let mut client = HandshakeCoordinator::connect(
        Arc::clone(&config),
        server_addr(),
        NullRecordLayer::client(),
    );
    let mut server = HandshakeCoordinator::accept(
        server_config,
        cookies,
        NullRecordLayer::server(),
    );

    client.start(now).expect("client start");
    let ch1 = collect_packets(&mut client);
    deliver_packets(&ch1, &mut server, client_addr(), now);
    let hvr = collect_packets(&mut server);
    deliver_packets(&hvr, &mut client, server_addr(), now);
    let ch2 = collect_packets(&mut client);
    deliver_packets(&ch2, &mut server, client_addr(), now);

    let flight = collect_packets(&mut server);
    assert!(flight.len() > 1, "flight should span datagrams");
    assert!(flight.iter().all(|p| p.len() <= 128));

    trigger_timeout(&mut server, &mut now).expect("timeout");
    let resent = collect_packets(&mut server);
    assert_eq!(flight, resent);

    deliver_packets(&resent, &mut client, server_addr(), now);
    assert_eq!(client.state(), State::Established);
}

#[test]
fn flight_never_partially_queued() {
    let _ = env_logger::try_init();

    let mut now = Instant::now();
    let config = config();
    let server_config = config_with(|b| b.mtu(128).max_queue_tx(1));
    let cookies = cookie_store(&config, now);

    let mut client = HandshakeCoordinator::connect(
        Arc::clone(&config),
        server_addr(),
        NullRecordLayer::client(),
    );
    let mut server = HandshakeCoordinator::accept(
        server_config,
        cookies,
        NullRecordLayer::server(),
    );

    client.start(now).expect("client start");
    let ch1 = collect_packets(&mut client);
    deliver_packets(&ch1, &mut server, client_addr(), now);
    let hvr = collect_packets(&mut server);
    assert_eq!(hvr.len(), 1);
    deliver_packets(&hvr, &mut client, server_addr(), now);
    let ch2 = collect_packets(&mut client);
    deliver_packets(&ch2, &mut server, client_addr(), now);

    // The flight is committed but does not fit, so nothing goes out.
    assert_eq!(server.state(), State::CompletingHandshake);
    assert!(collect_packets(&mut server).is_empty());

    trigger_timeout(&mut server, &mut now).expect("timeout");
    assert!(collect_packets(&mut server).is_empty());
    assert_eq!(server.state(), State::CompletingHandshake);
}

#[test]
fn duplicate_flight_triggers_resend() {
    let _ = env_logger::try_init();

    let mut now = Instant::now();
    let (mut client, mut server) = new_pair(config(), true, now);

    client.start(now).expect("client start");
    let ch1 = collect_packets(&mut client);
    deliver_packets(&ch1, &mut server, client_addr(), now);
    let hvr = collect_packets(&mut server);
    deliver_packets(&hvr, &mut client, server_addr(), now);
    let ch2 = collect_packets(&mut client);
    deliver_packets(&ch2, &mut server, client_addr(), now);
    let server_flight = collect_packets(&mut server);
    deliver_packets(&server_flight, &mut client, server_addr(), now);
    assert_eq!(client.state(), State::Established);

    // Client's final flight is lost.
    let final_flight = collect_packets(&mut client);
    assert!(!final_flight.is_empty());

    trigger_timeout(&mut server, &mut now).expect("server resend");
    let resent = collect_packets(&mut server);
    assert_eq!(resent, server_flight);

    // The duplicate makes the client resend its final flight.
    deliver_packets(&resent, &mut client, server_addr(), now);
    let again = collect_packets(&mut client);
    assert_eq!(again, final_flight);

    deliver_packets(&again, &mut server, client_addr(), now);
    assert_eq!(server.state(), State::Established);
}

#[test]
fn lost_server_flight_recovered_by_client_hello_resend() {
    let _ = env_logger::try_init();

    let mut now = Instant::now();
    let (mut client, mut server) = new_pair(config(), false, now);

    client.start(now).expect("client start");
    let ch1 = collect_packets(&mut client);
    deliver_packets(&ch1, &mut server, client_addr(), now);
    let hvr = collect_packets(&mut server);
    deliver_packets(&hvr, &mut client, server_addr(), now);
    let ch2 = collect_packets(&mut client);
    deliver_packets(&ch2, &mut server, client_addr(), now);

    // Server flight lost.
    let lost = collect_packets(&mut server);

    trigger_timeout(&mut client, &mut now).expect("client resend");
    let ch2_again = collect_packets(&mut client);
    assert_eq!(ch2_again, ch2);

    deliver_packets(&ch2_again, &mut server, client_addr(), now);
    let resent = collect_packets(&mut server);
    assert_eq!(resent, lost);

    deliver_packets(&resent, &mut client, server_addr(), now);
    assert_eq!(client.state(), State::Established);
}

#[test]
fn lost_hello_verify_request_recovers() {
    let _ = env_logger::try_init();

    let mut now = Instant::now();
    let (mut client, mut server) = new_pair(config(), false, now);

    client.start(now).expect("client start");
    let ch1 = collect_packets(&mut client);
    deliver_packets(&ch1, &mut server, client_addr(), now);
    let _lost = collect_packets(&mut server);

    trigger_timeout(&mut client, &mut now).expect("client resend");
    let ch1_again = collect_packets(&mut client);
    assert_eq!(ch1_again, ch1);

    deliver_packets(&ch1_again, &mut server, client_addr(), now);
    assert_eq!(server.peer(), None);

    run_handshake(&mut client, &mut server, now);
}

#[test]
fn idle_timeout_during_handshake() {
    let _ = env_logger::try_init();

    let mut now = Instant::now();
    let bound_at = now;
    let config = config_with(|b| b.max_retransmits(10).idle_timeout(Duration::from_secs(10)));
    let (mut client, mut server) = new_pair(config, false, now);

    client.start(now).expect("client start");
    let ch1 = collect_packets(&mut client);
    deliver_packets(&ch1, &mut server, client_addr(), now);
    let hvr = collect_packets(&mut server);
    deliver_packets(&hvr, &mut client, server_addr(), now);
    let ch2 = collect_packets(&mut client);
    deliver_packets(&ch2, &mut server, client_addr(), now);
    assert_eq!(server.state(), State::CompletingHandshake);

    // Client goes silent. Resends at 1s, 3s and 7s, idle at 10s.
    let mut resends = 0;
    let err = loop {
        match trigger_timeout(&mut server, &mut now) {
            Ok(()) => resends += 1,
            Err(e) => break e,
        }
    };

    assert_eq!(resends, 3);
    assert_eq!(now - bound_at, Duration::from_secs(10));
    assert!(matches!(err, Error::Failed(f) if f.kind == FailureKind::IdleTimeout));
    assert_eq!(server.state(), State::Closed);
    assert!(drain_outputs(&mut server).closed);
}

#[test]
fn idle_timeout_when_established() {
    let _ = env_logger::try_init();

    let mut now = Instant::now();
    let (mut client, mut server) = new_pair(config(), false, now);
    run_handshake(&mut client, &mut server, now);

    let established_at = now;
    let err = trigger_timeout(&mut client, &mut now).expect_err("idle");
    assert!(matches!(err, Error::Failed(f) if f.kind == FailureKind::IdleTimeout));
    assert_eq!(now - established_at, Duration::from_secs(60));
}
