mod common;

use std::time::Duration;

use common::{RawPeer, TestEngine, TestServer, start_client, wait_for};
use skein::{
    BusConfig, Challenge, ChallengeResponse, ClientConfig, ConnectionState,
    DEFAULT_CHALLENGE_TTL_MS, DisconnectReason, Message, MessageKind, NetError, NetworkMediator,
    RetryingMessageBus, ServerConfig, ServerEvent, SocketClientFacade, SocketServerFacade,
};

const PATIENCE: Duration = Duration::from_secs(2);

fn expect_challenge(peer: &RawPeer) -> Challenge {
    match peer.recv_kind(MessageKind::Challenge, PATIENCE) {
        Some(Message::Challenge(challenge)) => challenge,
        other => panic!("expected a challenge, got {:?}", other),
    }
}

fn expect_accepted(peer: &RawPeer) -> u32 {
    match peer.recv_kind(MessageKind::ConnectionAccepted, PATIENCE) {
        Some(Message::ConnectionAccepted { session_id }) => session_id,
        other => panic!("expected acceptance, got {:?}", other),
    }
}

fn count_connected(events: &[ServerEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, ServerEvent::ClientConnected { .. }))
        .count()
}

#[test]
fn test_unrecognized_datagram_gets_exactly_one_challenge() {
    let server = TestServer::start(TestEngine::admitting(), 10);
    let peer = RawPeer::bind();

    peer.send(&Message::ConnectRequest, server.target());
    expect_challenge(&peer);

    // Further datagrams during the live attempt must not start another one.
    peer.send(&Message::ConnectRequest, server.target());
    peer.send(&Message::ConnectRequest, server.target());
    std::thread::sleep(Duration::from_millis(50));

    let challenges = server.bus.reliable_calls(MessageKind::Challenge);
    assert_eq!(challenges.len(), 1);
    assert_eq!(challenges[0].endpoint, peer.addr());
    assert_eq!(challenges[0].ttl_ms, DEFAULT_CHALLENGE_TTL_MS);
    assert_eq!(server.facade.pending_count(), 1);
    assert_eq!(
        server.facade.drain_events(),
        vec![ServerEvent::ChallengeIssued { addr: peer.addr() }]
    );
}

#[test]
fn test_full_handshake_between_facades() {
    let server = TestServer::start(TestEngine::admitting(), 10);
    assert_eq!(server.engine.established(), 1);

    let client_engine = TestEngine::admitting();
    let client_bus = common::RecordingBus::spawn();
    let client_mediator = NetworkMediator::new(client_bus.clone(), client_engine.clone());
    let client = SocketClientFacade::new(ClientConfig::default());

    client
        .start_client("127.0.0.1", server.port(), client_mediator.clone())
        .unwrap();

    assert!(wait_for(PATIENCE, || client.is_connected()));
    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(client.session_id().is_some());
    assert_eq!(client_engine.established(), 1);

    // Give stray retransmissions a chance to show up.
    std::thread::sleep(Duration::from_millis(100));

    let events = server.facade.drain_events();
    assert_eq!(count_connected(&events), 1);
    assert_eq!(server.facade.session_count(), 1);
    assert_eq!(server.bus.reliable_calls(MessageKind::Challenge).len(), 1);

    let responses = client_bus.reliable_calls(MessageKind::ChallengeResponse);
    assert!(!responses.is_empty());
    assert!(responses.iter().all(|call| call.ttl_ms == 0));

    // Every handshake record has been resolved on both sides.
    assert_eq!(server.bus.inner().pending_count(), 0);
    assert_eq!(client_bus.inner().pending_count(), 0);
    assert_eq!(client_engine.established(), 1);
}

#[test]
fn test_refused_admission_sends_nothing() {
    let server = TestServer::start(TestEngine::refusing(), 10);
    let peer = RawPeer::bind();

    // A response to a challenge the server never issued, well formed anyway.
    let unsolicited = ChallengeResponse::answer(&Challenge::generate());
    for _ in 0..5 {
        peer.send(&Message::ConnectRequest, server.target());
        peer.send(&Message::ChallengeResponse(unsolicited.clone()), server.target());
        peer.send(&Message::Heartbeat, server.target());
    }

    assert!(peer.collect(Duration::from_millis(150)).is_empty());
    assert!(server.bus.reliable_calls(MessageKind::Challenge).is_empty());
    assert_eq!(server.bus.unreliable_count(MessageKind::ConnectionAccepted), 0);
    assert_eq!(server.facade.pending_count(), 0);
    assert_eq!(server.facade.session_count(), 0);
}

#[test]
fn test_refusing_client_never_answers() {
    let server = TestServer::start(TestEngine::admitting(), 10);
    let (client, client_bus) = start_client(&server, TestEngine::refusing());

    // The server keeps retransmitting its challenge for the whole TTL.
    std::thread::sleep(Duration::from_millis(150));

    assert!(!server.bus.reliable_calls(MessageKind::Challenge).is_empty());
    assert!(
        client_bus
            .reliable_calls(MessageKind::ChallengeResponse)
            .is_empty()
    );
    assert_eq!(client.state(), ConnectionState::Connecting);
    assert_eq!(server.facade.session_count(), 0);
}

#[test]
fn test_zero_challenge_ttl_uses_bus_default() {
    let server = TestServer::start_with(
        TestEngine::admitting(),
        ServerConfig {
            port: 0,
            challenge_ttl_ms: 0,
            ..ServerConfig::default()
        },
    );
    let (client, _client_bus) = start_client(&server, TestEngine::admitting());

    assert!(wait_for(PATIENCE, || client.is_connected()));
    assert_eq!(server.facade.session_count(), 1);

    let challenges = server.bus.reliable_calls(MessageKind::Challenge);
    assert_eq!(challenges.len(), 1);
    assert_eq!(challenges[0].ttl_ms, 0);
}

#[test]
fn test_zero_challenge_ttl_keeps_attempt_live() {
    let server = TestServer::start_with(
        TestEngine::admitting(),
        ServerConfig {
            port: 0,
            challenge_ttl_ms: 0,
            ..ServerConfig::default()
        },
    );
    let peer = RawPeer::bind();

    peer.send(&Message::ConnectRequest, server.target());
    let challenge = expect_challenge(&peer);

    // Well past the default challenge TTL, still inside the bus default.
    std::thread::sleep(Duration::from_millis(DEFAULT_CHALLENGE_TTL_MS + 100));
    assert_eq!(server.facade.pending_count(), 1);

    peer.send(
        &Message::ChallengeResponse(ChallengeResponse::answer(&challenge)),
        server.target(),
    );
    expect_accepted(&peer);
    assert_eq!(server.bus.reliable_calls(MessageKind::Challenge).len(), 1);
}

#[test]
fn test_silent_session_times_out() {
    let server = TestServer::start_with(
        TestEngine::admitting(),
        ServerConfig {
            port: 0,
            session_timeout: Duration::from_millis(200),
            ..ServerConfig::default()
        },
    );
    let peer = RawPeer::bind();

    peer.send(&Message::ConnectRequest, server.target());
    let challenge = expect_challenge(&peer);
    peer.send(
        &Message::ChallengeResponse(ChallengeResponse::answer(&challenge)),
        server.target(),
    );
    let session_id = expect_accepted(&peer);

    assert!(wait_for(PATIENCE, || server.facade.session_count() == 0));
    assert!(server.facade.drain_events().contains(&ServerEvent::ClientDisconnected {
        session_id,
        addr: peer.addr(),
        reason: DisconnectReason::Timeout,
    }));

    // The freed endpoint is challenged afresh.
    peer.collect(Duration::from_millis(20));
    peer.send(&Message::ConnectRequest, server.target());
    expect_challenge(&peer);
}

#[test]
fn test_heartbeats_keep_session_alive() {
    let server = TestServer::start_with(
        TestEngine::admitting(),
        ServerConfig {
            port: 0,
            session_timeout: Duration::from_millis(200),
            ..ServerConfig::default()
        },
    );
    let peer = RawPeer::bind();

    peer.send(&Message::ConnectRequest, server.target());
    let challenge = expect_challenge(&peer);
    peer.send(
        &Message::ChallengeResponse(ChallengeResponse::answer(&challenge)),
        server.target(),
    );
    expect_accepted(&peer);

    for _ in 0..8 {
        std::thread::sleep(Duration::from_millis(50));
        peer.send(&Message::Heartbeat, server.target());
    }

    assert_eq!(server.facade.session_count(), 1);
}

#[test]
fn test_invalid_response_leaves_challenge_pending() {
    let server = TestServer::start(TestEngine::admitting(), 10);
    let peer = RawPeer::bind();

    peer.send(&Message::ConnectRequest, server.target());
    let challenge = expect_challenge(&peer);

    let forged = ChallengeResponse::from_parts(challenge.nonce().to_vec(), vec![0u8; 32]);
    peer.send(&Message::ChallengeResponse(forged), server.target());
    std::thread::sleep(Duration::from_millis(30));

    assert_eq!(server.facade.session_count(), 0);
    assert!(
        server
            .bus
            .inner()
            .is_pending(peer.addr(), MessageKind::Challenge)
    );

    let honest = ChallengeResponse::answer(&challenge);
    peer.send(&Message::ChallengeResponse(honest), server.target());

    expect_accepted(&peer);
    assert_eq!(server.facade.session_count(), 1);
    assert!(
        !server
            .bus
            .inner()
            .is_pending(peer.addr(), MessageKind::Challenge)
    );
}

#[test]
fn test_unanswered_challenge_stops_after_ttl() {
    let server = TestServer::start(TestEngine::admitting(), 10);
    let peer = RawPeer::bind();

    peer.send(&Message::ConnectRequest, server.target());
    expect_challenge(&peer);

    let ttl = Duration::from_millis(DEFAULT_CHALLENGE_TTL_MS);
    let retransmitted = peer.collect(ttl + Duration::from_millis(100));
    assert!(retransmitted.len() >= 2);

    assert!(peer.collect(Duration::from_millis(200)).is_empty());
    assert!(
        !server
            .bus
            .inner()
            .is_pending(peer.addr(), MessageKind::Challenge)
    );

    assert!(wait_for(PATIENCE, || server.facade.pending_count() == 0));
    let events = server.facade.drain_events();
    assert!(events.contains(&ServerEvent::ChallengeAbandoned { addr: peer.addr() }));
}

#[test]
fn test_abandoned_attempt_is_rechallenged_with_fresh_nonce() {
    let server = TestServer::start(TestEngine::admitting(), 10);
    let peer = RawPeer::bind();

    peer.send(&Message::ConnectRequest, server.target());
    let first = expect_challenge(&peer);

    assert!(wait_for(PATIENCE, || server.facade.pending_count() == 0));
    peer.collect(Duration::from_millis(50));

    peer.send(&Message::ConnectRequest, server.target());
    let second = expect_challenge(&peer);

    assert_ne!(first.nonce(), second.nonce());

    // The stale answer no longer verifies.
    peer.send(
        &Message::ChallengeResponse(ChallengeResponse::answer(&first)),
        server.target(),
    );
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(server.facade.session_count(), 0);
}

#[test]
fn test_replayed_response_does_not_duplicate_session() {
    let server = TestServer::start(TestEngine::admitting(), 10);
    let peer = RawPeer::bind();

    peer.send(&Message::ConnectRequest, server.target());
    let challenge = expect_challenge(&peer);
    let response = Message::ChallengeResponse(ChallengeResponse::answer(&challenge));

    peer.send(&response, server.target());
    let first = expect_accepted(&peer);

    peer.send(&response, server.target());
    let second = expect_accepted(&peer);

    assert_eq!(first, second);
    assert_eq!(server.facade.session_count(), 1);
    assert_eq!(count_connected(&server.facade.drain_events()), 1);
}

#[test]
fn test_full_server_ignores_new_peers() {
    let server = TestServer::start(TestEngine::admitting(), 1);

    let first = RawPeer::bind();
    first.send(&Message::ConnectRequest, server.target());
    let challenge = expect_challenge(&first);
    first.send(
        &Message::ChallengeResponse(ChallengeResponse::answer(&challenge)),
        server.target(),
    );
    expect_accepted(&first);

    let second = RawPeer::bind();
    second.send(&Message::ConnectRequest, server.target());

    assert!(second.collect(Duration::from_millis(150)).is_empty());
    assert_eq!(server.facade.session_count(), 1);
}

#[test]
fn test_shutdown_cancels_retries_and_notifies_sessions() {
    let server = TestServer::start(TestEngine::admitting(), 10);

    let connected = RawPeer::bind();
    connected.send(&Message::ConnectRequest, server.target());
    let challenge = expect_challenge(&connected);
    connected.send(
        &Message::ChallengeResponse(ChallengeResponse::answer(&challenge)),
        server.target(),
    );
    let session_id = expect_accepted(&connected);

    let pending = RawPeer::bind();
    pending.send(&Message::ConnectRequest, server.target());
    expect_challenge(&pending);

    server.facade.shut_down();

    assert_eq!(server.bus.inner().pending_count(), 0);
    assert!(server.facade.socket().is_none());
    assert!(!server.facade.is_running());
    assert!(server.mediator.socket_facade().is_none());

    assert!(
        connected
            .recv_kind(MessageKind::Disconnect, PATIENCE)
            .is_some()
    );
    pending.collect(Duration::from_millis(20));
    assert!(pending.collect(Duration::from_millis(150)).is_empty());

    assert!(server.facade.drain_events().contains(&ServerEvent::ClientDisconnected {
        session_id,
        addr: connected.addr(),
        reason: DisconnectReason::Shutdown,
    }));

    // A second call is a no-op.
    server.facade.shut_down();
}

#[test]
fn test_client_disconnect_reaches_server() {
    let server = TestServer::start(TestEngine::admitting(), 10);

    let bus = RetryingMessageBus::spawn(BusConfig::default()).unwrap();
    let mediator = NetworkMediator::new(bus.clone(), TestEngine::admitting());
    let client = SocketClientFacade::new(ClientConfig::default());
    client
        .start_client("127.0.0.1", server.port(), mediator)
        .unwrap();
    assert!(wait_for(PATIENCE, || client.is_connected()));
    let session_id = client.session_id().unwrap();
    let client_addr = client.local_addr().unwrap();

    client.shut_down();
    assert_eq!(client.state(), ConnectionState::Disconnected);

    assert!(wait_for(PATIENCE, || server.facade.session_count() == 0));
    let events = server.facade.drain_events();
    assert!(events.iter().any(|event| matches!(
        event,
        ServerEvent::ClientDisconnected {
            session_id: id,
            addr,
            reason: DisconnectReason::Graceful,
        } if *id == session_id && addr.port() == client_addr.port()
    )));
}

#[test]
fn test_start_errors_are_reported() {
    let server = TestServer::start(TestEngine::admitting(), 10);

    let again = server
        .facade
        .start_server(0, 10, server.mediator.clone())
        .unwrap_err();
    assert!(matches!(again, NetError::AlreadyStarted));

    let other_mediator = NetworkMediator::new(
        RetryingMessageBus::spawn(BusConfig::default()).unwrap(),
        TestEngine::admitting(),
    );
    let conflict = SocketServerFacade::new()
        .start_server(server.port(), 10, other_mediator)
        .unwrap_err();
    assert!(matches!(conflict, NetError::Bind { .. }));

    let shared = SocketServerFacade::new()
        .start_server_with(
            ServerConfig {
                port: 0,
                ..ServerConfig::default()
            },
            server.mediator.clone(),
        )
        .unwrap_err();
    assert!(matches!(shared, NetError::MediatorBound));

    // The failed attempts left the running server untouched.
    assert!(server.facade.is_running());
    assert!(server.mediator.socket_facade().is_some());
}

#[test]
fn test_server_restarts_after_shutdown() {
    let server = TestServer::start(TestEngine::admitting(), 10);
    server.facade.shut_down();

    server
        .facade
        .start_server_with(
            ServerConfig {
                port: 0,
                ..ServerConfig::default()
            },
            server.mediator.clone(),
        )
        .unwrap();

    let peer = RawPeer::bind();
    peer.send(&Message::ConnectRequest, server.target());
    expect_challenge(&peer);
    assert_eq!(server.engine.established(), 2);
}
