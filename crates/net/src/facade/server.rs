use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::ServerConfig;
use crate::error::NetError;
use crate::interpret::interpret;
use crate::mediator::NetworkMediator;
use crate::net::{
    Challenge, Endpoint, MAX_PACKET_SIZE, Message, NetworkStats, Refusal, Session, SessionId,
    SessionTable, Socket, UdpChannel, decode,
};
use crate::sync::{lock, read, write};

use super::events::{DisconnectReason, ServerEvent};

const MAX_PENDING_EVENTS: usize = 1024;

/// Listening side of the handshake.
///
/// Every datagram from an endpoint the server does not recognize starts a
/// connection attempt: admission is checked, a fresh challenge is stored and
/// sent reliably with the configured challenge TTL. Datagrams from recognized
/// endpoints are decoded and handed to the interpreters.
pub struct SocketServerFacade {
    config: RwLock<ServerConfig>,
    channel: RwLock<Option<Arc<UdpChannel>>>,
    sessions: Mutex<SessionTable>,
    events: Mutex<VecDeque<ServerEvent>>,
    mediator: Mutex<Option<Arc<NetworkMediator>>>,
    running: Arc<AtomicBool>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl SocketServerFacade {
    pub fn new() -> Arc<Self> {
        let config = ServerConfig::default();
        let sessions = SessionTable::with_timeout(
            config.max_connections,
            Duration::from_millis(config.challenge_ttl_ms),
            config.session_timeout,
        );

        Arc::new(Self {
            config: RwLock::new(config),
            channel: RwLock::new(None),
            sessions: Mutex::new(sessions),
            events: Mutex::new(VecDeque::new()),
            mediator: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            receiver: Mutex::new(None),
        })
    }

    pub fn start_server(
        self: &Arc<Self>,
        port: u16,
        max_connections: usize,
        mediator: Arc<NetworkMediator>,
    ) -> Result<(), NetError> {
        let config = ServerConfig {
            port,
            max_connections,
            ..ServerConfig::default()
        };
        self.start_server_with(config, mediator)
    }

    /// Binds the listening socket on `0.0.0.0` (IPv4 only) and starts the
    /// receive thread. Transport failures are returned here and never retried.
    pub fn start_server_with(
        self: &Arc<Self>,
        config: ServerConfig,
        mediator: Arc<NetworkMediator>,
    ) -> Result<(), NetError> {
        let mut slot = write(&self.channel);
        if slot.is_some() {
            return Err(NetError::AlreadyStarted);
        }

        let port = config.port;
        let channel = UdpChannel::bind((Ipv4Addr::UNSPECIFIED, port))
            .map_err(|source| NetError::Bind { port, source })?;
        channel.set_read_timeout(config.poll_interval)?;
        let channel = Arc::new(channel);

        mediator.bind_server(self)?;

        // An attempt stays live exactly as long as the bus keeps retrying its
        // challenge.
        let challenge_window = mediator
            .message_bus()
            .effective_ttl(config.challenge_ttl_ms);
        *lock(&self.sessions) = SessionTable::with_timeout(
            config.max_connections,
            challenge_window,
            config.session_timeout,
        );
        lock(&self.events).clear();
        *lock(&self.mediator) = Some(Arc::clone(&mediator));
        *write(&self.config) = config;
        *slot = Some(Arc::clone(&channel));
        drop(slot);

        self.running.store(true, Ordering::SeqCst);

        let spawned = thread::Builder::new()
            .name("skein-server-recv".to_string())
            .spawn({
                let server = Arc::downgrade(self);
                let mediator = Arc::clone(&mediator);
                let channel = Arc::clone(&channel);
                move || receive_loop(server, mediator, channel)
            });

        match spawned {
            Ok(handle) => *lock(&self.receiver) = Some(handle),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                *write(&self.channel) = None;
                *lock(&self.mediator) = None;
                mediator.unbind(&**self);
                return Err(e.into());
            }
        }

        log::info!("Server listening on {}", channel.local_addr());
        mediator.engine_proxy().networking_established();

        Ok(())
    }

    fn poll(&self, mediator: &NetworkMediator, channel: &UdpChannel, buffer: &mut [u8]) {
        match channel.receive(buffer) {
            Ok(Some((size, from))) => {
                self.handle_datagram(mediator, channel, from, &buffer[..size]);
            }
            Ok(None) => {}
            Err(e) => {
                if !channel.is_closed() {
                    log::warn!("Receive failed on {}: {}", channel.local_addr(), e);
                    thread::sleep(read(&self.config).poll_interval);
                }
            }
        }

        self.prune_abandoned();
        self.prune_timed_out(mediator);
    }

    fn handle_datagram(
        &self,
        mediator: &NetworkMediator,
        channel: &UdpChannel,
        from: SocketAddr,
        data: &[u8],
    ) {
        let recognized = {
            let now = Instant::now();
            let mut sessions = lock(&self.sessions);
            sessions.touch(&from, now);
            sessions.is_recognized(&from, now)
        };

        if !recognized {
            self.begin_challenge(mediator, from);
            return;
        }

        match decode(data) {
            Ok(message) => interpret(mediator, from, message),
            Err(e) => {
                log::trace!("Dropping datagram from {}: {}", from, e);
                channel.record_dropped();
            }
        }
    }

    fn prune_abandoned(&self) {
        let abandoned = lock(&self.sessions).prune_abandoned(Instant::now());
        for addr in abandoned {
            log::debug!("Challenge to {} abandoned", addr);
            self.push_event(ServerEvent::ChallengeAbandoned { addr });
        }
    }

    fn prune_timed_out(&self, mediator: &NetworkMediator) {
        let now = Instant::now();
        let timed_out = lock(&self.sessions).prune_timed_out(now);
        for session in timed_out {
            log::info!(
                "Client {} (session {}) timed out, connected for {:?}",
                session.addr,
                session.session_id,
                session.connected_for(now)
            );
            mediator.message_bus().cancel_endpoint(session.addr);
            self.push_event(ServerEvent::ClientDisconnected {
                session_id: session.session_id,
                addr: session.addr,
                reason: DisconnectReason::Timeout,
            });
        }
    }

    /// Starts a connection attempt for `endpoint` unless one is already live.
    ///
    /// Refusals are silent towards the peer: nothing is sent when the server
    /// is full or the engine denies admission.
    pub fn begin_challenge(&self, mediator: &NetworkMediator, endpoint: Endpoint) {
        let now = Instant::now();
        {
            let sessions = lock(&self.sessions);
            if sessions.is_recognized(&endpoint, now) {
                return;
            }
            if sessions.is_full() {
                log::debug!("Server full; ignoring {}", endpoint);
                return;
            }
        }

        if !mediator.engine_proxy().can_connect_to_challenge() {
            log::debug!("Engine refused admission for {}", endpoint);
            return;
        }

        let Some(socket) = self.socket() else {
            return;
        };

        let challenge = Challenge::generate();
        match lock(&self.sessions).issue_challenge(endpoint, challenge.clone(), now) {
            Ok(()) => {}
            Err(Refusal::AlreadyRecognized) => return,
            Err(Refusal::ServerFull) => {
                log::debug!("Server full; ignoring {}", endpoint);
                return;
            }
        }

        let ttl_ms = read(&self.config).challenge_ttl_ms;
        if let Err(e) = mediator.message_bus().send_reliable_message(
            Message::Challenge(challenge),
            socket,
            endpoint,
            ttl_ms,
        ) {
            log::warn!("Failed to challenge {}: {}", endpoint, e);
            return;
        }

        log::debug!("Challenged {}", endpoint);
        self.push_event(ServerEvent::ChallengeIssued { addr: endpoint });
    }

    /// The challenge a response from `endpoint` has to answer.
    pub fn issued_challenge(&self, endpoint: Endpoint) -> Option<Challenge> {
        lock(&self.sessions).issued_challenge(&endpoint, Instant::now())
    }

    /// Creates the session for a freshly verified endpoint. Returns `None` if
    /// the endpoint already has one or no slot is left, so repeated calls for
    /// the same endpoint never create a second session.
    pub fn create_player(&self, endpoint: Endpoint) -> Option<SessionId> {
        lock(&self.sessions).create_session(endpoint, Instant::now())
    }

    /// Finalizes an accepted connection.
    pub fn challenge_success(&self, mediator: &NetworkMediator, endpoint: Endpoint) {
        let Some(session_id) = lock(&self.sessions).session_id(&endpoint) else {
            return;
        };

        log::info!("Client {} connected as session {}", endpoint, session_id);
        self.push_event(ServerEvent::ClientConnected {
            session_id,
            addr: endpoint,
        });
        self.send_accepted(mediator, endpoint, session_id);
    }

    /// Handles a valid response that did not produce a new session.
    pub fn confirm_verified(&self, mediator: &NetworkMediator, endpoint: Endpoint) {
        let existing = lock(&self.sessions).session_id(&endpoint);
        match existing {
            Some(session_id) => {
                log::debug!("Re-confirming session {} for {}", session_id, endpoint);
                self.send_accepted(mediator, endpoint, session_id);
            }
            None => {
                log::info!("No session slot left for verified client {}", endpoint);
                lock(&self.sessions).remove_by_addr(&endpoint);
                self.push_event(ServerEvent::ConnectionDenied { addr: endpoint });
            }
        }
    }

    pub fn remove_player(&self, endpoint: Endpoint) {
        let removed = lock(&self.sessions).remove_by_addr(&endpoint);
        if let Some(session) = removed {
            log::info!("Client {} (session {}) disconnected", endpoint, session.session_id);
            self.push_event(ServerEvent::ClientDisconnected {
                session_id: session.session_id,
                addr: endpoint,
                reason: DisconnectReason::Graceful,
            });
        }
    }

    fn send_accepted(&self, mediator: &NetworkMediator, endpoint: Endpoint, session_id: SessionId) {
        let Some(socket) = self.socket() else {
            return;
        };
        let accepted = Message::ConnectionAccepted { session_id };
        if let Err(e) =
            mediator
                .message_bus()
                .send_unreliable_message(&accepted, socket.as_ref(), endpoint)
        {
            log::warn!("Failed to confirm session for {}: {}", endpoint, e);
        }
    }

    /// Stops inbound work, cancels pending retries, tells connected clients
    /// goodbye and releases the socket. Safe to call more than once and with
    /// retries in flight.
    pub fn shut_down(&self) {
        let Some(channel) = write(&self.channel).take() else {
            return;
        };

        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = lock(&self.receiver).take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }

        let sessions = lock(&self.sessions).clear();
        let mediator = lock(&self.mediator).take();

        if let Some(mediator) = mediator {
            let bus = mediator.message_bus();
            let cancelled = bus.cancel_socket(channel.local_addr());
            log::debug!("Cancelled {} pending sends", cancelled);

            for session in &sessions {
                let _ = bus.send_unreliable_message(
                    &Message::Disconnect,
                    &*channel,
                    session.addr,
                );
            }
            mediator.unbind(self);
        }

        for session in sessions {
            self.push_event(ServerEvent::ClientDisconnected {
                session_id: session.session_id,
                addr: session.addr,
                reason: DisconnectReason::Shutdown,
            });
        }

        channel.close();
        log::info!("Server on {} shut down", channel.local_addr());
    }

    pub fn socket(&self) -> Option<Arc<dyn Socket>> {
        read(&self.channel)
            .as_ref()
            .map(|channel| Arc::clone(channel) as Arc<dyn Socket>)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        read(&self.channel).as_ref().map(|channel| channel.local_addr())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> Option<NetworkStats> {
        read(&self.channel).as_ref().map(|channel| channel.stats())
    }

    pub fn session_count(&self) -> usize {
        lock(&self.sessions).session_count()
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.sessions).pending_count()
    }

    pub fn sessions(&self) -> Vec<Session> {
        lock(&self.sessions).iter().cloned().collect()
    }

    pub fn drain_events(&self) -> Vec<ServerEvent> {
        lock(&self.events).drain(..).collect()
    }

    fn push_event(&self, event: ServerEvent) {
        let mut events = lock(&self.events);
        while events.len() >= MAX_PENDING_EVENTS {
            events.pop_front();
        }
        events.push_back(event);
    }
}

fn receive_loop(
    server: Weak<SocketServerFacade>,
    mediator: Arc<NetworkMediator>,
    channel: Arc<UdpChannel>,
) {
    let mut buffer = [0u8; MAX_PACKET_SIZE];

    while !channel.is_closed() {
        let Some(server) = server.upgrade() else {
            break;
        };
        if !server.is_running() {
            break;
        }
        server.poll(&mediator, &channel, &mut buffer);
    }

    log::debug!("Server receive loop on {} stopped", channel.local_addr());
}

impl Drop for SocketServerFacade {
    fn drop(&mut self) {
        self.shut_down();
    }
}
