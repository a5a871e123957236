use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::config::ClientConfig;
use crate::error::NetError;
use crate::interpret::interpret;
use crate::mediator::NetworkMediator;
use crate::net::{
    ConnectionState, MAX_PACKET_SIZE, Message, NetworkStats, SessionId, Socket, UdpChannel,
    decode, resolve,
};
use crate::sync::{lock, read, write};

#[derive(Debug)]
struct ClientStatus {
    state: ConnectionState,
    server: Option<SocketAddr>,
    session_id: Option<SessionId>,
}

impl Default for ClientStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            server: None,
            session_id: None,
        }
    }
}

/// Connecting side of the handshake.
///
/// [`SocketClientFacade::start_client`] only kicks things off: the rest of
/// the handshake runs on the receive thread through the interpreters, and
/// callers observe progress through [`SocketClientFacade::state`].
pub struct SocketClientFacade {
    config: ClientConfig,
    channel: RwLock<Option<Arc<UdpChannel>>>,
    status: Mutex<ClientStatus>,
    mediator: Mutex<Option<Arc<NetworkMediator>>>,
    running: Arc<AtomicBool>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl SocketClientFacade {
    pub fn new(config: ClientConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            channel: RwLock::new(None),
            status: Mutex::new(ClientStatus::default()),
            mediator: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            receiver: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Opens a socket towards `host:port` and sends the connect request.
    /// Returns as soon as the request is out; resolution and bind failures
    /// are reported here.
    pub fn start_client(
        self: &Arc<Self>,
        host: &str,
        port: u16,
        mediator: Arc<NetworkMediator>,
    ) -> Result<(), NetError> {
        let mut slot = write(&self.channel);
        if slot.is_some() {
            return Err(NetError::AlreadyStarted);
        }

        let server = resolve(host, port).map_err(|source| NetError::Resolve {
            host: host.to_string(),
            port,
            source,
        })?;
        let channel = UdpChannel::connect_to(server).map_err(|source| NetError::Bind {
            port: 0,
            source,
        })?;
        channel.set_read_timeout(self.config.poll_interval)?;
        let channel = Arc::new(channel);

        mediator.bind_client(self)?;

        *lock(&self.status) = ClientStatus {
            state: ConnectionState::Connecting,
            server: Some(server),
            session_id: None,
        };
        *lock(&self.mediator) = Some(Arc::clone(&mediator));
        *slot = Some(Arc::clone(&channel));
        drop(slot);

        self.running.store(true, Ordering::SeqCst);

        let spawned = thread::Builder::new()
            .name("skein-client-recv".to_string())
            .spawn({
                let client = Arc::downgrade(self);
                let mediator = Arc::clone(&mediator);
                let channel = Arc::clone(&channel);
                move || receive_loop(client, mediator, channel, server)
            });

        match spawned {
            Ok(handle) => *lock(&self.receiver) = Some(handle),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                *write(&self.channel) = None;
                *lock(&self.mediator) = None;
                *lock(&self.status) = ClientStatus::default();
                mediator.unbind(&**self);
                return Err(e.into());
            }
        }

        log::info!("Connecting to {} from {}", server, channel.local_addr());

        if let Err(e) = mediator.message_bus().send_reliable_message(
            Message::ConnectRequest,
            channel,
            server,
            self.config.request_ttl_ms,
        ) {
            log::warn!("Failed to send connect request to {}: {}", server, e);
        }

        Ok(())
    }

    fn poll(
        &self,
        mediator: &NetworkMediator,
        channel: &UdpChannel,
        server: SocketAddr,
        buffer: &mut [u8],
    ) {
        match channel.receive(buffer) {
            Ok(Some((size, from))) => {
                if from != server {
                    log::trace!("Ignoring datagram from stranger {}", from);
                    channel.record_dropped();
                    return;
                }
                match decode(&buffer[..size]) {
                    Ok(message) => interpret(mediator, from, message),
                    Err(e) => {
                        log::trace!("Dropping datagram from {}: {}", from, e);
                        channel.record_dropped();
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                if !channel.is_closed() {
                    log::warn!("Receive failed on {}: {}", channel.local_addr(), e);
                    thread::sleep(self.config.poll_interval);
                }
            }
        }
    }

    fn send_heartbeat(&self, mediator: &NetworkMediator, channel: &UdpChannel, server: SocketAddr) {
        if let Err(e) =
            mediator
                .message_bus()
                .send_unreliable_message(&Message::Heartbeat, channel, server)
        {
            log::debug!("Heartbeat to {} failed: {}", server, e);
        }
    }

    pub(crate) fn challenge_answered(&self) {
        let mut status = lock(&self.status);
        if status.state != ConnectionState::Connected {
            status.state = ConnectionState::ChallengeResponse;
        }
    }

    pub(crate) fn connection_accepted(&self, mediator: &NetworkMediator, session_id: SessionId) {
        let newly_connected = {
            let mut status = lock(&self.status);
            if status.state == ConnectionState::Connected {
                false
            } else {
                status.state = ConnectionState::Connected;
                status.session_id = Some(session_id);
                true
            }
        };

        if newly_connected {
            log::info!("Connected as session {}", session_id);
            mediator.engine_proxy().networking_established();
        }
    }

    pub(crate) fn server_disconnected(&self) {
        let mut status = lock(&self.status);
        if status.state != ConnectionState::Disconnected {
            log::info!("Server closed the connection");
        }
        status.state = ConnectionState::Disconnected;
        status.session_id = None;
    }

    /// Releases the local socket. Pending reliable sends are abandoned.
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

        let (was_connected, server) = {
            let status = lock(&self.status);
            (status.state == ConnectionState::Connected, status.server)
        };

        if let Some(mediator) = lock(&self.mediator).take() {
            let bus = mediator.message_bus();
            bus.cancel_socket(channel.local_addr());

            if let (true, Some(server)) = (was_connected, server) {
                let _ = bus.send_unreliable_message(&Message::Disconnect, &*channel, server);
            }
            mediator.unbind(self);
        }

        channel.close();
        *lock(&self.status) = ClientStatus::default();
        log::info!("Client on {} shut down", channel.local_addr());
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.status).state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn session_id(&self) -> Option<SessionId> {
        lock(&self.status).session_id
    }

    pub fn server_addr(&self) -> Option<SocketAddr> {
        lock(&self.status).server
    }

    pub fn socket(&self) -> Option<Arc<dyn Socket>> {
        read(&self.channel)
            .as_ref()
            .map(|channel| Arc::clone(channel) as Arc<dyn Socket>)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        read(&self.channel).as_ref().map(|channel| channel.local_addr())
    }

    pub fn stats(&self) -> Option<NetworkStats> {
        read(&self.channel).as_ref().map(|channel| channel.stats())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn receive_loop(
    client: Weak<SocketClientFacade>,
    mediator: Arc<NetworkMediator>,
    channel: Arc<UdpChannel>,
    server: SocketAddr,
) {
    let mut buffer = [0u8; MAX_PACKET_SIZE];
    let mut last_heartbeat = Instant::now();

    while !channel.is_closed() {
        let Some(client) = client.upgrade() else {
            break;
        };
        if !client.is_running() {
            break;
        }
        client.poll(&mediator, &channel, server, &mut buffer);

        let heartbeat_due = last_heartbeat.elapsed() >= client.config.heartbeat_interval;
        if heartbeat_due && client.is_connected() {
            client.send_heartbeat(&mediator, &channel, server);
            last_heartbeat = Instant::now();
        }
    }

    log::debug!("Client receive loop on {} stopped", channel.local_addr());
}

impl Drop for SocketClientFacade {
    fn drop(&mut self) {
        self.shut_down();
    }
}
