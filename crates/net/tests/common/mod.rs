#![allow(dead_code)]

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use skein::net::{decode, encode};
use skein::{
    BusConfig, ClientConfig, Endpoint, EngineProxy, Message, MessageBus, MessageKind, NetError,
    NetworkMediator, RetryingMessageBus, ServerConfig, Socket, SocketClientFacade,
    SocketServerFacade,
};

/// A reliable send as observed by [`RecordingBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReliableCall {
    pub kind: MessageKind,
    pub endpoint: Endpoint,
    pub ttl_ms: u64,
}

/// Wraps the real bus and records every call made through the trait.
pub struct RecordingBus {
    inner: Arc<RetryingMessageBus>,
    reliable: Mutex<Vec<ReliableCall>>,
    unreliable: Mutex<Vec<(MessageKind, Endpoint)>>,
}

impl RecordingBus {
    pub fn spawn() -> Arc<Self> {
        Arc::new(Self {
            inner: RetryingMessageBus::spawn(BusConfig::default()).unwrap(),
            reliable: Mutex::new(Vec::new()),
            unreliable: Mutex::new(Vec::new()),
        })
    }

    pub fn inner(&self) -> &RetryingMessageBus {
        &self.inner
    }

    pub fn reliable_calls(&self, kind: MessageKind) -> Vec<ReliableCall> {
        self.reliable
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.kind == kind)
            .cloned()
            .collect()
    }

    pub fn unreliable_count(&self, kind: MessageKind) -> usize {
        self.unreliable
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }
}

impl MessageBus for RecordingBus {
    fn send_unreliable_message(
        &self,
        message: &Message,
        socket: &dyn Socket,
        endpoint: Endpoint,
    ) -> Result<usize, NetError> {
        self.unreliable
            .lock()
            .unwrap()
            .push((message.kind(), endpoint));
        self.inner.send_unreliable_message(message, socket, endpoint)
    }

    fn send_reliable_message(
        &self,
        message: Message,
        socket: Arc<dyn Socket>,
        endpoint: Endpoint,
        ttl_ms: u64,
    ) -> Result<(), NetError> {
        self.reliable.lock().unwrap().push(ReliableCall {
            kind: message.kind(),
            endpoint,
            ttl_ms,
        });
        self.inner
            .send_reliable_message(message, socket, endpoint, ttl_ms)
    }

    fn resolve(&self, endpoint: Endpoint, kind: MessageKind) -> bool {
        self.inner.resolve(endpoint, kind)
    }

    fn cancel_endpoint(&self, endpoint: Endpoint) -> usize {
        self.inner.cancel_endpoint(endpoint)
    }

    fn cancel_socket(&self, local_addr: SocketAddr) -> usize {
        self.inner.cancel_socket(local_addr)
    }

    fn effective_ttl(&self, ttl_ms: u64) -> Duration {
        self.inner.effective_ttl(ttl_ms)
    }
}

pub struct TestEngine {
    admit: AtomicBool,
    established: AtomicUsize,
}

impl TestEngine {
    pub fn admitting() -> Arc<Self> {
        Arc::new(Self {
            admit: AtomicBool::new(true),
            established: AtomicUsize::new(0),
        })
    }

    pub fn refusing() -> Arc<Self> {
        let engine = Self::admitting();
        engine.admit.store(false, Ordering::SeqCst);
        engine
    }

    pub fn established(&self) -> usize {
        self.established.load(Ordering::SeqCst)
    }
}

impl EngineProxy for TestEngine {
    fn can_connect_to_challenge(&self) -> bool {
        self.admit.load(Ordering::SeqCst)
    }

    fn networking_established(&self) {
        self.established.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct TestServer {
    pub facade: Arc<SocketServerFacade>,
    pub mediator: Arc<NetworkMediator>,
    pub bus: Arc<RecordingBus>,
    pub engine: Arc<TestEngine>,
}

impl TestServer {
    pub fn start(engine: Arc<TestEngine>, max_connections: usize) -> Self {
        Self::start_with(
            engine,
            ServerConfig {
                port: 0,
                max_connections,
                ..ServerConfig::default()
            },
        )
    }

    pub fn start_with(engine: Arc<TestEngine>, config: ServerConfig) -> Self {
        let bus = RecordingBus::spawn();
        let mediator = NetworkMediator::new(bus.clone(), engine.clone());
        let facade = SocketServerFacade::new();

        facade.start_server_with(config, mediator.clone()).unwrap();

        Self {
            facade,
            mediator,
            bus,
            engine,
        }
    }

    pub fn port(&self) -> u16 {
        self.facade.local_addr().unwrap().port()
    }

    /// Loopback address clients should target.
    pub fn target(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], self.port()))
    }
}

/// A bare UDP peer that speaks the wire format by hand.
pub struct RawPeer {
    socket: UdpSocket,
}

impl RawPeer {
    pub fn bind() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();
        Self { socket }
    }

    pub fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    pub fn send(&self, message: &Message, to: SocketAddr) {
        let payload = encode(message).unwrap();
        self.socket.send_to(&payload, to).unwrap();
    }

    pub fn recv(&self, timeout: Duration) -> Option<Message> {
        let mut buffer = [0u8; 1500];
        let start = Instant::now();
        while start.elapsed() < timeout {
            if let Ok((size, _)) = self.socket.recv_from(&mut buffer) {
                if let Ok(message) = decode(&buffer[..size]) {
                    return Some(message);
                }
            }
        }
        None
    }

    /// Skips messages of other kinds until one of `kind` arrives.
    pub fn recv_kind(&self, kind: MessageKind, timeout: Duration) -> Option<Message> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            match self.recv(timeout.saturating_sub(start.elapsed())) {
                Some(message) if message.kind() == kind => return Some(message),
                Some(_) => continue,
                None => return None,
            }
        }
        None
    }

    /// Everything received until `window` elapses.
    pub fn collect(&self, window: Duration) -> Vec<Message> {
        let mut received = Vec::new();
        let start = Instant::now();
        while start.elapsed() < window {
            if let Some(message) = self.recv(Duration::from_millis(10)) {
                received.push(message);
            }
        }
        received
    }
}

/// A client facade on its own recording bus, connecting to `server`.
pub fn start_client(
    server: &TestServer,
    engine: Arc<TestEngine>,
) -> (Arc<SocketClientFacade>, Arc<RecordingBus>) {
    let bus = RecordingBus::spawn();
    let mediator = NetworkMediator::new(bus.clone(), engine);
    let client = SocketClientFacade::new(ClientConfig::default());

    client
        .start_client("127.0.0.1", server.port(), mediator)
        .unwrap();
    (client, bus)
}

pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}
