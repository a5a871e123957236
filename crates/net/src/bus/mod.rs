//! Reliable and best-effort message delivery.
//!
//! The bus owns every in-flight reliable send. A record is created by
//! [`MessageBus::send_reliable_message`], retransmitted at the configured
//! cadence by the retry thread, and destroyed when the interpreter layer
//! resolves it or when its TTL runs out. Expiry is silent: the caller never
//! hears about abandoned deliveries.
//!
//! Retransmission happens while the record table is locked, so once
//! [`MessageBus::resolve`] returns, no further copy of that record can hit
//! the wire.

mod record;

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::BusConfig;
use crate::error::NetError;
use crate::net::{Endpoint, Message, MessageKind, Socket, encode};
use crate::sync::lock;

pub use record::ReliableSendRecord;

pub trait MessageBus: Send + Sync {
    /// Encodes and transmits once. No tracking, no retry.
    fn send_unreliable_message(
        &self,
        message: &Message,
        socket: &dyn Socket,
        endpoint: Endpoint,
    ) -> Result<usize, NetError>;

    /// Transmits immediately and keeps retransmitting until resolved or until
    /// `ttl_ms` has elapsed since the first send. A TTL of zero selects the
    /// configured default lifetime.
    fn send_reliable_message(
        &self,
        message: Message,
        socket: Arc<dyn Socket>,
        endpoint: Endpoint,
        ttl_ms: u64,
    ) -> Result<(), NetError>;

    /// Marks the outstanding `kind` send to `endpoint` as satisfied. Returns
    /// whether a record was pending.
    fn resolve(&self, endpoint: Endpoint, kind: MessageKind) -> bool;

    /// Drops every pending send to `endpoint`.
    fn cancel_endpoint(&self, endpoint: Endpoint) -> usize;

    /// Drops every pending send that goes out through the socket bound to
    /// `local_addr`.
    fn cancel_socket(&self, local_addr: SocketAddr) -> usize;

    /// The lifetime a reliable send made with `ttl_ms` actually gets.
    fn effective_ttl(&self, ttl_ms: u64) -> Duration;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub transmissions: u64,
    pub retransmissions: u64,
    pub resolved: u64,
    pub expired: u64,
    pub cancelled: u64,
}

#[derive(Debug, Default)]
struct BusCounters {
    transmissions: AtomicU64,
    retransmissions: AtomicU64,
    resolved: AtomicU64,
    expired: AtomicU64,
    cancelled: AtomicU64,
}

impl BusCounters {
    fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn snapshot(&self) -> BusStats {
        BusStats {
            transmissions: self.transmissions.load(Ordering::Relaxed),
            retransmissions: self.retransmissions.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of one pass over the record table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPass {
    pub retransmitted: usize,
    pub expired: usize,
}

type RecordKey = (Endpoint, MessageKind);

pub struct RetryingMessageBus {
    config: BusConfig,
    records: Mutex<HashMap<RecordKey, ReliableSendRecord>>,
    counters: BusCounters,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RetryingMessageBus {
    /// Creates a bus without a retry thread; retries only happen when
    /// [`RetryingMessageBus::process_retries`] is called.
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
            counters: BusCounters::default(),
            running: Arc::new(AtomicBool::new(true)),
            worker: Mutex::new(None),
        }
    }

    /// Creates a bus and starts its retry thread.
    pub fn spawn(config: BusConfig) -> io::Result<Arc<Self>> {
        let bus = Arc::new(Self::new(config));
        let weak = Arc::downgrade(&bus);
        let running = Arc::clone(&bus.running);
        let tick = bus.config.retry_tick;

        let handle = thread::Builder::new()
            .name("skein-retry".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    thread::sleep(tick);
                    let Some(bus) = weak.upgrade() else {
                        break;
                    };
                    bus.process_retries(Instant::now());
                }
            })?;

        *lock(&bus.worker) = Some(handle);
        Ok(bus)
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Retransmits every due record and drops every expired one.
    pub fn process_retries(&self, now: Instant) -> RetryPass {
        let interval = self.config.repeat_interval;
        let mut pass = RetryPass::default();
        let mut records = lock(&self.records);

        records.retain(|(endpoint, kind), record| {
            if record.is_expired(now) {
                log::debug!(
                    "Abandoning {} to {} after {} attempts over {:?}",
                    kind.as_str(),
                    endpoint,
                    record.attempts(),
                    record.ttl()
                );
                pass.expired += 1;
                return false;
            }

            if record.is_due(now, interval) {
                transmit(record.socket().as_ref(), *endpoint, record.payload());
                record.mark_sent(now);
                log::trace!(
                    "Retransmitted {} to {} (attempt {})",
                    kind.as_str(),
                    endpoint,
                    record.attempts()
                );
                pass.retransmitted += 1;
            }

            true
        });

        BusCounters::add(&self.counters.retransmissions, pass.retransmitted as u64);
        BusCounters::add(&self.counters.transmissions, pass.retransmitted as u64);
        BusCounters::add(&self.counters.expired, pass.expired as u64);
        pass
    }

    pub fn is_pending(&self, endpoint: Endpoint, kind: MessageKind) -> bool {
        lock(&self.records).contains_key(&(endpoint, kind))
    }

    pub fn attempts(&self, endpoint: Endpoint, kind: MessageKind) -> Option<u32> {
        lock(&self.records)
            .get(&(endpoint, kind))
            .map(ReliableSendRecord::attempts)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn stats(&self) -> BusStats {
        self.counters.snapshot()
    }

    /// Stops the retry thread. Pending records stay in place.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = lock(&self.worker).take() {
            // The worker may hold the last strong reference and end up
            // dropping the bus on its own thread.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for RetryingMessageBus {
    fn drop(&mut self) {
        self.stop();
    }
}

impl MessageBus for RetryingMessageBus {
    fn send_unreliable_message(
        &self,
        message: &Message,
        socket: &dyn Socket,
        endpoint: Endpoint,
    ) -> Result<usize, NetError> {
        let payload = encode(message)?;
        let bytes = socket.send(endpoint, &payload)?;
        BusCounters::add(&self.counters.transmissions, 1);
        Ok(bytes)
    }

    fn send_reliable_message(
        &self,
        message: Message,
        socket: Arc<dyn Socket>,
        endpoint: Endpoint,
        ttl_ms: u64,
    ) -> Result<(), NetError> {
        let payload = encode(&message)?;
        let key = (endpoint, message.kind());
        let ttl = self.config.effective_ttl(ttl_ms);
        let now = Instant::now();

        let mut records = lock(&self.records);
        transmit(socket.as_ref(), endpoint, &payload);
        BusCounters::add(&self.counters.transmissions, 1);

        match records.get_mut(&key) {
            Some(existing) if existing.payload() == payload.as_slice() => {
                existing.mark_sent(now);
            }
            _ => {
                log::trace!(
                    "Tracking {} to {} for {:?}",
                    key.1.as_str(),
                    endpoint,
                    ttl
                );
                records.insert(
                    key,
                    ReliableSendRecord::new(payload, socket, ttl, now),
                );
            }
        }

        Ok(())
    }

    fn resolve(&self, endpoint: Endpoint, kind: MessageKind) -> bool {
        let resolved = lock(&self.records).remove(&(endpoint, kind)).is_some();
        if resolved {
            BusCounters::add(&self.counters.resolved, 1);
        }
        resolved
    }

    fn cancel_endpoint(&self, endpoint: Endpoint) -> usize {
        let mut records = lock(&self.records);
        let before = records.len();
        records.retain(|(target, _), _| *target != endpoint);
        let cancelled = before - records.len();

        BusCounters::add(&self.counters.cancelled, cancelled as u64);
        cancelled
    }

    fn cancel_socket(&self, local_addr: SocketAddr) -> usize {
        let mut records = lock(&self.records);
        let before = records.len();
        records.retain(|_, record| record.socket().local_addr() != local_addr);
        let cancelled = before - records.len();

        BusCounters::add(&self.counters.cancelled, cancelled as u64);
        cancelled
    }

    fn effective_ttl(&self, ttl_ms: u64) -> Duration {
        self.config.effective_ttl(ttl_ms)
    }
}

fn transmit(socket: &dyn Socket, endpoint: Endpoint, payload: &[u8]) {
    if let Err(e) = socket.send(endpoint, payload) {
        log::warn!("Send to {} failed: {}", endpoint, e);
    }
}
