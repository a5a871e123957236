use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::net::Socket;

/// One in-flight reliable message, stored already encoded. Retries mutate the
/// record in place.
pub struct ReliableSendRecord {
    payload: Vec<u8>,
    socket: Arc<dyn Socket>,
    ttl: Duration,
    first_sent: Instant,
    last_sent: Instant,
    attempts: u32,
}

impl ReliableSendRecord {
    pub fn new(payload: Vec<u8>, socket: Arc<dyn Socket>, ttl: Duration, now: Instant) -> Self {
        Self {
            payload,
            socket,
            ttl,
            first_sent: now,
            last_sent: now,
            attempts: 1,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.first_sent) > self.ttl
    }

    pub fn is_due(&self, now: Instant, repeat_interval: Duration) -> bool {
        now.saturating_duration_since(self.last_sent) >= repeat_interval
    }

    pub fn mark_sent(&mut self, now: Instant) {
        self.last_sent = now;
        self.attempts = self.attempts.saturating_add(1);
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn socket(&self) -> &Arc<dyn Socket> {
        &self.socket
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::net::SocketAddr;

    struct NullSocket;

    impl Socket for NullSocket {
        fn send(&self, _endpoint: SocketAddr, buffer: &[u8]) -> io::Result<usize> {
            Ok(buffer.len())
        }

        fn local_addr(&self) -> SocketAddr {
            SocketAddr::from(([127, 0, 0, 1], 9))
        }
    }

    fn record(ttl_ms: u64, now: Instant) -> ReliableSendRecord {
        ReliableSendRecord::new(
            vec![1, 2, 3],
            Arc::new(NullSocket),
            Duration::from_millis(ttl_ms),
            now,
        )
    }

    #[test]
    fn test_record_expiration() {
        let start = Instant::now();
        let record = record(250, start);

        assert!(!record.is_expired(start + Duration::from_millis(250)));
        assert!(record.is_expired(start + Duration::from_millis(251)));
    }

    #[test]
    fn test_retry_is_due_after_interval() {
        let start = Instant::now();
        let mut record = record(1000, start);
        let interval = Duration::from_millis(50);

        assert!(!record.is_due(start + Duration::from_millis(49), interval));
        assert!(record.is_due(start + Duration::from_millis(50), interval));

        record.mark_sent(start + Duration::from_millis(50));
        assert_eq!(record.attempts(), 2);
        assert!(!record.is_due(start + Duration::from_millis(60), interval));
    }

    #[test]
    fn test_retries_do_not_extend_lifetime() {
        let start = Instant::now();
        let mut record = record(100, start);

        record.mark_sent(start + Duration::from_millis(90));

        assert!(record.is_expired(start + Duration::from_millis(101)));
    }
}
