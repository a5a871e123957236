use std::time::Duration;

use crate::net::DEFAULT_PORT;

/// How long the server keeps retrying a challenge before giving up on the
/// connection attempt.
pub const DEFAULT_CHALLENGE_TTL_MS: u64 = 250;
pub const DEFAULT_REPEAT_INTERVAL_MS: u64 = 50;
/// Upper bound for reliable sends made with a TTL of zero.
pub const DEFAULT_MAX_MESSAGE_REPEAT_MS: u64 = 2000;
pub const DEFAULT_MAX_CONNECTIONS: usize = 32;
/// How long a verified session may stay silent before the server drops it.
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Cadence at which unresolved reliable sends are retransmitted.
    pub repeat_interval: Duration,
    /// Lifetime given to reliable sends whose caller passed a TTL of zero.
    pub max_message_repeat: Duration,
    /// Sleep between passes of the retry thread.
    pub retry_tick: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            repeat_interval: Duration::from_millis(DEFAULT_REPEAT_INTERVAL_MS),
            max_message_repeat: Duration::from_millis(DEFAULT_MAX_MESSAGE_REPEAT_MS),
            retry_tick: Duration::from_millis(5),
        }
    }
}

impl BusConfig {
    /// Maps a caller-supplied TTL to a concrete lifetime; zero selects the
    /// configured default rather than a single send.
    pub fn effective_ttl(&self, ttl_ms: u64) -> Duration {
        if ttl_ms == 0 {
            self.max_message_repeat
        } else {
            Duration::from_millis(ttl_ms)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub max_connections: usize,
    /// Zero defers to the message bus default, for both the retries and the
    /// window in which a response is accepted.
    pub challenge_ttl_ms: u64,
    pub session_timeout: Duration,
    /// Read timeout of the receive thread; bounds shutdown latency.
    pub poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            challenge_ttl_ms: DEFAULT_CHALLENGE_TTL_MS,
            session_timeout: Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(20),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// TTL for the initial connect request; zero defers to the bus default.
    pub request_ttl_ms: u64,
    /// TTL for the challenge response; zero defers to the bus default.
    pub response_ttl_ms: u64,
    /// Cadence of unreliable heartbeats once connected.
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_ttl_ms: 0,
            response_ttl_ms: 0,
            heartbeat_interval: Duration::from_secs(1),
            poll_interval: Duration::from_millis(20),
        }
    }
}
