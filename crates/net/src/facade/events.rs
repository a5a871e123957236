use std::net::SocketAddr;

use crate::net::SessionId;

/// Connection lifecycle notifications queued by the server facade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ChallengeIssued {
        addr: SocketAddr,
    },
    ClientConnected {
        session_id: SessionId,
        addr: SocketAddr,
    },
    /// A verified client could not be given a session slot.
    ConnectionDenied {
        addr: SocketAddr,
    },
    ChallengeAbandoned {
        addr: SocketAddr,
    },
    ClientDisconnected {
        session_id: SessionId,
        addr: SocketAddr,
        reason: DisconnectReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Shutdown => "dropped by shutdown",
        }
    }
}
