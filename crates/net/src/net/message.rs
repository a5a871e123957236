use rand::RngCore;
use rkyv::{Archive, Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const NONCE_LEN: usize = 32;

const ANSWER_DOMAIN: &[u8] = b"skein-challenge-v1";

/// Stable tag for each message variant. Reliable sends are tracked per
/// `(endpoint, MessageKind)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ConnectRequest,
    Challenge,
    ChallengeResponse,
    ConnectionAccepted,
    Heartbeat,
    Disconnect,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::ConnectRequest => "connect-request",
            MessageKind::Challenge => "challenge",
            MessageKind::ChallengeResponse => "challenge-response",
            MessageKind::ConnectionAccepted => "connection-accepted",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::Disconnect => "disconnect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum Message {
    ConnectRequest,
    Challenge(Challenge),
    ChallengeResponse(ChallengeResponse),
    ConnectionAccepted { session_id: u32 },
    /// Keeps a verified session from timing out.
    Heartbeat,
    Disconnect,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::ConnectRequest => MessageKind::ConnectRequest,
            Message::Challenge(_) => MessageKind::Challenge,
            Message::ChallengeResponse(_) => MessageKind::ChallengeResponse,
            Message::ConnectionAccepted { .. } => MessageKind::ConnectionAccepted,
            Message::Heartbeat => MessageKind::Heartbeat,
            Message::Disconnect => MessageKind::Disconnect,
        }
    }
}

/// Server-issued proof-of-reachability puzzle. The nonce is drawn from the
/// OS-seeded thread RNG for every connection attempt and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Challenge {
    nonce: Vec<u8>,
}

impl Challenge {
    pub fn generate() -> Self {
        let mut nonce = vec![0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);
        Self { nonce }
    }

    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ChallengeResponse {
    nonce: Vec<u8>,
    answer: Vec<u8>,
}

impl ChallengeResponse {
    /// Computes the answer a well-behaved peer sends back for `challenge`.
    pub fn answer(challenge: &Challenge) -> Self {
        Self {
            nonce: challenge.nonce.clone(),
            answer: derive_answer(&challenge.nonce),
        }
    }

    /// Builds a response from raw parts, as received from an arbitrary peer.
    pub fn from_parts(nonce: Vec<u8>, answer: Vec<u8>) -> Self {
        Self { nonce, answer }
    }

    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    pub fn answer_bytes(&self) -> &[u8] {
        &self.answer
    }

    /// Checks this response against the challenge the validator issued.
    ///
    /// Only the validator's own copy of the challenge and the bytes the peer
    /// sent are consulted; the nonce echoed by the peer must match the issued
    /// one before the answer is even considered.
    pub fn validate_response(&self, issued: &Challenge) -> bool {
        let nonce_matches = constant_time_eq(&self.nonce, &issued.nonce);
        let answer_matches = constant_time_eq(&self.answer, &derive_answer(&issued.nonce));
        nonce_matches & answer_matches
    }
}

fn derive_answer(nonce: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(ANSWER_DOMAIN);
    hasher.update(nonce);
    hasher.finalize().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
