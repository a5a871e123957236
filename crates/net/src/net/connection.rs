use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::config::DEFAULT_SESSION_TIMEOUT_SECS;

use super::message::Challenge;

pub type SessionId = u32;

/// Client-side view of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    ChallengeResponse,
    Connected,
}

#[derive(Debug, Clone)]
enum Attempt {
    ChallengeIssued {
        challenge: Challenge,
        issued_at: Instant,
    },
    Verified {
        challenge: Challenge,
        session_id: SessionId,
    },
}

#[derive(Debug, Clone)]
pub struct Session {
    pub addr: SocketAddr,
    pub session_id: SessionId,
    pub verified_at: Instant,
    pub last_receive_time: Instant,
}

impl Session {
    fn new(addr: SocketAddr, session_id: SessionId, now: Instant) -> Self {
        Self {
            addr,
            session_id,
            verified_at: now,
            last_receive_time: now,
        }
    }

    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_receive_time) > timeout
    }

    pub fn connected_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.verified_at)
    }
}

/// Why a connection attempt never got a challenge or a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    ServerFull,
    AlreadyRecognized,
}

/// Server-side bookkeeping of connection attempts and verified sessions,
/// keyed by remote endpoint.
///
/// An attempt is live while its challenge is younger than the challenge TTL;
/// after that the endpoint is treated as unknown again and a later datagram
/// starts a new attempt with a fresh challenge.
#[derive(Debug)]
pub struct SessionTable {
    attempts: HashMap<SocketAddr, Attempt>,
    sessions: HashMap<SessionId, Session>,
    next_session_id: SessionId,
    max_sessions: usize,
    challenge_ttl: Duration,
    session_timeout: Duration,
}

impl SessionTable {
    pub fn new(max_sessions: usize, challenge_ttl: Duration) -> Self {
        Self::with_timeout(
            max_sessions,
            challenge_ttl,
            Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS),
        )
    }

    pub fn with_timeout(
        max_sessions: usize,
        challenge_ttl: Duration,
        session_timeout: Duration,
    ) -> Self {
        Self {
            attempts: HashMap::new(),
            sessions: HashMap::new(),
            next_session_id: 1,
            max_sessions,
            challenge_ttl,
            session_timeout,
        }
    }

    pub fn is_recognized(&self, addr: &SocketAddr, now: Instant) -> bool {
        match self.attempts.get(addr) {
            Some(Attempt::ChallengeIssued { issued_at, .. }) => {
                now.saturating_duration_since(*issued_at) <= self.challenge_ttl
            }
            Some(Attempt::Verified { .. }) => true,
            None => false,
        }
    }

    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.max_sessions
    }

    /// Records a freshly issued challenge for `addr`, replacing an abandoned
    /// attempt if there was one.
    pub fn issue_challenge(
        &mut self,
        addr: SocketAddr,
        challenge: Challenge,
        now: Instant,
    ) -> Result<(), Refusal> {
        if self.is_recognized(&addr, now) {
            return Err(Refusal::AlreadyRecognized);
        }
        if self.is_full() {
            return Err(Refusal::ServerFull);
        }

        self.attempts.insert(
            addr,
            Attempt::ChallengeIssued {
                challenge,
                issued_at: now,
            },
        );
        Ok(())
    }

    /// The challenge a response from `addr` must answer, if the attempt is
    /// still live or already verified.
    pub fn issued_challenge(&self, addr: &SocketAddr, now: Instant) -> Option<Challenge> {
        if !self.is_recognized(addr, now) {
            return None;
        }
        match self.attempts.get(addr)? {
            Attempt::ChallengeIssued { challenge, .. } | Attempt::Verified { challenge, .. } => {
                Some(challenge.clone())
            }
        }
    }

    /// Promotes a pending attempt to a session. Returns `None` when `addr`
    /// is already verified, has no live attempt, or the table is full, so a
    /// second call for the same endpoint never creates a second session.
    pub fn create_session(&mut self, addr: SocketAddr, now: Instant) -> Option<SessionId> {
        if self.is_full() || !self.is_recognized(&addr, now) {
            return None;
        }

        let challenge = match self.attempts.get(&addr)? {
            Attempt::ChallengeIssued { challenge, .. } => challenge.clone(),
            Attempt::Verified { .. } => return None,
        };

        let session_id = self.next_session_id;
        self.next_session_id = self.next_session_id.wrapping_add(1).max(1);

        self.sessions.insert(session_id, Session::new(addr, session_id, now));
        self.attempts.insert(
            addr,
            Attempt::Verified {
                challenge,
                session_id,
            },
        );

        Some(session_id)
    }

    pub fn session_id(&self, addr: &SocketAddr) -> Option<SessionId> {
        match self.attempts.get(addr)? {
            Attempt::Verified { session_id, .. } => Some(*session_id),
            Attempt::ChallengeIssued { .. } => None,
        }
    }

    pub fn get(&self, session_id: SessionId) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    pub fn touch(&mut self, addr: &SocketAddr, now: Instant) {
        if let Some(id) = self.session_id(addr) {
            if let Some(session) = self.sessions.get_mut(&id) {
                session.last_receive_time = now;
            }
        }
    }

    pub fn remove_by_addr(&mut self, addr: &SocketAddr) -> Option<Session> {
        match self.attempts.remove(addr)? {
            Attempt::Verified { session_id, .. } => self.sessions.remove(&session_id),
            Attempt::ChallengeIssued { .. } => None,
        }
    }

    /// Forgets attempts whose challenge outlived its TTL without a valid
    /// response and returns their endpoints.
    pub fn prune_abandoned(&mut self, now: Instant) -> Vec<SocketAddr> {
        let ttl = self.challenge_ttl;
        let abandoned: Vec<SocketAddr> = self
            .attempts
            .iter()
            .filter_map(|(addr, attempt)| match attempt {
                Attempt::ChallengeIssued { issued_at, .. }
                    if now.saturating_duration_since(*issued_at) > ttl =>
                {
                    Some(*addr)
                }
                _ => None,
            })
            .collect();

        for addr in &abandoned {
            self.attempts.remove(addr);
        }

        abandoned
    }

    /// Removes sessions that have been silent for longer than the session
    /// timeout and returns them.
    pub fn prune_timed_out(&mut self, now: Instant) -> Vec<Session> {
        let timeout = self.session_timeout;
        let timed_out: Vec<SocketAddr> = self
            .sessions
            .values()
            .filter(|session| session.is_timed_out(now, timeout))
            .map(|session| session.addr)
            .collect();

        timed_out
            .iter()
            .filter_map(|addr| self.remove_by_addr(addr))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn pending_count(&self) -> usize {
        self.attempts.len() - self.sessions.len()
    }

    pub fn clear(&mut self) -> Vec<Session> {
        self.attempts.clear();
        self.sessions.drain().map(|(_, session)| session).collect()
    }
}
