//! Connection handshake and reliable message delivery over UDP.
//!
//! A [`NetworkMediator`] ties together the [`MessageBus`] that retransmits
//! reliable messages, the [`EngineProxy`] supplied by the hosting
//! application and whichever socket facade is currently running. Received
//! datagrams are decoded into [`Message`]s and dispatched to the
//! interpreters in [`interpret`].

pub mod bus;
pub mod config;
pub mod error;
pub mod facade;
pub mod interpret;
pub mod mediator;
pub mod net;

mod sync;

pub use bus::{BusStats, MessageBus, ReliableSendRecord, RetryPass, RetryingMessageBus};
pub use config::{
    BusConfig, ClientConfig, DEFAULT_CHALLENGE_TTL_MS, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_MAX_MESSAGE_REPEAT_MS, DEFAULT_REPEAT_INTERVAL_MS, DEFAULT_SESSION_TIMEOUT_SECS,
    ServerConfig,
};
pub use error::NetError;
pub use facade::{DisconnectReason, ServerEvent, SocketClientFacade, SocketServerFacade};
pub use mediator::{EngineProxy, NetworkMediator, OpenAdmission, SocketFacade};
pub use net::{
    Challenge, ChallengeResponse, CodecError, ConnectionState, DEFAULT_PORT, Endpoint,
    MAX_PACKET_SIZE, Message, MessageKind, NetworkStats, SessionId, Socket, UdpChannel,
};
