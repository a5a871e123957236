mod connection;
mod message;
mod protocol;
mod socket;
mod stats;

pub use connection::{ConnectionState, Refusal, Session, SessionId, SessionTable};
pub use message::{Challenge, ChallengeResponse, Message, MessageKind, NONCE_LEN};
pub use protocol::{
    CodecError, DEFAULT_PORT, MAX_PACKET_SIZE, PROTOCOL_MAGIC, PROTOCOL_VERSION, Packet,
    PacketHeader, decode, encode,
};
pub use socket::{Endpoint, Socket, UdpChannel, resolve};
pub use stats::{NetworkStats, StatsCounters};
