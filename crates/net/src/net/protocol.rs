use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize, rancor};

use super::message::Message;

pub const MAX_PACKET_SIZE: usize = 1200;
pub const PROTOCOL_VERSION: u32 = 1;
pub const PROTOCOL_MAGIC: u32 = 0x534B_4E31;
pub const DEFAULT_PORT: u16 = 15937;

const MIN_PACKET_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct PacketHeader {
    pub magic: u32,
    pub version: u32,
}

impl Default for PacketHeader {
    fn default() -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
        }
    }
}

impl PacketHeader {
    pub fn is_valid(&self) -> bool {
        self.magic == PROTOCOL_MAGIC && self.version == PROTOCOL_VERSION
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Message,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
    #[error("datagram of {0} bytes is too short to hold a packet")]
    Truncated(usize),
    #[error("encoded packet of {0} bytes exceeds the MTU")]
    TooLarge(usize),
    #[error("packet header has wrong magic or version")]
    InvalidHeader,
}

impl Packet {
    pub fn new(payload: Message) -> Self {
        Self {
            header: PacketHeader::default(),
            payload,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, CodecError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(CodecError::Serialize)
    }

    /// Datagrams land in arbitrary buffers, so the bytes are copied into an
    /// aligned scratch vector before validation.
    pub fn deserialize(data: &[u8]) -> Result<Self, CodecError> {
        let mut aligned: AlignedVec = AlignedVec::with_capacity(data.len());
        aligned.extend_from_slice(data);
        rkyv::from_bytes::<Self, rancor::Error>(&aligned).map_err(CodecError::Deserialize)
    }
}

/// Frames a message for the wire.
pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    let data = Packet::new(message.clone()).serialize()?;
    if data.len() > MAX_PACKET_SIZE {
        return Err(CodecError::TooLarge(data.len()));
    }
    Ok(data)
}

/// Parses a datagram back into a message. The message kind is recovered from
/// the bytes alone.
pub fn decode(data: &[u8]) -> Result<Message, CodecError> {
    if data.len() < MIN_PACKET_SIZE {
        return Err(CodecError::Truncated(data.len()));
    }

    let packet = Packet::deserialize(data)?;
    if !packet.header.is_valid() {
        return Err(CodecError::InvalidHeader);
    }

    Ok(packet.payload)
}
