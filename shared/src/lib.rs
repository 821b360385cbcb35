use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Stable integer discriminant carried in front of every frame.
pub type PacketId = u16;

pub const PROTOCOL_VERSION: u16 = 1;
pub const MAX_PACKET_SIZE: usize = 65536;
pub const HEADER_SIZE: usize = 2;
pub const KEY_SIZE: usize = 32;

pub type SessionKey = [u8; KEY_SIZE];

// Client -> server
pub const PING: PacketId = 10000;
pub const CRYPTO_HANDSHAKE_START: PacketId = 10001;
pub const KEEPALIVE: PacketId = 10002;
pub const DISCONNECT: PacketId = 10003;

// Server -> client
pub const PING_RESPONSE: PacketId = 20000;
pub const CRYPTO_HANDSHAKE_RESPONSE: PacketId = 20001;
pub const KEEPALIVE_RESPONSE: PacketId = 20002;
pub const SERVER_DISCONNECT: PacketId = 20003;

/// Ids the protocol reserves for itself. `Packet::Custom` must not use them.
pub const RESERVED_IDS: [PacketId; 8] = [
    PING,
    CRYPTO_HANDSHAKE_START,
    KEEPALIVE,
    DISCONNECT,
    PING_RESPONSE,
    CRYPTO_HANDSHAKE_RESPONSE,
    KEEPALIVE_RESPONSE,
    SERVER_DISCONNECT,
];

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Packet {
    Ping {
        id: u32,
    },
    CryptoHandshakeStart {
        protocol: u16,
        key: SessionKey,
    },
    KeepAlive,
    Disconnect,

    PingResponse {
        id: u32,
        player_count: u32,
    },
    CryptoHandshakeResponse {
        key: SessionKey,
    },
    KeepAliveResponse {
        player_count: u32,
    },
    ServerDisconnect {
        message: String,
    },

    /// Application-level packet defined by higher layers.
    Custom {
        id: PacketId,
        payload: Vec<u8>,
    },
}

impl Packet {
    pub fn id(&self) -> PacketId {
        match self {
            Packet::Ping { .. } => PING,
            Packet::CryptoHandshakeStart { .. } => CRYPTO_HANDSHAKE_START,
            Packet::KeepAlive => KEEPALIVE,
            Packet::Disconnect => DISCONNECT,
            Packet::PingResponse { .. } => PING_RESPONSE,
            Packet::CryptoHandshakeResponse { .. } => CRYPTO_HANDSHAKE_RESPONSE,
            Packet::KeepAliveResponse { .. } => KEEPALIVE_RESPONSE,
            Packet::ServerDisconnect { .. } => SERVER_DISCONNECT,
            Packet::Custom { id, .. } => *id,
        }
    }

    /// Whether this packet is handled by the session layer itself rather than
    /// by application listeners.
    pub fn is_reserved(&self) -> bool {
        is_reserved_id(self.id())
    }
}

pub fn is_reserved_id(id: PacketId) -> bool {
    RESERVED_IDS.contains(&id)
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame of {0} bytes is shorter than the packet header")]
    TooShort(usize),

    #[error("frame of {0} bytes exceeds the maximum packet size")]
    TooLarge(usize),

    #[error("malformed packet body: {0}")]
    Malformed(#[from] bincode::Error),

    #[error("header id {header} does not match body id {body}")]
    IdMismatch { header: PacketId, body: PacketId },

    #[error("custom packet uses reserved id {0}")]
    ReservedId(PacketId),
}

/// Frames a packet: big-endian id header followed by the bincode body.
pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>, CodecError> {
    if let Packet::Custom { id, .. } = packet {
        if is_reserved_id(*id) {
            return Err(CodecError::ReservedId(*id));
        }
    }

    let body = bincode::serialize(packet)?;
    let len = HEADER_SIZE + body.len();
    if len > MAX_PACKET_SIZE {
        return Err(CodecError::TooLarge(len));
    }

    let mut frame = Vec::with_capacity(len);
    frame.extend_from_slice(&packet.id().to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub fn decode_packet(frame: &[u8]) -> Result<Packet, CodecError> {
    if frame.len() < HEADER_SIZE {
        return Err(CodecError::TooShort(frame.len()));
    }
    if frame.len() > MAX_PACKET_SIZE {
        return Err(CodecError::TooLarge(frame.len()));
    }

    let header = PacketId::from_be_bytes([frame[0], frame[1]]);
    let packet: Packet = bincode::deserialize(&frame[HEADER_SIZE..])?;

    let body = packet.id();
    if header != body {
        return Err(CodecError::IdMismatch { header, body });
    }
    if matches!(packet, Packet::Custom { .. }) && is_reserved_id(body) {
        return Err(CodecError::ReservedId(body));
    }

    Ok(packet)
}

/// Host and port of a game server, as listed in the server roster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerAddress {
    pub ip: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ip.contains(':') {
            write!(f, "[{}]:{}", self.ip, self.port)
        } else {
            write!(f, "{}:{}", self.ip, self.port)
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressParseError {
    #[error("missing port in address {0:?}")]
    MissingPort(String),

    #[error("invalid port in address {0:?}")]
    InvalidPort(String),

    #[error("missing host in address {0:?}")]
    MissingHost(String),
}

impl FromStr for ServerAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressParseError::MissingPort(s.to_string()))?;

        let port = port
            .parse::<u16>()
            .map_err(|_| AddressParseError::InvalidPort(s.to_string()))?;

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(AddressParseError::MissingHost(s.to_string()));
        }

        Ok(ServerAddress::new(host, port))
    }
}
