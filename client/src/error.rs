use shared::CodecError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    /// Socket creation, address resolution or OS-level connect failed.
    #[error("failed to connect to {address}: {source}")]
    Transport {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("tried to send a packet while disconnected")]
    NotConnected,

    #[error("failed to decode packet: {0}")]
    Codec(#[from] CodecError),

    #[error("socket I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("unknown server: {0}")]
    UnknownServer(String),

    #[error("failed to create the probe socket: {0}")]
    ProbeSocket(#[source] io::Error),
}

pub type NetworkResult<T> = Result<T, NetworkError>;
