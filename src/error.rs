use std::io;

/// Errors surfaced across the connection boundary.
///
/// Packet-level faults (malformed header, bad checksum, duplicate ACK,
/// stray SYN) never reach here — the engine absorbs them locally. Only
/// caller-contract violations and exhausted-retry conditions are surfaced.
#[derive(Debug, thiserror::Error)]
pub enum RdtError {
    #[error("connection lost: no progress after {0} consecutive timeouts")]
    ConnectionLost(u32),

    #[error("send() of {chunks} chunks exceeds the {limit} chunk window capacity")]
    CapacityExceeded { chunks: usize, limit: usize },

    #[error("operation requires an established connection")]
    NotConnected,

    #[error("socket is already connected")]
    AlreadyConnected,

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, RdtError>;
