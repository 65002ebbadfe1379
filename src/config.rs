use std::time::Duration;

/// Header size in octets: seq, ack, flags, checksum.
pub const HEADER_SIZE: usize = 4;

/// Maximum application payload carried by a single packet.
pub const BUFFER_SIZE: usize = 4096;

/// Sequence space size. All sequence-number arithmetic wraps at this modulus.
pub const SEQ_SPACE: u16 = 256;

/// Upper bound on chunks accepted by a single `send()` call, for both
/// variants: GBN needs W <= 128, SR needs 2*W <= 256, and either way a
/// batch of >=128 chunks can't be fully in flight without wrapping onto
/// itself in the 256-slot buffers.
pub const MAX_CHUNKS_PER_SEND: usize = 128;

/// Tunable knobs, overridable per-socket so tests can run with a tight
/// timeout and a high loss rate without touching the crate-wide defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RdtConfig {
    /// Handshake retry timeout, GBN main-loop timeout, SR per-packet
    /// retransmit threshold.
    pub timeout: Duration,
    /// SR receive poll granularity between timer-set scans.
    pub basic_timeout: Duration,
    /// Initial (GBN: fixed) window size, in packets.
    pub window_size: u8,
    /// Probability in [0, 1] that the loss injector silently drops an
    /// outbound packet.
    pub loss_rate: f64,
    /// Consecutive timeouts with no progress before the connection is
    /// declared lost.
    pub max_timeout: u32,
}

impl RdtConfig {
    pub fn gbn_default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            basic_timeout: Duration::from_millis(500),
            window_size: 3,
            loss_rate: 0.1,
            max_timeout: 10,
        }
    }

    pub fn sr_default() -> Self {
        Self {
            loss_rate: 0.2,
            ..Self::gbn_default()
        }
    }
}

impl Default for RdtConfig {
    fn default() -> Self {
        Self::gbn_default()
    }
}
