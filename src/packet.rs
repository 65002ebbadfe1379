//! Wire format: a 4-octet header followed by 0..BUFFER_SIZE payload octets.
//!
//! ```text
//! offset 0: seq      (u8)
//! offset 1: ack      (u8)
//! offset 2: flags    (u8)   bit0=SYN, bit1=FIN, bit2=ACK
//! offset 3: checksum (u8)
//! offset 4..: payload
//! ```
//!
//! There are no multi-byte integers in the header, so endianness doesn't
//! enter into it.

use crate::config::HEADER_SIZE;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        const SYN = 0b001;
        const FIN = 0b010;
        const ACK = 0b100;
    }
}

/// A single datagram's worth of protocol state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: u8,
    pub ack: u8,
    pub flags: Flags,
    pub checksum: u8,
    pub payload: Vec<u8>,
}

/// Result of decoding an inbound datagram that was at least long enough to
/// contain a header. Checksum validity is reported but not acted on here —
/// the engine decides drop-vs-accept policy, per spec.
#[derive(Debug)]
pub struct Invalid;

impl Packet {
    pub fn new(seq: u8, ack: u8, flags: Flags, payload: Vec<u8>) -> Self {
        let checksum = Self::compute_checksum(&payload);
        Packet { seq, ack, flags, checksum, payload }
    }

    pub fn syn(seq: u8, ack: u8) -> Self {
        Self::new(seq, ack, Flags::SYN, Vec::new())
    }

    pub fn syn_ack(seq: u8, ack: u8) -> Self {
        Self::new(seq, ack, Flags::SYN | Flags::ACK, Vec::new())
    }

    pub fn fin(seq: u8, ack: u8) -> Self {
        Self::new(seq, ack, Flags::FIN, Vec::new())
    }

    pub fn fin_ack(seq: u8, ack: u8) -> Self {
        Self::new(seq, ack, Flags::FIN | Flags::ACK, Vec::new())
    }

    pub fn ack(seq: u8, ack: u8) -> Self {
        Self::new(seq, ack, Flags::ACK, Vec::new())
    }

    pub fn data(seq: u8, ack: u8, payload: Vec<u8>) -> Self {
        Self::new(seq, ack, Flags::empty(), payload)
    }

    /// Weak, legacy-shaped 8-bit checksum over the payload only — the
    /// header is not covered. Byte-sum mod 256, wrapping on overflow.
    /// Deliberately not a real integrity check (see design notes); an
    /// implementation is free to swap this for something stronger as long
    /// as both peers agree, which holds trivially here since both ends run
    /// the same code.
    pub fn compute_checksum(payload: &[u8]) -> u8 {
        payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
    }

    pub fn checksum_valid(&self) -> bool {
        self.checksum == Self::compute_checksum(&self.payload)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        out.push(self.seq);
        out.push(self.ack);
        out.push(self.flags.bits());
        out.push(self.checksum);
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Packet, Invalid> {
        if bytes.len() < HEADER_SIZE {
            return Err(Invalid);
        }
        let flags = Flags::from_bits_truncate(bytes[2]);
        Ok(Packet {
            seq: bytes[0],
            ack: bytes[1],
            flags,
            checksum: bytes[3],
            payload: bytes[HEADER_SIZE..].to_vec(),
        })
    }

    /// SYN and FIN must never both be set; decode succeeds regardless (the
    /// wire format can't reject it), but the engine treats such a packet as
    /// a protocol violation and drops it.
    pub fn is_protocol_violation(&self) -> bool {
        self.flags.contains(Flags::SYN) && self.flags.contains(Flags::FIN)
    }
}

/// `(x - base) mod 256 < width`, the one true circular-window membership
/// test. Every piece of sequence-number comparison logic in this crate
/// reduces to this — see the design notes on why the legacy tolerance-band
/// heuristic is not used here.
pub fn inside_window(x: u8, base: u8, width: u16) -> bool {
    let delta = (x.wrapping_sub(base)) as u16;
    delta < width
}

/// Circular distance `(a - b) mod 256`, as a u16 so 256 itself is
/// representable for callers that need to distinguish "full wrap" from
/// "zero distance".
pub fn circular_distance(a: u8, b: u8) -> u16 {
    (a.wrapping_sub(b)) as u16
}

/// `ack_num in (base, next]` circularly — the one legitimate forward
/// cumulative-ACK advance. Per the design notes, this replaces the
/// legacy `(256 + ack - base) % 256 < 10` tolerance band entirely rather
/// than falling back to it for reordering outside the window.
pub fn ack_in_range(ack_num: u8, base: u8, next: u8) -> bool {
    if base == next {
        return false;
    }
    let delta = circular_distance(ack_num, base);
    let span = circular_distance(next, base);
    delta > 0 && delta <= span
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip_is_a_bijection() {
        let p = Packet::data(7, 200, b"hello".to_vec());
        let bytes = p.encode();
        let decoded = Packet::decode(&bytes).expect("valid packet");
        assert_eq!(decoded, p);
    }

    #[test]
    fn empty_payload_roundtrips() {
        let p = Packet::syn(5, 0);
        let bytes = p.encode();
        assert_eq!(bytes.len(), HEADER_SIZE);
        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded.payload.len(), 0);
        assert!(decoded.flags.contains(Flags::SYN));
    }

    #[test]
    fn short_buffer_is_invalid() {
        assert!(Packet::decode(&[1, 2, 3]).is_err());
    }

    #[test]
    fn checksum_catches_payload_corruption() {
        let mut p = Packet::data(0, 0, b"abc".to_vec());
        assert!(p.checksum_valid());
        p.payload[0] ^= 0xFF;
        assert!(!p.checksum_valid());
    }

    #[test]
    fn syn_and_fin_together_is_a_protocol_violation() {
        let p = Packet::new(0, 0, Flags::SYN | Flags::FIN, Vec::new());
        assert!(p.is_protocol_violation());
    }

    #[test]
    fn inside_window_wraps_past_255() {
        assert!(inside_window(2, 254, 5));
        assert!(!inside_window(4, 0, 4));
        assert!(inside_window(0, 254, 5));
    }
}
