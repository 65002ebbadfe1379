//! Go-Back-N engine (C5 + C6): cumulative ACK, retransmit-all-from-base on
//! timeout. Single-threaded, blocking, one `UdpSocket` per connection —
//! grounded in `binoyjayan-tcp-rs`'s `Connection` (one struct owning both
//! send and receive sequence spaces and a send-time-ordered retransmission
//! record) and in the reference `gbn.py`'s `GBNSocket`.

use std::net::{SocketAddr, UdpSocket};

use rand::Rng;

use crate::config::{RdtConfig, BUFFER_SIZE, HEADER_SIZE, MAX_CHUNKS_PER_SEND};
use crate::error::{RdtError, Result};
use crate::loss::LossInjector;
use crate::packet::{ack_in_range, inside_window, Flags, Packet};
use crate::state::ConnState;

enum Inbound {
    Continue,
    PeerClosed,
}

enum WaitStatus {
    Progress,
    TimedOut,
    PeerClosed,
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)
}

/// A Go-Back-N endpoint. Owns exactly one UDP socket and, once connected,
/// exactly one peer address — no multiplexing, per spec.
pub struct GbnSocket {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    state: ConnState,
    is_server: bool,
    cfg: RdtConfig,
    loss: LossInjector,

    /// Initial send sequence number, kept so a duplicate inbound SYN in
    /// ESTABLISHED can be answered with the *same* SYN|ACK rather than a
    /// fresh one.
    iss: u8,

    s_data: Vec<Option<Vec<u8>>>,
    s_base: u8,
    s_next: u8,
    s_pos: u8,

    r_data: Vec<Option<Vec<u8>>>,
    r_base: u8,
    r_expect: u8,

    /// Sequence number of an inbound FIN, once seen — it occupies a slot
    /// in the sequence space the same way SYN does, so `recv()` knows
    /// exactly when to report end-of-stream instead of trying to hand back
    /// a (nonexistent) payload for it.
    fin_seq: Option<u8>,
}

impl GbnSocket {
    pub fn new(cfg: RdtConfig) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self {
            socket,
            peer: None,
            state: ConnState::Closed,
            is_server: false,
            loss: LossInjector::new(cfg.loss_rate),
            cfg,
            iss: 0,
            s_data: vec![None; 256],
            s_base: 0,
            s_next: 0,
            s_pos: 0,
            r_data: vec![None; 256],
            r_base: 0,
            r_expect: 0,
            fin_seq: None,
        })
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn bind(&mut self, addr: SocketAddr) -> std::io::Result<()> {
        self.socket = UdpSocket::bind(addr)?;
        Ok(())
    }

    pub fn listen(&mut self) -> Result<()> {
        self.is_server = true;
        self.state = ConnState::Listen;
        Ok(())
    }

    /// Blocks until a SYN arrives, then completes the passive-open half of
    /// the handshake.
    pub fn accept(&mut self) -> Result<()> {
        if self.state != ConnState::Listen {
            return Err(RdtError::NotConnected);
        }
        self.socket.set_read_timeout(None)?;
        let mut buf = vec![0u8; HEADER_SIZE + BUFFER_SIZE];
        loop {
            let (n, from) = self.socket.recv_from(&mut buf)?;
            let pkt = match Packet::decode(&buf[..n]) {
                Ok(p) => p,
                Err(_) => {
                    log::warn!("malformed datagram ({n} bytes) while listening, discarding");
                    continue;
                }
            };
            if !pkt.flags.contains(Flags::SYN) || pkt.is_protocol_violation() {
                log::debug!("ignoring non-SYN packet while listening");
                continue;
            }

            self.peer = Some(from);
            self.r_base = pkt.seq.wrapping_add(1);
            self.r_expect = self.r_base;

            let iss: u8 = rand::thread_rng().gen();
            self.iss = iss;
            self.s_base = iss;
            self.s_next = iss;
            self.s_pos = iss;

            let syn_ack = Packet::syn_ack(iss, self.r_expect);
            self.loss.maybe_send(&self.socket, from, &syn_ack.encode())?;
            self.state = ConnState::Established;
            log::info!("GBN: accepted connection from {from}");
            return Ok(());
        }
    }

    /// Active open: send SYN, retry on timeout up to `max_timeout`.
    pub fn connect(&mut self, addr: SocketAddr) -> Result<()> {
        if self.state != ConnState::Closed {
            return Err(RdtError::AlreadyConnected);
        }
        self.peer = Some(addr);
        let iss: u8 = rand::thread_rng().gen();
        self.iss = iss;
        self.s_base = iss;
        self.s_next = iss;
        self.s_pos = iss;
        self.state = ConnState::SynSent;

        let syn = Packet::syn(iss.wrapping_sub(1), 0);
        self.loss.maybe_send(&self.socket, addr, &syn.encode())?;
        self.socket.set_read_timeout(Some(self.cfg.timeout))?;

        let mut buf = vec![0u8; HEADER_SIZE + BUFFER_SIZE];
        let mut timeouts = 0u32;
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) if from == addr => {
                    let pkt = match Packet::decode(&buf[..n]) {
                        Ok(p) => p,
                        Err(_) => {
                            log::warn!("malformed datagram during handshake, discarding");
                            continue;
                        }
                    };
                    if pkt.flags.contains(Flags::SYN)
                        && pkt.flags.contains(Flags::ACK)
                        && pkt.ack == iss
                    {
                        self.r_base = pkt.seq.wrapping_add(1);
                        self.r_expect = self.r_base;
                        self.state = ConnState::Established;
                        log::info!("GBN: handshake complete with {addr}");
                        return Ok(());
                    }
                }
                Ok(_) => continue,
                Err(e) if is_timeout(&e) => {
                    timeouts += 1;
                    log::warn!("GBN: SYN timeout ({timeouts}/{})", self.cfg.max_timeout);
                    if timeouts >= self.cfg.max_timeout {
                        self.state = ConnState::Closed;
                        return Err(RdtError::ConnectionLost(timeouts));
                    }
                    self.loss.maybe_send(&self.socket, addr, &syn.encode())?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Enqueues `data`, slicing it into `BUFFER_SIZE` chunks, and blocks
    /// until every chunk is acknowledged (or the connection is declared
    /// lost, or the peer closes mid-transfer).
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.state.is_established() {
            return Err(RdtError::NotConnected);
        }
        let peer = self.peer.ok_or(RdtError::NotConnected)?;

        let chunks: Vec<&[u8]> = if data.is_empty() {
            vec![&[][..]]
        } else {
            data.chunks(BUFFER_SIZE).collect()
        };
        if chunks.len() >= MAX_CHUNKS_PER_SEND {
            return Err(RdtError::CapacityExceeded {
                chunks: chunks.len(),
                limit: MAX_CHUNKS_PER_SEND,
            });
        }
        for chunk in &chunks {
            self.s_data[self.s_pos as usize] = Some(chunk.to_vec());
            self.s_pos = self.s_pos.wrapping_add(1);
        }

        let mut timeouts = 0u32;
        while self.s_base != self.s_pos {
            if inside_window(self.s_next, self.s_base, self.cfg.window_size as u16)
                && self.s_next != self.s_pos
            {
                self.transmit(peer, self.s_next)?;
                self.s_next = self.s_next.wrapping_add(1);
            } else {
                match self.gbn_wait(peer, false)? {
                    WaitStatus::Progress => timeouts = 0,
                    WaitStatus::TimedOut => {
                        timeouts += 1;
                        if timeouts >= self.cfg.max_timeout {
                            return Err(RdtError::ConnectionLost(timeouts));
                        }
                    }
                    WaitStatus::PeerClosed => return Ok(()),
                }
            }
        }
        Ok(())
    }

    /// Blocks for exactly one deliverable chunk, truncated to at most
    /// `maxlen` bytes (the remainder of an oversize chunk is dropped, not
    /// held for a later call — matching the reference `recv(self,
    /// size=BUFFER_SIZE)` truncation via `data[:size]`). Returns an empty
    /// `Vec` at end-of-stream (the peer's FIN has been observed and all
    /// data ahead of it has already been delivered).
    pub fn recv(&mut self, maxlen: usize) -> Result<Vec<u8>> {
        let peer = match self.peer {
            Some(p) => p,
            None => return Ok(Vec::new()),
        };
        let mut timeouts = 0u32;
        loop {
            if let Some(fin_seq) = self.fin_seq {
                if self.r_base == fin_seq {
                    return Ok(Vec::new());
                }
            }
            if self.r_base != self.r_expect {
                let mut data = self.r_data[self.r_base as usize].take().unwrap_or_default();
                self.r_base = self.r_base.wrapping_add(1);
                data.truncate(maxlen);
                return Ok(data);
            }
            if self.state == ConnState::Closed {
                return Ok(Vec::new());
            }
            match self.gbn_wait(peer, true)? {
                WaitStatus::Progress => timeouts = 0,
                WaitStatus::TimedOut => {
                    timeouts += 1;
                    if timeouts >= self.cfg.max_timeout {
                        return Err(RdtError::ConnectionLost(timeouts));
                    }
                }
                WaitStatus::PeerClosed => {}
            }
        }
    }

    /// Graceful close. Per the source this is grounded on: after
    /// `max_timeout` unanswered FIN retries, the state is forced to
    /// `CLOSED` regardless of whether a FIN|ACK was actually observed.
    pub fn close(&mut self) -> Result<()> {
        if self.state != ConnState::Established && self.state != ConnState::FinWait {
            self.state = ConnState::Closed;
            return Ok(());
        }
        let peer = self.peer.ok_or(RdtError::NotConnected)?;
        self.state = ConnState::FinWait;

        let fin = Packet::fin(self.s_next, self.r_expect);
        self.loss.maybe_send(&self.socket, peer, &fin.encode())?;
        self.socket.set_read_timeout(Some(self.cfg.timeout))?;

        let mut buf = vec![0u8; HEADER_SIZE + BUFFER_SIZE];
        let mut timeouts = 0u32;
        loop {
            if timeouts >= self.cfg.max_timeout {
                log::warn!("GBN: close() forcing CLOSED after {timeouts} unanswered FIN retries");
                break;
            }
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) if from == peer => match Packet::decode(&buf[..n]) {
                    Ok(pkt) if pkt.flags.contains(Flags::FIN) && pkt.flags.contains(Flags::ACK) => {
                        log::info!("GBN: close() handshake complete");
                        break;
                    }
                    _ => continue,
                },
                Ok(_) => continue,
                Err(e) if is_timeout(&e) => {
                    timeouts += 1;
                    log::warn!("GBN: FIN-ACK timeout ({timeouts}/{})", self.cfg.max_timeout);
                    self.loss.maybe_send(&self.socket, peer, &fin.encode())?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.state = ConnState::Closed;
        Ok(())
    }

    fn transmit(&mut self, peer: SocketAddr, seq: u8) -> Result<()> {
        let payload = self.s_data[seq as usize].clone().unwrap_or_default();
        log::trace!("GBN: send seq={seq} ack={}", self.r_expect);
        let pkt = Packet::data(seq, self.r_expect, payload);
        self.loss.maybe_send(&self.socket, peer, &pkt.encode())?;
        Ok(())
    }

    fn retransmit_window(&mut self, peer: SocketAddr) -> Result<()> {
        log::warn!(
            "GBN: timeout, go-back-N retransmit of [{}, {})",
            self.s_base,
            self.s_next
        );
        let mut seq = self.s_base;
        while seq != self.s_next {
            self.transmit(peer, seq)?;
            seq = seq.wrapping_add(1);
        }
        Ok(())
    }

    fn ack_current(&mut self, peer: SocketAddr) -> Result<()> {
        let pkt = Packet::ack(self.s_next.wrapping_sub(1), self.r_expect);
        self.loss.maybe_send(&self.socket, peer, &pkt.encode())?;
        Ok(())
    }

    /// Processes exactly one inbound packet's worth of bookkeeping: ACK
    /// advance, FIN (peer-initiated close), and in-order data delivery
    /// with duplicate-cumulative-ACK for anything else.
    fn handle_inbound(&mut self, peer: SocketAddr, pkt: Packet) -> Result<Inbound> {
        if pkt.is_protocol_violation() {
            log::warn!("dropping packet with both SYN and FIN set");
            return Ok(Inbound::Continue);
        }

        if pkt.flags.contains(Flags::SYN) && !pkt.flags.contains(Flags::ACK) {
            if self.state == ConnState::Established {
                log::debug!("duplicate SYN in ESTABLISHED, replying with current SYN|ACK");
                let syn_ack = Packet::syn_ack(self.iss, self.r_expect);
                self.loss.maybe_send(&self.socket, peer, &syn_ack.encode())?;
            }
            return Ok(Inbound::Continue);
        }

        if pkt.flags.contains(Flags::FIN) && !pkt.flags.contains(Flags::ACK) {
            if pkt.seq != self.r_expect {
                // Out-of-order FIN: a preceding data chunk hasn't arrived
                // yet. Treat it like any other out-of-order packet rather
                // than closing early, or we'd drop still-pending data.
                log::debug!(
                    "GBN: out-of-order FIN seq={} (expected {}), re-ACKing",
                    pkt.seq,
                    self.r_expect
                );
                self.ack_current(peer)?;
                return Ok(Inbound::Continue);
            }
            self.r_expect = self.r_expect.wrapping_add(1);
            self.fin_seq = Some(pkt.seq);
            let fin_ack = Packet::fin_ack(self.s_next.wrapping_sub(1), self.r_expect);
            self.loss.maybe_send(&self.socket, peer, &fin_ack.encode())?;
            self.state = ConnState::Closed;
            log::info!("GBN: peer closed the connection");
            return Ok(Inbound::PeerClosed);
        }

        if pkt.flags.contains(Flags::ACK) {
            if ack_in_range(pkt.ack, self.s_base, self.s_next) {
                log::debug!("ACK advances s_base {} -> {}", self.s_base, pkt.ack);
                self.s_base = pkt.ack;
            }
            return Ok(Inbound::Continue);
        }

        // Plain data packet (no control flags set).
        if pkt.seq == self.r_expect && pkt.checksum_valid() {
            self.r_expect = self.r_expect.wrapping_add(1);
            self.r_data[pkt.seq as usize] = Some(pkt.payload);
            self.ack_current(peer)?;
        } else {
            if !pkt.checksum_valid() {
                log::warn!("checksum mismatch at seq {}, discarding", pkt.seq);
            } else {
                log::debug!("out-of-order seq {} (expected {}), re-ACKing", pkt.seq, self.r_expect);
            }
            self.ack_current(peer)?;
        }
        Ok(Inbound::Continue)
    }

    fn gbn_wait(&mut self, peer: SocketAddr, is_recv_call: bool) -> Result<WaitStatus> {
        self.socket.set_read_timeout(Some(self.cfg.timeout))?;
        let mut buf = vec![0u8; HEADER_SIZE + BUFFER_SIZE];
        match self.socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                if from != peer {
                    log::debug!("ignoring datagram from unexpected peer {from}");
                    return Ok(WaitStatus::Progress);
                }
                let pkt = match Packet::decode(&buf[..n]) {
                    Ok(p) => p,
                    Err(_) => {
                        log::warn!("malformed datagram ({n} bytes), discarding");
                        return Ok(WaitStatus::Progress);
                    }
                };
                match self.handle_inbound(peer, pkt)? {
                    Inbound::Continue => Ok(WaitStatus::Progress),
                    Inbound::PeerClosed => Ok(WaitStatus::PeerClosed),
                }
            }
            Err(e) if is_timeout(&e) => {
                if !is_recv_call {
                    self.retransmit_window(peer)?;
                }
                Ok(WaitStatus::TimedOut)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn harness(loss_rate: f64) -> (GbnSocket, GbnSocket) {
        let mut cfg = RdtConfig::gbn_default();
        cfg.loss_rate = loss_rate;
        cfg.timeout = std::time::Duration::from_millis(200);
        cfg.max_timeout = 20;
        let mut server = GbnSocket::new(cfg).unwrap();
        server.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = server.local_addr().unwrap();
        server.listen().unwrap();

        let client_cfg = cfg;
        let client_thread = thread::spawn(move || {
            let mut client = GbnSocket::new(client_cfg).unwrap();
            client.connect(addr).unwrap();
            client
        });
        server.accept().unwrap();
        let client = client_thread.join().unwrap();
        (server, client)
    }

    #[test]
    fn lossless_tiny_transfer_reconstructs_exactly() {
        let (mut server, mut client) = harness(0.0);
        let sender = thread::spawn(move || {
            client.send(b"hello").unwrap();
            client.close().unwrap();
            client
        });
        let mut received = Vec::new();
        loop {
            let chunk = server.recv(BUFFER_SIZE).unwrap();
            if chunk.is_empty() {
                break;
            }
            received.extend_from_slice(&chunk);
        }
        sender.join().unwrap();
        assert_eq!(received, b"hello");
    }

    #[test]
    fn duplicate_ack_is_idempotent() {
        let (mut server, _client) = harness(0.0);
        let peer = server.peer_addr().unwrap();
        server.s_base = 10;
        server.s_next = 15;
        let ack_pkt = Packet::ack(0, 12);
        server.handle_inbound(peer, ack_pkt.clone()).unwrap();
        assert_eq!(server.s_base, 12);
        server.handle_inbound(peer, ack_pkt).unwrap();
        assert_eq!(server.s_base, 12);
    }
}
