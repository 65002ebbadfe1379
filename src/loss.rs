//! Artificial loss injection. Folded into the send path rather than kept
//! external, because the loss behavior is part of what this crate is for:
//! exercising GBN/SR retransmit logic under fault. See `sr.py`/`gbn.py`'s
//! `udp_send`, which this mirrors (probability check, then a short sleep
//! either way so a tight retransmit loop can't spin the CPU).

use std::net::{SocketAddr, UdpSocket};
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Jitter slept after every send attempt, lost or not — long enough to
/// yield the scheduler under an adversarial drop rate, short enough not to
/// show up in a test suite's wall-clock budget.
const SEND_PACE: Duration = Duration::from_millis(10);

pub struct LossInjector {
    loss_rate: f64,
    rng: StdRng,
}

impl LossInjector {
    pub fn new(loss_rate: f64) -> Self {
        Self { loss_rate, rng: StdRng::from_entropy() }
    }

    /// Deterministic variant for tests that need exact, reproducible drop
    /// sequences (see the scenarios in `tests/`).
    pub fn seeded(loss_rate: f64, seed: u64) -> Self {
        Self { loss_rate, rng: StdRng::seed_from_u64(seed) }
    }

    pub fn loss_rate(&self) -> f64 {
        self.loss_rate
    }

    /// Passes `bytes` to the datagram primitive unless the roll says to
    /// drop it. Returns whether it was actually sent, so callers can log
    /// at the right level.
    pub fn maybe_send(
        &mut self,
        socket: &UdpSocket,
        addr: SocketAddr,
        bytes: &[u8],
    ) -> std::io::Result<bool> {
        let dropped = self.loss_rate > 0.0 && self.rng.gen::<f64>() < self.loss_rate;
        if dropped {
            log::warn!("loss injector dropped outbound packet ({} bytes)", bytes.len());
        } else {
            socket.send_to(bytes, addr)?;
        }
        thread::sleep(SEND_PACE);
        Ok(!dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_loss_rate_never_drops() {
        let mut inj = LossInjector::seeded(0.0, 1);
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        for _ in 0..20 {
            assert!(inj.maybe_send(&socket, addr, b"x").unwrap());
        }
    }

    #[test]
    fn seeded_injector_is_deterministic() {
        let mut a = LossInjector::seeded(0.5, 42);
        let mut b = LossInjector::seeded(0.5, 42);
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        for _ in 0..10 {
            assert_eq!(
                a.maybe_send(&socket, addr, b"x").unwrap(),
                b.maybe_send(&socket, addr, b"x").unwrap(),
            );
        }
    }
}
