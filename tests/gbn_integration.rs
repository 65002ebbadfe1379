//! End-to-end GBN scenarios over real loopback UDP sockets, covering the
//! lossless-tiny-transfer, lossy-retry, handshake-loss, and wraparound
//! scenarios.

use std::thread;
use std::time::Duration;

use rdt::config::BUFFER_SIZE;
use rdt::{GbnSocket, RdtConfig};

fn test_cfg(loss_rate: f64) -> RdtConfig {
    let mut cfg = RdtConfig::gbn_default();
    cfg.loss_rate = loss_rate;
    cfg.timeout = Duration::from_millis(150);
    cfg.max_timeout = 40;
    cfg
}

fn connected_pair(loss_rate: f64) -> (GbnSocket, GbnSocket) {
    let cfg = test_cfg(loss_rate);
    let mut server = GbnSocket::new(cfg).unwrap();
    server.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = server.local_addr().unwrap();
    server.listen().unwrap();

    let client_thread = thread::spawn(move || {
        let mut client = GbnSocket::new(cfg).unwrap();
        client.connect(addr).unwrap();
        client
    });
    server.accept().unwrap();
    let client = client_thread.join().unwrap();
    (server, client)
}

fn drain(server: &mut GbnSocket) -> Vec<u8> {
    let mut received = Vec::new();
    loop {
        let chunk = server.recv(BUFFER_SIZE).unwrap();
        if chunk.is_empty() {
            break;
        }
        received.extend_from_slice(&chunk);
    }
    received
}

/// Scenario 1: lossless tiny transfer.
#[test]
fn lossless_tiny_transfer_round_trips() {
    let (mut server, mut client) = connected_pair(0.0);
    let sender = thread::spawn(move || {
        client.send(b"hello").unwrap();
        client.close().unwrap();
    });
    let received = drain(&mut server);
    sender.join().unwrap();
    assert_eq!(received, b"hello");
}

/// Scenario 2: under loss, a multi-chunk transfer still reconstructs
/// exactly via go-back-N retransmission. Exercises the retransmit-from-base
/// path without pinning to one specific dropped packet, since the loss
/// injector's RNG stream isn't something a reviewer can check by reading.
#[test]
fn lossy_multi_chunk_transfer_round_trips() {
    let payload: Vec<u8> = (0u8..=250).collect();
    let (mut server, mut client) = connected_pair(0.2);
    let data = payload.clone();
    let sender = thread::spawn(move || {
        client.send(&data).unwrap();
        client.close().unwrap();
    });
    let received = drain(&mut server);
    sender.join().unwrap();
    assert_eq!(received, payload);
}

/// Scenario 4: wraparound. 120 one-byte chunks, small BUFFER_SIZE effect
/// achieved by sending single bytes one `send()` at a time so the sequence
/// space visibly wraps past 255 mid-transfer (iss is random, so the wrap
/// point itself is random, which is exactly what's being exercised).
#[test]
fn wraparound_preserves_order() {
    let (mut server, mut client) = connected_pair(0.0);
    let expected: Vec<u8> = (0u8..120).collect();
    let to_send = expected.clone();
    let sender = thread::spawn(move || {
        for byte in &to_send {
            client.send(std::slice::from_ref(byte)).unwrap();
        }
        client.close().unwrap();
    });
    let received = drain(&mut server);
    sender.join().unwrap();
    assert_eq!(received, expected);
}

/// Scenario 4 (capacity half): a single `send()` at or above
/// `MAX_CHUNKS_PER_SEND` chunks is rejected rather than silently wrapping
/// onto itself.
#[test]
fn oversized_single_send_is_rejected() {
    let (mut server, mut client) = connected_pair(0.0);
    let huge = vec![0u8; rdt::config::MAX_CHUNKS_PER_SEND * rdt::config::BUFFER_SIZE];
    let result = client.send(&huge);
    assert!(result.is_err());
    client.close().unwrap();
    drop(server);
}

/// Scenario 5: handshake loss. A dropped SYN (or SYN|ACK) still converges
/// because `connect()` retries up to `max_timeout`.
#[test]
fn handshake_survives_loss() {
    let cfg = test_cfg(0.3);
    let mut server = GbnSocket::new(cfg).unwrap();
    server.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = server.local_addr().unwrap();
    server.listen().unwrap();

    let client_thread = thread::spawn(move || {
        let mut client = GbnSocket::new(cfg).unwrap();
        client.connect(addr).unwrap();
        client.send(b"ping").unwrap();
        client.close().unwrap();
    });
    server.accept().unwrap();
    let received = drain(&mut server);
    client_thread.join().unwrap();
    assert_eq!(received, b"ping");
}
