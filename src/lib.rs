//! A reliable, ordered, byte-stream transport over plain `UdpSocket`s, in
//! two interoperable flavors: Go-Back-N (`GbnSocket`, cumulative ACK,
//! retransmit-from-base) and Selective Repeat (`SrSocket`, per-packet ACK,
//! AIMD congestion window). Single-threaded, blocking I/O throughout — no
//! async runtime, no locks, one socket per connection.
//!
//! This crate never installs a `log` sink; callers (the `demos/` binaries,
//! or a consuming application) choose one.

pub mod config;
pub mod error;
pub mod gbn;
pub mod loss;
pub mod packet;
pub mod sr;
pub mod state;

pub use config::RdtConfig;
pub use error::{RdtError, Result};
pub use gbn::GbnSocket;
pub use loss::LossInjector;
pub use packet::{Flags, Packet};
pub use sr::SrSocket;
pub use state::ConnState;
