//! Sends a file over either engine, mirroring the reference
//! `gbn_client.py` / `sr_client.py` scripts: connect, stream the whole
//! file in `BUFFER_SIZE`-ish chunks via one `send()`, then close.

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, ValueEnum};

use rdt::config::{BUFFER_SIZE, MAX_CHUNKS_PER_SEND};
use rdt::{GbnSocket, RdtConfig, SrSocket};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Engine {
    Gbn,
    Sr,
}

/// Largest slice a single `send()` call can carry without tripping
/// `RdtError::CapacityExceeded`; the demo chunks at this boundary so
/// arbitrarily large files still go through one engine at a time.
const SEND_BATCH: usize = (MAX_CHUNKS_PER_SEND - 1) * BUFFER_SIZE;

#[derive(Parser, Debug)]
#[command(version, about = "Reliable-data-transfer demo client")]
struct Args {
    #[arg(short, long, value_enum, default_value = "gbn")]
    engine: Engine,

    #[arg(short, long, default_value = "127.0.0.1:8888")]
    connect: SocketAddr,

    #[arg(short, long)]
    file: PathBuf,

    #[arg(short, long, default_value_t = 0.0)]
    loss_rate: f64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let data = fs::read(&args.file)?;
    println!("sending {} bytes from {}", data.len(), args.file.display());
    let start = Instant::now();

    match args.engine {
        Engine::Gbn => {
            let mut cfg = RdtConfig::gbn_default();
            cfg.loss_rate = args.loss_rate;
            let mut socket = GbnSocket::new(cfg)?;
            socket.connect(args.connect)?;
            for batch in data.chunks(SEND_BATCH) {
                socket.send(batch)?;
            }
            socket.close()?;
        }
        Engine::Sr => {
            let mut cfg = RdtConfig::sr_default();
            cfg.loss_rate = args.loss_rate;
            let mut socket = SrSocket::new(cfg)?;
            socket.connect(args.connect)?;
            for batch in data.chunks(SEND_BATCH) {
                socket.send(batch)?;
            }
            socket.close()?;
        }
    }

    println!("transfer complete in {:?}", start.elapsed());
    Ok(())
}
