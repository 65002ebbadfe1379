//! Receives a byte stream over either engine and writes it to a file,
//! mirroring the reference `gbn_server.py` / `sr_server.py` scripts.

use std::fs::File;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use rdt::config::BUFFER_SIZE;
use rdt::{GbnSocket, RdtConfig, SrSocket};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Engine {
    Gbn,
    Sr,
}

#[derive(Parser, Debug)]
#[command(version, about = "Reliable-data-transfer demo server")]
struct Args {
    #[arg(short, long, value_enum, default_value = "gbn")]
    engine: Engine,

    #[arg(short, long, default_value = "127.0.0.1:8888")]
    bind: SocketAddr,

    #[arg(short, long)]
    out: PathBuf,

    #[arg(short, long, default_value_t = 0.0)]
    loss_rate: f64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut out = File::create(&args.out)?;

    match args.engine {
        Engine::Gbn => {
            let mut cfg = RdtConfig::gbn_default();
            cfg.loss_rate = args.loss_rate;
            let mut socket = GbnSocket::new(cfg)?;
            socket.bind(args.bind)?;
            socket.listen()?;
            println!("GBN server listening on {}", args.bind);
            socket.accept()?;
            println!("accepted connection from {:?}", socket.peer_addr());
            loop {
                let chunk = socket.recv(BUFFER_SIZE)?;
                if chunk.is_empty() {
                    break;
                }
                out.write_all(&chunk)?;
            }
        }
        Engine::Sr => {
            let mut cfg = RdtConfig::sr_default();
            cfg.loss_rate = args.loss_rate;
            let mut socket = SrSocket::new(cfg)?;
            socket.bind(args.bind)?;
            socket.listen()?;
            println!("SR server listening on {}", args.bind);
            socket.accept()?;
            println!("accepted connection from {:?}", socket.peer_addr());
            loop {
                let chunk = socket.recv(BUFFER_SIZE)?;
                if chunk.is_empty() {
                    break;
                }
                out.write_all(&chunk)?;
            }
        }
    }

    println!("transfer complete, wrote to {}", args.out.display());
    Ok(())
}
