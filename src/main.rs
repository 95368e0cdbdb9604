//! Entry point for `udp-file-transfer`.
//!
//! Parses CLI arguments and dispatches into **send**, **receive**, or
//! **router** mode.  All protocol work is delegated to library modules;
//! `main.rs` owns only process setup (logging, argument parsing) and the
//! end-of-run summaries.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use udp_file_transfer::{
    FileReceiver, FileSender, Router, SimulatorConfig, Socket, ROUTER_PORT, SERVER_PORT,
};

/// Reliable file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send a file to a receiver.
    Send {
        /// Receiver (or router) address, e.g. 127.0.0.1:8888.
        #[arg(short, long)]
        server: String,
        /// File to transfer.
        file: PathBuf,
    },
    /// Receive one file and write it to disk.
    Receive {
        /// Local address to bind.
        #[arg(short, long, default_value_t = format!("0.0.0.0:{SERVER_PORT}"))]
        bind: String,
        /// Output path for the received bytes.
        #[arg(short, long, default_value = "received_file")]
        output: PathBuf,
    },
    /// Run the impairment router in front of a receiver.
    Router {
        /// Local address to bind.
        #[arg(short, long, default_value_t = format!("0.0.0.0:{ROUTER_PORT}"))]
        listen: String,
        /// Receiver address to forward to.
        #[arg(short, long)]
        upstream: String,
        /// Probability of dropping a datagram.
        #[arg(long, default_value_t = 0.0)]
        loss: f64,
        /// Probability of duplicating a datagram.
        #[arg(long, default_value_t = 0.0)]
        duplicate: f64,
        /// Probability of swapping a datagram with its successor.
        #[arg(long, default_value_t = 0.0)]
        reorder: f64,
        /// Probability of flipping one bit of a datagram.
        #[arg(long, default_value_t = 0.0)]
        corrupt: f64,
        /// Fault RNG seed.
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    match cli.mode {
        Mode::Send { server, file } => send(&server, &file).await,
        Mode::Receive { bind, output } => receive(&bind, &output).await,
        Mode::Router {
            listen,
            upstream,
            loss,
            duplicate,
            reorder,
            corrupt,
            seed,
        } => {
            let config = SimulatorConfig {
                loss_rate: loss,
                duplicate_rate: duplicate,
                reorder_rate: reorder,
                corrupt_rate: corrupt,
                seed,
            };
            let listen: SocketAddr = listen.parse().context("invalid listen address")?;
            let upstream: SocketAddr = upstream.parse().context("invalid upstream address")?;
            let router = Router::spawn(listen, upstream, config)
                .await
                .context("failed to start router")?;
            router.join().await;
            Ok(())
        }
    }
}

async fn send(server: &str, file: &PathBuf) -> anyhow::Result<()> {
    let peer: SocketAddr = server.parse().context("invalid server address")?;
    let data = std::fs::read(file).with_context(|| format!("failed to open {}", file.display()))?;

    let socket = Socket::bind("0.0.0.0:0".parse()?)
        .await
        .context("failed to bind local socket")?;
    log::info!("connecting to {peer}…");
    let mut sender = FileSender::connect(socket, peer)
        .await
        .context("connection failed")?;
    log::info!("connection established; sending {} byte(s)", data.len());

    sender.send_bytes(&data).await.context("transfer failed")?;
    let stats = sender.close().await.context("close failed")?;

    let secs = stats.elapsed.as_secs_f64();
    let throughput_kbps = if secs > 0.0 {
        (data.len() as f64 * 8.0) / (secs * 1024.0)
    } else {
        0.0
    };
    log::info!("--- Transmission Summary ---");
    log::info!("Total time: {secs:.3} seconds");
    log::info!("File size: {:.1} KB", data.len() as f64 / 1024.0);
    log::info!("Average throughput: {throughput_kbps:.1} Kbps");
    log::info!("Total packets sent: {}", stats.packets_sent);
    log::info!("Total retransmissions: {}", stats.retransmissions);
    log::info!("Total ACKs received: {}", stats.acks_received);
    log::info!("Packet loss rate: {:.2}%", stats.loss_rate());
    Ok(())
}

async fn receive(bind: &str, output: &PathBuf) -> anyhow::Result<()> {
    let bind: SocketAddr = bind.parse().context("invalid bind address")?;
    let socket = Socket::bind(bind).await.context("failed to bind socket")?;
    log::info!("listening on {}", socket.local_addr);

    let mut receiver = FileReceiver::accept(socket).await.context("accept failed")?;

    let file = File::create(output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    let mut sink = BufWriter::new(file);
    let stats = receiver
        .receive_to(&mut sink)
        .await
        .context("reception failed")?;
    sink.flush().context("failed to flush output file")?;

    log::info!("--- Reception Summary ---");
    log::info!("Total packets received: {}", stats.packets_received);
    log::info!("Out-of-order packets: {}", stats.out_of_order_packets);
    log::info!("Duplicate packets: {}", stats.duplicate_packets);
    log::info!("Bytes written: {}", stats.bytes_written);
    log::info!("Reception time: {:.3} seconds", stats.elapsed.as_secs_f64());
    log::info!("file received successfully → {}", output.display());
    Ok(())
}
