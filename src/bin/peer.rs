use clap::Parser;
use color_print::cformat;
use print_arbiter::{log, peer::Peer};
use std::error::Error;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "peer")]
#[command(about = "A peer that coordinates exclusive access to the shared printer.")]
struct PeerOptions {
    /// Unique positive id of this peer
    #[clap(long, value_parser = clap::value_parser!(i32).range(1..))]
    id: i32,

    /// Port to listen on for coordination calls from the other peers
    #[clap(long)]
    port: u16,

    /// Address of the printer, e.g. localhost:50051
    #[clap(long)]
    server: String,

    /// Comma-separated addresses of every other peer; pass "" to run solo
    #[clap(long)]
    clients: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let options = PeerOptions::parse();

    let peer_addresses: Vec<String> = options
        .clients
        .split(',')
        .map(|address| address.trim().to_string())
        .filter(|address| !address.is_empty())
        .collect();

    let listener = TcpListener::bind(format!("0.0.0.0:{}", options.port)).await?;
    log::info(&cformat!(
        "Peer <bold>{}</bold> listening on port <bold>{}</bold>, printing via <bold>{}</bold>, {} other peer(s).",
        options.id,
        options.port,
        options.server,
        peer_addresses.len()
    ));

    let peer = Arc::new(Peer::new(options.id, options.server, peer_addresses));

    tokio::select! {
        outcome = peer.run(listener) => outcome,
        _ = tokio::signal::ctrl_c() => {
            log::info("Shutting the peer down.");
            Ok(())
        }
    }
}
