//! Signaling relay binary entry point
//!
//! Runs the LiveMesh rendezvous relay: room matchmaking plus opaque signal
//! forwarding. Room state is in-memory only and rebuilt empty on restart.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default port with two-client rooms
//! cargo run -p livemesh-relay-server
//!
//! # Custom address and capacity
//! cargo run -p livemesh-relay-server -- --bind-addr 0.0.0.0:9000 --room-capacity 2
//! ```

use clap::Parser;
use livemesh::{RelayConfig, SignalingServer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// LiveMesh signaling relay
///
/// Brokers room membership and forwards signaling payloads between peers.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8081", env = "LIVEMESH_BIND_ADDR")]
    bind_addr: String,

    /// Maximum clients per room
    #[arg(long, default_value_t = 2, env = "LIVEMESH_ROOM_CAPACITY")]
    room_capacity: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = RelayConfig {
        bind_addr: args.bind_addr,
        room_capacity: args.room_capacity,
    };

    let server = SignalingServer::new(config)?;
    let handle = server.start().await?;
    info!("Relay ready on {}", handle.url());

    let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })?;

    tokio::task::spawn_blocking(move || {
        let _ = shutdown_rx.recv();
    })
    .await?;

    info!("Shutting down");
    handle.shutdown().await;
    Ok(())
}
