//! Mesh Chat Example
//!
//! Starts an in-process relay, connects three peer clients to it, and lets
//! them broadcast identity-tagged messages over the negotiated data
//! channels. It shows how to:
//!
//! - Run a [`SignalingServer`] and point clients at it
//! - Drive [`PeerClient`] with callbacks instead of polling
//! - Keep a per-sender [`Roster`] deduplicated by identity
//!
//! # Running
//!
//! ```bash
//! cargo run -p livemesh --example mesh_chat
//! ```

use livemesh::{
    ClientConfig, PeerClient, PeerOptions, RelayConfig, Roster, SignalingServer,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info,webrtc=warn")
        .init();

    // An ephemeral relay; every client below rendezvouses through it.
    let relay = SignalingServer::new(RelayConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        ..Default::default()
    })?
    .start()
    .await?;
    info!("Relay listening on {}", relay.url());

    let config = |url: &str| ClientConfig {
        relay_url: url.to_string(),
        room: None,
        peer: PeerOptions {
            // Loopback only; host candidates are enough.
            stun_servers: Vec::new(),
            ..Default::default()
        },
    };

    let mut clients = Vec::new();
    for name in ["ada", "grace", "edsger"] {
        let client = PeerClient::new(config(&relay.url())).await?;
        info!("{} joined as {}", name, client.client_id());

        // One message counter per remote sender, created on first sight.
        let roster: Arc<Mutex<Roster<u64>>> = Arc::new(Mutex::new(Roster::new()));
        let roster_cb = Arc::clone(&roster);
        let name_cb = name;
        client.on_data(move |payload, user_id| {
            let mut roster = roster_cb.lock().unwrap();
            let envelope = livemesh::DataEnvelope::new(payload, user_id);
            let entry = roster.observe(&envelope);
            entry.state += 1;
            info!(
                "{} heard {} (message #{}): {}",
                name_cb, entry.user_id, entry.state, entry.last_payload
            );
        });
        client.on_connect(move || info!("{} has a peer connection", name_cb));

        client.connect();
        clients.push((name, client, roster));
    }

    // Broadcast until everyone has heard from both partners a few times.
    for round in 0..20u32 {
        for (name, client, _) in &clients {
            client
                .send(&json!({ "from": name, "round": round }))
                .await?;
        }
        sleep(Duration::from_millis(500)).await;

        let done = clients.iter().all(|(_, _, roster)| {
            let roster = roster.lock().unwrap();
            roster.len() == clients.len() - 1 && roster.iter().all(|e| e.state >= 3)
        });
        if done {
            break;
        }
    }

    for (name, _, roster) in &clients {
        let roster = roster.lock().unwrap();
        info!("{} knows {} other peer(s)", name, roster.len());
    }

    for (_, client, _) in &clients {
        client.hangup();
    }
    sleep(Duration::from_millis(200)).await;
    relay.shutdown().await;
    Ok(())
}
