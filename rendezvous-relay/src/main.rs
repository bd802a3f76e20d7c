//! Rendezvous relay -- WebRTC signaling over WebSocket.
//!
//! An axum WebSocket server that lets peers meet in named rooms and exchange
//! offers, answers and candidates. The relay only brokers the handshake; media
//! flows directly between the peers.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:3000
//! cargo run --bin rendezvous-relay
//!
//! # Run on a custom port
//! cargo run --bin rendezvous-relay -- --port 8080
//!
//! # Or via environment variable
//! PORT=8080 cargo run --bin rendezvous-relay
//! ```

use clap::Parser;
use rendezvous_relay::config::{RelayCliArgs, RelayConfig};
use rendezvous_relay::server::RelayServer;

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let addr = config.bind_addr();
    tracing::info!(addr = %addr, "starting rendezvous relay");

    let relay = match RelayServer::new().start(&addr).await {
        Ok(relay) => relay,
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    };
    tracing::info!(addr = %relay.local_addr(), "signaling server listening");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        tracing::info!("shutdown signal received");
    };

    if let Err(e) = relay.run_until(shutdown).await {
        tracing::error!(error = %e, "relay server task failed");
        std::process::exit(1);
    }
}
