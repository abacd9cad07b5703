//! `postbox-echo`: local WebSocket echo endpoint.
//!
//! Broadcasts every text frame to all connected clients, the sender
//! included. Stands in for a hosted echo channel during development and
//! tests.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9000
//! cargo run --bin postbox-echo
//!
//! # Run on custom address
//! cargo run --bin postbox-echo -- --bind 127.0.0.1:8080
//! ECHO_ADDR=127.0.0.1:8080 cargo run --bin postbox-echo
//! ```

use std::sync::Arc;

use clap::Parser;
use postbox_echo::config::{EchoCliArgs, EchoConfig};
use postbox_echo::server::{self, EchoState};

#[tokio::main]
async fn main() {
    let cli = EchoCliArgs::parse();

    let config = match EchoConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting postbox echo server");

    let state = Arc::new(EchoState::with_config(
        config.max_payload_size,
        config.notify_self,
    ));

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "echo server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "echo server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start echo server");
            std::process::exit(1);
        }
    }
}
