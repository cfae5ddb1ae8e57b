//! `WireChat` event gateway — lightweight WebSocket event router.
//!
//! An axum WebSocket server that authenticates sessions and fans
//! published events out to their recipients. It never interprets message
//! content — encoded payloads pass through opaque.
//!
//! # Usage
//!
//! ```bash
//! # Run on the default address 0.0.0.0:9100
//! cargo run --bin wirechat-gateway
//!
//! # Run on a custom address with a required session token
//! cargo run --bin wirechat-gateway -- --bind 127.0.0.1:9200 --auth-token secret
//!
//! # Or via environment variables
//! GATEWAY_ADDR=127.0.0.1:9200 cargo run --bin wirechat-gateway
//! ```

use std::sync::Arc;

use clap::Parser;
use wirechat_gateway::config::{GatewayCliArgs, GatewayConfig};
use wirechat_gateway::gateway::{self, GatewayState};

#[tokio::main]
async fn main() {
    let cli = GatewayCliArgs::parse();

    let config = match GatewayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting wirechat gateway");

    let state = config.auth_token.as_ref().map_or_else(GatewayState::new, |token| {
        GatewayState::with_auth_token(token.clone())
    });

    match gateway::start_server_with_state(&config.bind_addr, Arc::new(state)).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "gateway listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "gateway task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start gateway");
            std::process::exit(1);
        }
    }
}
