//! # lexbridge-server
//!
//! Matching and messaging server for LexBridge.
//!
//! This binary provides:
//! - **Case matching**: lawyer offers and citizen requests, resolved with
//!   exactly one assignment per case
//! - **Direct connections** between a citizen and a lawyer outside any case
//! - **Session gateway** over WebSocket: channel rooms, ordered message
//!   delivery, read receipts, presence, typing and call signaling relay
//! - **REST API** (axum) for the case and connection workflows and message
//!   history
//! - **Rate limiting** per user for chat messages and per IP for HTTP

mod api;
mod config;
mod error;
mod gateway;
mod identity;
mod notifier;
mod rate_limit;
mod rooms;
mod ws;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;
use tracing_subscriber::EnvFilter;

use lexbridge_cases::{ConnectionDesk, EventPublisher, Matcher};
use lexbridge_store::{Database, StoreHandle};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::gateway::Gateway;
use crate::identity::TokenVerifier;
use crate::rate_limit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,lexbridge_server=debug")),
        )
        .init();

    info!("Starting LexBridge server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    info!(
        instance = %config.instance_name,
        admin_enabled = config.admin_token.is_some(),
        issuer_configured = config.auth_server_pubkey != [0u8; 32],
        "Instance settings"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // SQLite store (creates the data directory and runs migrations)
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    info!(path = ?db.path(), "Database ready");
    let store = StoreHandle::new(db, config.store_timeout);

    // Domain events flow from the matcher and the desk to the notifier
    let (events, event_rx) = EventPublisher::channel();
    let matcher =
        Matcher::new(store.clone(), events.clone()).with_max_retries(config.max_conflict_retries);
    let desk = ConnectionDesk::new(store.clone(), events).with_max_retries(config.max_conflict_retries);

    let verifier = Arc::new(TokenVerifier::new(config.auth_server_pubkey));
    let message_limiter = RateLimiter::new(config.message_rate_capacity, config.message_rate_window);
    let gateway = Gateway::new(verifier, store.clone(), message_limiter);

    let http_limiter = RateLimiter::new(config.http_rate_capacity, config.http_rate_window);

    let app_state = AppState {
        gateway: gateway.clone(),
        matcher,
        desk,
        store,
        http_limiter: http_limiter.clone(),
        config: Arc::new(config.clone()),
        started_at: Instant::now(),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    let _notifier = notifier::spawn_notifier(gateway.clone(), event_rx);

    // Periodic limiter and append-lock cleanup (every minute)
    let gw = gateway.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            gw.purge().await;
        }
    });

    // Periodic HTTP limiter cleanup (every 5 minutes)
    let rl = http_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale().await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let http_addr = config.http_addr;
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
