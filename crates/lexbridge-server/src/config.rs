//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use lexbridge_shared::constants::{
    APP_NAME, DEFAULT_HTTP_PORT, MAX_CONFLICT_RETRIES, MESSAGE_RATE_CAPACITY,
    MESSAGE_RATE_WINDOW_SECS, STORE_TIMEOUT_MS,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `None`, meaning the platform data directory.
    pub database_path: Option<PathBuf>,

    /// Ed25519 public key of the identity token issuer (hex-encoded, 64 chars).
    /// Env: `AUTH_SERVER_PUBKEY`
    /// Default: all-zeros, which no token verifies against.
    pub auth_server_pubkey: [u8; 32],

    /// Human-readable name for this instance.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,

    /// Admin API bearer token. Required to access /admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// Chat messages a user may send per window.
    /// Env: `MESSAGE_RATE_CAPACITY` / `MESSAGE_RATE_WINDOW_SECS`
    pub message_rate_capacity: u32,
    pub message_rate_window: Duration,

    /// HTTP requests a client IP may make per window.
    /// Env: `HTTP_RATE_CAPACITY` / `HTTP_RATE_WINDOW_SECS`
    pub http_rate_capacity: u32,
    pub http_rate_window: Duration,

    /// Upper bound on a single persistence call.
    /// Env: `STORE_TIMEOUT_MS`
    pub store_timeout: Duration,

    /// Re-read/modify/write attempts after a version conflict.
    /// Env: `MAX_CONFLICT_RETRIES`
    pub max_conflict_retries: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            auth_server_pubkey: [0u8; 32],
            instance_name: APP_NAME.to_string(),
            admin_token: None,
            message_rate_capacity: MESSAGE_RATE_CAPACITY,
            message_rate_window: Duration::from_secs(MESSAGE_RATE_WINDOW_SECS),
            http_rate_capacity: 120,
            http_rate_window: Duration::from_secs(60),
            store_timeout: Duration::from_millis(STORE_TIMEOUT_MS),
            max_conflict_retries: MAX_CONFLICT_RETRIES,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = get("HTTP_ADDR") {
            parse_into(&mut config.http_addr, "HTTP_ADDR", &addr);
        }

        if let Some(path) = get("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(hex_key) = get("AUTH_SERVER_PUBKEY") {
            match parse_hex_pubkey(&hex_key) {
                Ok(key) => config.auth_server_pubkey = key,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid AUTH_SERVER_PUBKEY, no credential will verify"
                    );
                }
            }
        }

        if let Some(name) = get("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(token) = get("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Some(val) = get("MESSAGE_RATE_CAPACITY") {
            parse_into(&mut config.message_rate_capacity, "MESSAGE_RATE_CAPACITY", &val);
        }
        if let Some(val) = get("MESSAGE_RATE_WINDOW_SECS") {
            parse_secs(&mut config.message_rate_window, "MESSAGE_RATE_WINDOW_SECS", &val);
        }
        if let Some(val) = get("HTTP_RATE_CAPACITY") {
            parse_into(&mut config.http_rate_capacity, "HTTP_RATE_CAPACITY", &val);
        }
        if let Some(val) = get("HTTP_RATE_WINDOW_SECS") {
            parse_secs(&mut config.http_rate_window, "HTTP_RATE_WINDOW_SECS", &val);
        }

        if let Some(val) = get("STORE_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(ms) if ms > 0 => config.store_timeout = Duration::from_millis(ms),
                _ => tracing::warn!(value = %val, "Invalid STORE_TIMEOUT_MS, using default"),
            }
        }

        if let Some(val) = get("MAX_CONFLICT_RETRIES") {
            parse_into(&mut config.max_conflict_retries, "MAX_CONFLICT_RETRIES", &val);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_into<T: FromStr>(slot: &mut T, key: &str, value: &str) {
    match value.trim().parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => tracing::warn!(key, value = %value, "Invalid value, using default"),
    }
}

fn parse_secs(slot: &mut Duration, key: &str, value: &str) {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => *slot = Duration::from_secs(secs),
        _ => tracing::warn!(key, value = %value, "Invalid window, using default"),
    }
}

/// Parse a 64-character hex string into a 32-byte array.
fn parse_hex_pubkey(hex: &str) -> Result<[u8; 32], String> {
    let hex = hex.trim();
    if hex.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", hex.len()));
    }
    let bytes = hex::decode(hex).map_err(|e| format!("invalid hex: {e}"))?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}
