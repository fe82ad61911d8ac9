//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Development fallback for the token-signing secret.
const DEV_JWT_SECRET: &str = "default_secret_change_in_production";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket (axum) server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// Filesystem path of the SQLite database.
    /// Env: `DATABASE_PATH`
    /// Default: `./missive.db`
    pub database_path: PathBuf,

    /// HMAC secret used to sign and verify access tokens.
    /// Env: `JWT_SECRET`
    /// Default: a fixed development-only value (a warning is logged).
    pub jwt_secret: String,

    /// Access-token lifetime in days.
    /// Env: `JWT_EXPIRY_DAYS`
    /// Default: `7`
    pub jwt_expiry_days: i64,

    /// Public base URL prefixed to relative attachment paths in outgoing
    /// message payloads.
    /// Env: `PUBLIC_BASE_URL`
    /// Default: `http://127.0.0.1:3000`
    pub public_base_url: String,

    /// Filesystem path where uploaded attachments are stored.
    /// Env: `UPLOAD_DIR`
    /// Default: `./uploads`
    pub upload_dir: PathBuf,

    /// Maximum attachment size in bytes (25 MiB).
    pub max_attachment_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 3000).into(),
            database_path: PathBuf::from("./missive.db"),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            jwt_expiry_days: 7,
            public_base_url: "http://127.0.0.1:3000".to_string(),
            upload_dir: PathBuf::from("./uploads"),
            max_attachment_size: 25 * 1024 * 1024, // 25 MiB
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(
                    value = %addr,
                    "Invalid HTTP_ADDR, using default"
                );
            }
        }

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        match std::env::var("JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => config.jwt_secret = secret,
            _ => {
                tracing::warn!(
                    "JWT_SECRET not set, tokens are signed with the development default"
                );
            }
        }

        if let Ok(val) = std::env::var("JWT_EXPIRY_DAYS") {
            if let Ok(days) = val.parse::<i64>() {
                config.jwt_expiry_days = days;
            } else {
                tracing::warn!(
                    value = %val,
                    "Invalid JWT_EXPIRY_DAYS, using default"
                );
            }
        }

        if let Ok(url) = std::env::var("PUBLIC_BASE_URL") {
            config.public_base_url = url.trim_end_matches('/').to_string();
        }

        if let Ok(path) = std::env::var("UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(path);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 3000).into());
        assert_eq!(config.jwt_expiry_days, 7);
        assert_eq!(config.database_path, PathBuf::from("./missive.db"));
        assert!(!config.public_base_url.ends_with('/'));
    }
}
