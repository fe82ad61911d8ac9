//! # missive-server
//!
//! Presence-aware direct-messaging backend.
//!
//! This binary provides:
//! - **Live messaging channel** (axum WebSocket): one session task per
//!   connection, delivering messages, typing indicators and presence
//!   transitions in real time
//! - **Presence registry** mapping each user to at most one live
//!   connection, last-connect-wins
//! - **REST API** (axum) for registration, login, user discovery,
//!   conversation history, read receipts and unread counts
//! - **Attachment storage** for files referenced by messages
//! - **SQLite persistence** as the durable channel: every message is stored
//!   before any live push

mod api;
mod attachments;
mod auth;
mod config;
mod error;
mod presence;
mod registry;
mod router;
mod session;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use missive_store::{ChatStore, Database, SqliteStore};

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,missive_server=debug")),
        )
        .init();

    info!("Starting missive server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        http_addr = %config.http_addr,
        database = %config.database_path.display(),
        public_base_url = %config.public_base_url,
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Open the store (creates the database file if missing)
    // -----------------------------------------------------------------------
    let database = Database::open_at(&config.database_path)?;
    let store: Arc<dyn ChatStore> = Arc::new(SqliteStore::new(database));

    // -----------------------------------------------------------------------
    // 4. Wire up the realtime core and attachment storage
    // -----------------------------------------------------------------------
    let http_addr = config.http_addr;
    let app_state = AppState::new(config, store).await?;

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    // tokio::select! ensures that if either the server or a shutdown signal
    // arrives, we exit cleanly.
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
