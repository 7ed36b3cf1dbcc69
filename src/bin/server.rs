//! KV Sync Server
//!
//! Serves the last-write-wins sync endpoint over HTTP.
//!
//! # Configuration
//!
//! Environment variables (override the config file):
//! - `KVSYNC_PORT`: Port to listen on (default: 8080)
//! - `KVSYNC_DATA_DIR`: Directory for the file store (default: ~/.local/share/kvsync)
//! - `KVSYNC_SECRET`: Shared secret. If unset the server still starts but
//!   answers authenticated routes with 503.
//! - `KVSYNC_STORE`: `file` or `memory`
//! - `KVSYNC_AUTH_SCHEME`: `derived` (bearer token) or `plain` (raw secret header)
//! - `KVSYNC_TIE_POLICY`: `stored-wins` or `incoming-wins`
//! - `KVSYNC_CONFIG`: Path to config file (default: ~/.config/kvsync/config.yaml)
//!
//! # Config File Format
//!
//! ```yaml
//! port: 8080
//! store: file
//! data_dir: /var/lib/kvsync
//! secret: "your-secret-here"
//! auth_scheme: derived
//! tie_policy: stored-wins
//! resources:
//!   rules: kvsync-rules
//!   setting: kvsync-setting
//! share_key: kvsync-rules-share
//! ```
//!
//! # Endpoints
//!
//! - `GET /health`: Health check (no auth)
//! - `POST /sync`: Merge a `{key, value, updateAt}` record
//! - `POST /<resource>`: Merge a `{value, updateAt}` record into a named resource
//! - `GET /share?psk=<token>`: Read-only export of the share key

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kvsync::config::{ServerConfig, StoreBackend};
use kvsync::server::{router, AppState};

#[derive(Parser)]
#[command(name = "kvsync-server")]
#[command(version)]
#[command(about = "Last-write-wins key/value sync server")]
struct Cli {
    /// Path to config file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config and environment)
    #[arg(long, short)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kvsync=info,kvsync_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = ServerConfig::load(cli.config)?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    match config.store {
        StoreBackend::File => {
            std::fs::create_dir_all(&config.data_dir)?;
            tracing::info!("File store at {}", config.data_dir.display());
        }
        StoreBackend::Memory => tracing::info!("In-memory store, data will not survive restart"),
    }

    if config.secret.is_none() {
        tracing::warn!("No shared secret configured - authenticated routes will answer 503");
    }
    tracing::info!(
        "Auth scheme: {:?}, tie policy: {:?}",
        config.auth_scheme,
        config.tie_policy
    );
    for (name, key) in &config.resources {
        tracing::info!("Resource /{} -> {}", name, key);
    }

    let state = AppState::from_config(&config)?;
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
