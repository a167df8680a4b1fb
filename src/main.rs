use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use ripple_core::auth::JwtValidator;
use ripple_server::{AppState, ServerConfig};
use ripple_store::notifications::NotificationRepo;
use ripple_store::typing::SqliteTypingStore;
use ripple_store::users::SqliteIdentityLookup;
use ripple_store::Database;

#[derive(Parser, Debug)]
#[command(name = "ripple", about = "Real-time chat and notification relay")]
struct Args {
    /// Port to listen on
    #[arg(long, default_value_t = 9400)]
    port: u16,

    /// SQLite database path
    #[arg(long, default_value = "ripple.db")]
    db: PathBuf,

    /// Shared secret for validating bearer tokens
    /// (falls back to RIPPLE_JWT_SECRET)
    #[arg(long)]
    jwt_secret: Option<String>,

    /// Re-validate connection credentials on this interval, in seconds.
    /// Omit to keep the handshake-time decision for the connection's life.
    #[arg(long)]
    recheck_secs: Option<u64>,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let Some(secret) = args
        .jwt_secret
        .or_else(|| std::env::var("RIPPLE_JWT_SECRET").ok())
    else {
        tracing::error!("no JWT secret provided (--jwt-secret or RIPPLE_JWT_SECRET)");
        std::process::exit(1);
    };

    tracing::info!("starting ripple relay");

    let db = match Database::open(&args.db) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(path = %args.db.display(), error = %e, "failed to open database");
            std::process::exit(1);
        }
    };

    let config = ServerConfig {
        port: args.port,
        credential_recheck: args.recheck_secs.map(Duration::from_secs),
        ..Default::default()
    };

    // The SQLite-backed typing store keeps presence readable across
    // processes; the REST layer reads it through /internal.
    let state = AppState::new(
        config,
        Arc::new(JwtValidator::new(&secret)),
        Arc::new(SqliteIdentityLookup::new(db.clone())),
        Arc::new(SqliteTypingStore::new(db.clone())),
        NotificationRepo::new(db),
    );

    let handle = match ripple_server::start(state).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    };

    tracing::info!(port = handle.port, "ripple relay ready");

    // Wait for shutdown signal
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl+c");
    }

    tracing::info!("shutting down");
}
