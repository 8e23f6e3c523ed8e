//! CallGuard License Server
//!
//! Issues licenses to operators and answers activation and heartbeat
//! requests from validators embedded in customer installations.
//!
//! Usage:
//!   CALLGUARD_ADMIN_TOKEN=... callguard-server --listen 0.0.0.0:8443 --database licenses.db

use anyhow::{Context, Result};
use callguard_license::SystemClock;
use callguard_server::{build_router, AdminToken, AppState};
use callguard_store::LicenseStore;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Shortest admin token accepted at startup.
const MIN_ADMIN_TOKEN_LEN: usize = 16;

#[derive(Parser, Debug)]
#[command(name = "callguard-server")]
#[command(about = "CallGuard license server")]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:8443")]
    listen: SocketAddr,

    /// Path to the SQLite license database
    #[arg(short, long, default_value = "callguard-licenses.db")]
    database: PathBuf,

    /// Bearer token required on operator endpoints
    #[arg(long, env = "CALLGUARD_ADMIN_TOKEN", hide_env_values = true)]
    admin_token: String,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    anyhow::ensure!(
        args.admin_token.trim().len() >= MIN_ADMIN_TOKEN_LEN,
        "admin token must be at least {MIN_ADMIN_TOKEN_LEN} characters"
    );

    info!("CallGuard license server starting...");
    let store = LicenseStore::open(&args.database, Arc::new(SystemClock))
        .with_context(|| format!("failed to open license database {}", args.database.display()))?;
    let stats = store.stats().context("failed to read license statistics")?;
    info!(
        database = %args.database.display(),
        total = stats.total,
        active = stats.active,
        "license database opened"
    );

    let app = build_router(AppState::new(store, AdminToken::new(args.admin_token.trim())));
    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;

    println!("\n========================================");
    println!("  CallGuard License Server Running");
    println!("========================================");
    println!("  Listening: {}", args.listen);
    println!("  Database:  {}", args.database.display());
    println!("========================================\n");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("CallGuard license server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
