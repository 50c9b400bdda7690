//! Tollgate - token-authenticated HTTP from the command line
//!
//! Main entry point for the Tollgate CLI.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tollgate_client::ClientConfig;

mod commands;

use commands::{login, logout, request, status};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Tollgate - token-authenticated HTTP client
#[derive(Parser)]
#[command(name = "tollgate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Path to a TOML configuration file
    #[arg(long, global = true, env = "TOLLGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// API base URL (overrides the configuration file)
    #[arg(long, global = true, env = "TOLLGATE_BASE_URL")]
    pub base_url: Option<String>,

    /// Directory for stored tokens and logs
    #[arg(long, global = true, env = "TOLLGATE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log in and store the issued tokens
    Login(login::LoginArgs),

    /// Remove stored tokens
    Logout(logout::LogoutArgs),

    /// Show stored token status
    Status(status::StatusArgs),

    /// Send an authenticated request
    Request(request::RequestArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(url) = cli.base_url {
        config = config.with_base_url(url);
    }
    if let Some(dir) = cli.data_dir {
        config = config.with_storage_dir(dir);
    }

    // Initialize tracing: console (human-readable, stderr) + rotating JSON file
    let filter = if cli.verbose {
        "tollgate=debug,tollgate_client=debug,info"
    } else {
        "tollgate=info,tollgate_client=warn,warn"
    };

    let log_dir = config
        .storage
        .resolve_dir()
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "tollgate.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "tollgate=trace,tollgate_client=trace,info",
                )),
        )
        .init();

    if let Some(path) = &cli.config {
        tracing::debug!(path = %path.display(), "loaded configuration");
    }

    // Create context for commands
    let ctx = commands::Context {
        config,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    // Dispatch to command handlers
    match cli.command {
        Commands::Login(args) => login::run(args, &ctx).await,
        Commands::Logout(args) => logout::run(args, &ctx).await,
        Commands::Status(args) => status::run(args, &ctx).await,
        Commands::Request(args) => request::run(args, &ctx).await,
    }
}
