//! passwd-cached - Main entry point.
//!
//! Runs the credential server behind a Unix socket. Clients send checks and
//! queries as newline-delimited JSON; queries that need the user are answered
//! through terminal dialogs on the daemon's controlling terminal.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};

use passwd_cache_core::{Config, SecretStore, SocketProvider};
use passwd_cached::prompt::CliInteraction;
use passwd_cached::{Daemon, ManualSocketProvider, MemorySecretStore, PasswdServer, ServerSettings};

use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Credential caching and request arbitration daemon.
#[derive(Parser)]
#[command(name = "passwd-cached")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file [default: ~/.config/passwd-cache/config.toml]
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Path to Unix socket [default: $XDG_RUNTIME_DIR/passwd-cache/socket]
    #[arg(short, long, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// Remember kept passwords for the lifetime of the daemon
    #[arg(long)]
    memory_store: bool,

    /// Increase log verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only show errors
    #[arg(short, long)]
    quiet: bool,
}

fn setup_logging(level: &str) {
    // RUST_LOG overrides the CLI flags
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // JOURNAL_STREAM is set when stdout/stderr go to the journal
    if std::env::var("JOURNAL_STREAM").is_ok() {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(journald_layer)
                .with(filter)
                .init();
            return;
        }
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration from specified path");
            Config::load_from(path).context("Failed to load configuration")
        }
        None => {
            let config = Config::load().context("Failed to load configuration")?;
            if let Some(path) = Config::default_path() {
                if path.exists() {
                    info!(path = %path.display(), "Loaded configuration");
                } else {
                    debug!("No config file found, using defaults");
                }
            }
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    setup_logging(log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting passwd-cached"
    );

    let config = load_config(cli.config.as_ref())?;

    let store: Option<Arc<dyn SecretStore>> = if cli.memory_store {
        info!("Using in-memory secret store");
        Some(Arc::new(MemorySecretStore::new()))
    } else {
        None
    };
    let (server, server_task) = PasswdServer::spawn(
        Arc::new(CliInteraction::new()),
        store,
        ServerSettings::from(&config),
    );

    let provider = match &cli.socket {
        Some(path) => ManualSocketProvider::new(path),
        None => ManualSocketProvider::default(),
    };
    let socket_path = provider.socket_path().map(|p| p.to_path_buf());
    if let Some(path) = &socket_path {
        info!(path = %path.display(), "Socket path");
    }

    let daemon = Daemon::new(provider, server);

    info!("Daemon starting...");
    let result = tokio::select! {
        result = daemon.run() => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
            Ok(())
        }
    };

    // Open connections may still hold server handles.
    server_task.abort();
    if let Some(path) = socket_path {
        if let Err(e) = std::fs::remove_file(&path) {
            debug!(path = %path.display(), error = %e, "Could not remove socket");
        }
    }

    if let Err(e) = &result {
        error!(error = %e, "Daemon error");
    }
    result
}
