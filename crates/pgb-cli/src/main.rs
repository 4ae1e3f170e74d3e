//! pgboundary CLI
//!
//! Opens HashiCorp Boundary tunnels to PostgreSQL targets and serves them
//! through a local PgBouncer:
//! - `connect` starts a tunnel and adds it to PgBouncer
//! - `shutdown` removes one connection, or everything
//! - `list` and `status` report what is configured and running

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pgb_core::{Config, Reconciler};
use pgboundary::commands;
use pgboundary::host_reconciler;

#[derive(Parser)]
#[command(name = "pgboundary")]
#[command(author, version, about = "Boundary tunnels served through PgBouncer")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "PGBOUNDARY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a Boundary target and add it to PgBouncer
    Connect {
        /// Target name from the configuration
        target: String,
    },

    /// Shut down one connection, or all connections and PgBouncer
    Shutdown {
        /// Connection to shut down (all if omitted)
        connection: Option<String>,
    },

    /// List active connections and available targets
    List,

    /// Show PgBouncer and tunnel status
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the config file in use
    Show,
    /// Show the config file path
    Path,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Connect { target } => commands::connect_command(&reconciler(config_path)?, &target),
        Commands::Shutdown { connection } => {
            commands::shutdown_command(&reconciler(config_path)?, connection.as_deref())
        }
        Commands::List => commands::list_command(&reconciler(config_path)?, cli.verbose > 0),
        Commands::Status => commands::status_command(&reconciler(config_path)?),
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(config_path),
            ConfigAction::Path => commands::config_path(config_path),
        },
    }
}

fn reconciler(config_path: Option<&Path>) -> Result<Reconciler> {
    let config = Config::discover(config_path).context("Failed to load configuration")?;
    tracing::debug!("Loaded configuration from {:?}", config.source);
    Ok(host_reconciler(config))
}
