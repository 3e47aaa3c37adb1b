//! # peersync
//!
//! Runs a peersync device: listens for peers, dials configured devices and
//! offers the relay service to connected peers.
//!
//! ## Example
//!
//! ```bash
//! # Print this device's id (creates cert.pem/key.pem on first run)
//! peersync --config peersync.toml id
//!
//! # Run the node
//! peersync --config peersync.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use peersync_node::{node, Config, TlsIdentity};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Peer-to-peer connection node with relay fallback.
#[derive(Parser, Debug)]
#[command(name = "peersync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file; defaults apply when it does not exist
    #[arg(long, short, global = true, default_value = "peersync.toml")]
    config: PathBuf,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the node (default)
    Run,

    /// Print this device's id
    Id,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = if cli.config.exists() {
        Config::from_file(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        tracing::info!("{} not found, using defaults", cli.config.display());
        Config::default()
    };

    let identity = TlsIdentity::load_or_generate(&config.node.cert_path, &config.node.key_path)
        .context("loading device certificate")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Id => {
            println!("{}", identity.device_id());
            Ok(())
        }
        Commands::Run => {
            node::run(config, identity).await?;
            Ok(())
        }
    }
}
