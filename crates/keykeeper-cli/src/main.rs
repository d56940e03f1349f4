//! Keykeeper - main entry point
//!
//! Runs the central synchronization daemon and administers the credential
//! database.

mod config;
mod provisioner;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use keykeeper_serial::{LogAuthenticationHandler, Supervisor, Synchronizer, TracingStatusSink};
use keykeeper_storage::CredentialStore;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use crate::config::Config;
use crate::provisioner::ManualProvisioner;

#[derive(Parser)]
#[command(name = "keykeeper")]
#[command(about = "BLE door access central and credential manager")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "keykeeper.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Database password; an empty password stores the database unencrypted
    #[arg(long, env = "KEYKEEPER_PASSWORD", default_value = "", hide_env_values = true)]
    password: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Keep the central in sync with the database and follow its events
    Run,
    /// Manage coins
    Coin {
        #[command(subcommand)]
        command: CoinCommands,
    },
    /// Manage the central identity
    Identity {
        #[command(subcommand)]
        command: IdentityCommands,
    },
}

#[derive(Subcommand)]
enum CoinCommands {
    /// Generate and program a coin for a new user
    Add { name: String },
    /// Remove a user's coin
    Remove { name: String },
    /// List enrolled coins
    List,
}

#[derive(Subcommand)]
enum IdentityCommands {
    /// Replace the central identity; every coin must be re-bonded afterwards
    Regenerate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Keykeeper v{}", env!("CARGO_PKG_VERSION"));

    let config = config::load_config(&cli.config)?;
    let password = Zeroizing::new(cli.password);
    let store = CredentialStore::open(&config.database.path, password.as_str())
        .await
        .with_context(|| format!("opening {}", config.database.path.display()))?;

    match cli.command {
        Commands::Run => run(config, store).await,
        Commands::Coin { command } => match command {
            CoinCommands::Add { name } => add_coin(&store, &name).await,
            CoinCommands::Remove { name } => remove_coin(&store, &name).await,
            CoinCommands::List => list_coins(&store).await,
        },
        Commands::Identity {
            command: IdentityCommands::Regenerate,
        } => regenerate_identity(&store).await,
    }
}

async fn run(config: Config, store: CredentialStore) -> Result<()> {
    info!(
        device = %config.serial.device.display(),
        baud_rate = config.serial.baud_rate,
        coins = store.read().await.len(),
        "Starting central synchronization"
    );

    let synchronizer = Synchronizer::new(Arc::new(store), TracingStatusSink, LogAuthenticationHandler)
        .sentinel_timeout(config.serial.sentinel_timeout());

    let shutdown = CancellationToken::new();
    let mut supervisor = Supervisor::new(config.serial.port(), synchronizer, shutdown.clone())
        .reconnect_delay(config.serial.reconnect_delay());

    let signals = tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(err) => tracing::error!(error = %err, "Cannot listen for shutdown signals"),
        }
        shutdown.cancel();
    });

    supervisor.run().await;
    signals.abort();
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

async fn add_coin(store: &CredentialStore, name: &str) -> Result<()> {
    let coin = store.enroll(name, &ManualProvisioner::stdio()).await?;
    println!("Enrolled {name} with coin {}", coin.address);
    println!("Restart the daemon to push the coin to the central.");
    Ok(())
}

async fn remove_coin(store: &CredentialStore, name: &str) -> Result<()> {
    match store.remove_coin(name).await? {
        Some(coin) => {
            println!("Removed {name} (coin {})", coin.address);
            Ok(())
        }
        None => bail!("no coin is enrolled for {name}"),
    }
}

async fn list_coins(store: &CredentialStore) -> Result<()> {
    let db = store.read().await;
    println!("Central {}", db.identity().address);
    if db.is_empty() {
        println!("No coins enrolled");
    }
    for (name, address) in db.names() {
        println!("  {name:<24} {address}");
    }
    Ok(())
}

async fn regenerate_identity(store: &CredentialStore) -> Result<()> {
    let identity = store.regenerate_identity().await?;
    println!("New central identity {}", identity.address);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_coin_add_parses_name_and_global_options() {
        let cli = Cli::try_parse_from([
            "keykeeper",
            "--config",
            "/etc/keykeeper.toml",
            "--password",
            "hunter2",
            "coin",
            "add",
            "Paul",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("/etc/keykeeper.toml"));
        assert_eq!(cli.password, "hunter2");
        assert!(matches!(
            cli.command,
            Commands::Coin {
                command: CoinCommands::Add { ref name }
            } if name == "Paul"
        ));
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Cli::try_parse_from(["keykeeper"]).is_err());
    }
}
