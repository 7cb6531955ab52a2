//! mailrotor CLI
//!
//! Manage the outbound SMTP relay set and inspect relay rotation.

mod commands;
mod config;
mod store_factory;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use mailrotor_core::SmtpConfigInput;
use mailrotor_rotation::SmtpRotation;
use mailrotor_store::RelayStore;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::MailrotorConfig;

/// mailrotor: manage and rotate outbound SMTP relays.
#[derive(Parser, Debug)]
#[command(name = "mailrotor", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        env = "MAILROTOR_CONFIG",
        default_value = "mailrotor.toml",
        global = true
    )]
    config: String,

    /// Output format.
    #[arg(long, default_value = "text", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the relay tables for the configured store, then exit.
    Migrate,
    /// Upsert the relays declared in `[[relays]]`.
    Apply,
    #[command(flatten)]
    Relays(commands::relays::RelaysCommand),
}

/// Upsert the relays declared in `[[relays]]`.
async fn seed_relays(rotation: &SmtpRotation, relays: &[SmtpConfigInput]) -> anyhow::Result<()> {
    for input in relays {
        let relay = rotation.upsert_smtp_config(input.clone()).await?;
        tracing::debug!(relay_id = %relay.id, provider = %relay.provider_name, "seeded relay");
    }
    if !relays.is_empty() {
        info!(count = relays.len(), "seeded relays from config");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = MailrotorConfig::load(&cli.config)?;
    let store = store_factory::create_store(&config.store).await?;

    run(&config, store, cli.command, &cli.format).await
}

async fn run(
    config: &MailrotorConfig,
    store: Arc<dyn RelayStore>,
    command: Command,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let rotation = SmtpRotation::new(store);
    match command {
        Command::Migrate => {
            info!(backend = %config.store.backend, "migrations complete");
            println!("Migrations complete.");
            Ok(())
        }
        Command::Apply => {
            seed_relays(&rotation, &config.relays).await?;
            println!("Applied {} relays.", config.relays.len());
            Ok(())
        }
        Command::Relays(command) => {
            // Persistent stores keep operator edits; only `apply` reseeds them.
            if config.store.is_ephemeral() {
                seed_relays(&rotation, &config.relays).await?;
            }
            commands::relays::run(&rotation, &command, format).await
        }
    }
}
