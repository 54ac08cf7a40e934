//! # Nixopus API Main Entry Point
//!
//! Serves the control plane by default; `migrate` manages the schema.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nixopus::{
    config::{AppConfig, ConfigLoader},
    db,
    migration::Migrator,
    server::run_server,
    telemetry::init_tracing,
};

#[derive(Parser)]
#[command(name = "nixopus-api")]
#[command(version, about = "Nixopus control plane API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API (default)
    Serve,
    /// Apply, roll back or inspect schema migrations
    Migrate {
        #[command(subcommand)]
        command: MigrateCommands,
    },
}

#[derive(Subcommand)]
enum MigrateCommands {
    /// Apply every pending migration
    Up,
    /// Roll back the most recent migration
    Down,
    /// Move the schema to a named (or numbered) migration
    To { name: String },
    /// List known migrations and whether each is applied
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::new().load().context("loading configuration")?;
    init_tracing(&config)?;

    tracing::info!(profile = %config.profile, "loaded configuration");
    if let Ok(redacted) = config.redacted_json() {
        tracing::debug!(config = %redacted, "effective configuration");
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server(config).await,
        Commands::Migrate { command } => migrate(&config, command).await,
    }
}

async fn migrate(config: &AppConfig, command: MigrateCommands) -> Result<()> {
    let db = db::init_pool(config)
        .await
        .context("initializing database connection pool")?;
    let migrator = Migrator::from_dir(&config.migrations_dir)
        .with_context(|| format!("loading migrations from {}", config.migrations_dir))?;

    match command {
        MigrateCommands::Up => {
            let applied = migrator.up(&db).await?;
            if applied.is_empty() {
                println!("Schema is up to date");
            }
            for name in applied {
                println!("Applied {name}");
            }
        }
        MigrateCommands::Down => match migrator.down(&db).await? {
            Some(name) => println!("Rolled back {name}"),
            None => println!("Nothing to roll back"),
        },
        MigrateCommands::To { name } => {
            for touched in migrator.to(&db, &name).await? {
                println!("Migrated {touched}");
            }
        }
        MigrateCommands::Status => {
            for status in migrator.status(&db).await? {
                let mark = if status.applied { "applied" } else { "pending" };
                println!("{:>6}  {:<8} {}", status.id, mark, status.name);
            }
        }
    }
    Ok(())
}
