use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use viewcounter::analytics::AggregationEngine;
use viewcounter::config::Config;
use viewcounter::privacy::{try_mask, MaskedIp};
use viewcounter::{provision, storage};

#[derive(Parser)]
#[command(name = "viewcounter-admin")]
#[command(about = "View counter maintenance CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create every allowed tenant relation and record the schema version
    Provision,
    /// Print the summary statistics of one tenant as JSON
    Stats {
        /// Tenant (app) id from the allow-list
        app_id: String,
    },
    /// Show how an address would be stored
    Mask {
        address: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    if let Commands::Mask { address } = &cli.command {
        let masked = MaskedIp::from_raw(address, config.privacy.unrecognized_ip_policy);
        if try_mask(address).is_none() {
            println!("⚠ '{}' is not an IPv4/IPv6 address, stored as '{}'", address, masked);
        } else {
            println!("{}", masked);
        }
        return Ok(());
    }

    let tenants = Arc::new(config.allowed.tenant_registry()?);
    let storage = storage::connect(&config.database).await?;

    // Every command below needs provisioned relations.
    let report = provision::initialize(storage.as_ref(), &tenants).await?;

    match cli.command {
        Commands::Provision => {
            println!("✓ Provisioned {} tenant(s):", report.tenants.len());
            for tenant in &report.tenants {
                println!("  - {}", tenant);
            }
            let versions = storage.applied_versions().await?;
            println!("Applied schema versions: {}", versions.join(", "));
        }
        Commands::Stats { app_id } => {
            let engine = AggregationEngine::new(Arc::clone(&storage), Arc::clone(&tenants));
            let stats = engine
                .get_stats(&app_id)
                .await
                .with_context(|| format!("failed to read stats for '{}'", app_id))?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Mask { .. } => {}
    }

    storage.close().await;
    Ok(())
}
