//! Main entry point for the faucet gate.

use anyhow::Result;
use clap::{Arg, Command};
use faucet_gate::{config::GateConfig, http::start_server};
use std::path::Path;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let matches = Command::new("faucet-gate")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Faucet Gate Team")
        .about("Faucet Gate - daily quota and eligibility checks in front of token transfers")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to configuration file")
                .default_value("faucet-gate.toml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .help("Generate a default configuration file and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("faucet-gate.toml");

    if matches.get_flag("generate-config") {
        return generate_config(config_path);
    }

    info!("Starting Faucet Gate v{}", env!("CARGO_PKG_VERSION"));
    info!("Loading configuration from: {}", config_path);

    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            error!("Use --generate-config to create a default configuration file");
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    info!("Configuration loaded and validated successfully");
    info!("Server will bind to: {}:{}", config.http.bind_address, config.http.port);
    info!(
        "Daily limits: {} per identity, {} per destination (day starts at {} midnight)",
        config.quota.daily_limit_per_identity,
        config.quota.daily_limit_per_destination,
        config.quota.window_timezone_or_offset
    );
    info!("Storage backend: {:?}", config.storage.backend);
    if config.transfer.enabled {
        info!("Transfer RPC: {}", config.transfer.rpc_url);
    }
    if config.scorer.enabled {
        info!("Scorer API: {} (min score {})", config.scorer.api_url, config.scorer.min_score);
    }

    if let Err(e) = start_server(&config).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Load configuration from file
fn load_config(path: &str) -> Result<GateConfig> {
    if !Path::new(path).exists() {
        return Err(anyhow::anyhow!(
            "Configuration file '{}' not found. Use --generate-config to create one.",
            path
        ));
    }

    GateConfig::from_file(path).map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))
}

/// Generate a default configuration file
fn generate_config(path: &str) -> Result<()> {
    let config = GateConfig::default();

    config.save_to_file(path)?;

    println!("Generated default configuration file: {}", path);
    println!();
    println!("Review the configuration before running the gate:");
    println!("1. Set the daily limits and the day boundary offset (quota section)");
    println!("2. Choose a storage backend and path (storage section)");
    println!("3. To serve /faucet/claim, enable transfers and set the faucet key (transfer section)");
    println!("4. To require a minimum identity score, configure the scorer (scorer section)");
    println!();
    println!("Example usage after configuration:");
    println!("  cargo run --bin faucet-gate -- --config {}", path);

    Ok(())
}
