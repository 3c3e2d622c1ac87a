//! x3-store - entry point
//!
//! CLI-based entry point that dispatches to the store commands.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use common::StoreConfig;
use store_cli::{commands, Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // verbose mode sets debug level
    init_tracing(cli.verbose);

    let config = match StoreConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(code = e.code(), "Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    let result = match cli.command {
        Commands::Migrate(args) => commands::migrate::execute(args, config).await,
        Commands::Seed(args) => commands::seed::execute(args, config).await,
        Commands::List(args) => commands::list::execute(args, config).await,
        Commands::Count => commands::list::count(config).await,
    };

    if let Err(e) = result {
        tracing::error!(code = e.code(), "Command failed: {}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing subscriber
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        "debug".to_string()
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::new(filter))
        .init();
}
