//! intellicat - two-node cat play session daemon
//!
//! Each node watches its play area, runs a motorized lure when a session starts, and
//! coordinates with its peer over a serial link. MAIN dispenses the reward once both
//! nodes have seen the cat come close.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod actuator;
mod cli;
mod commands;
mod config;
mod console;
mod error;
mod hotkeys;
mod link;
mod runtime;
mod vision;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("intellicat=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    // Execute command
    match cli.command {
        Commands::Run(args) => commands::run::execute(args, config_path).await,
        Commands::CheckConfig { json } => commands::check_config::execute(config_path, json).await,
        Commands::InitConfig { path, force } => {
            commands::init_config::execute(path, config_path, force).await
        }
        Commands::Version => {
            println!("intellicat {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
