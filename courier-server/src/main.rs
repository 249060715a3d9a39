#![cfg_attr(not(test), forbid(unsafe_code))]

//! Main entry point for the Courier server CLI.

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use shared::config::server::Config;
use std::error::Error;
use std::path::PathBuf;

/// Main CLI structure for the Courier server
#[derive(Parser)]
#[command(name = "courier-server")]
#[command(about = "Backend server for the Courier messaging platform", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands for the Courier server CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Start the backend server
    Serve {
        /// The port number to bind the server to (e.g., 5001)
        #[arg(long, short)]
        port: Option<u16>,

        /// Path to the configuration file (config.yaml or config.json)
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

/// Initializes environment variables and returns the parsed CLI.
#[must_use]
pub fn initialize_cli() -> Cli {
    dotenv().ok();
    Cli::parse()
}

/// Handles the serve command by loading configuration and starting the server.
///
/// # Errors
/// Returns an error if configuration loading or server startup fails.
pub async fn handle_serve_command(
    port: Option<u16>,
    config: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    let resolved_config =
        Config::load(config, port).map_err(|err| -> Box<dyn Error> { Box::new(err) })?;
    server::server::run(resolved_config).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = initialize_cli();

    match cli.command {
        Commands::Serve { port, config } => {
            handle_serve_command(port, config).await?;
        }
    }

    Ok(())
}
