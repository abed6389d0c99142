// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use crate::config;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "archiver.toml")]
    pub config: String,

    /// Path to the per-streamer submission metadata YAML
    #[arg(long, default_value = "metadata.yaml")]
    pub metadata: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Starts the archiver service
    Serve,
}

/// Handles the "serve" command: loads configuration, validates it,
/// initializes logging, and runs the service until a shutdown signal.
/// Exits the process on error with status code 1.
#[allow(clippy::disallowed_macros)]
async fn handle_serve_command(cli: &Cli) {
    let config_result = match config::load(&cli.config) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        },
    };

    let _log_guard = match crate::logging::init_logging(&config_result.config.log) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            std::process::exit(1);
        },
    };

    if let Some(missing_file) = &config_result.file_missing {
        warn!(config_path = %missing_file, "config file not found, requiring complete environment overlay");
    }

    if let Err(e) = config_result.config.app_config().validate() {
        error!(error = %e, "configuration failed validation");
        std::process::exit(1);
    }

    let metadata = match config::load_submission_metadata(&cli.metadata) {
        Ok(metadata) => metadata,
        Err(e) => {
            error!(error = %e, "failed to load submission metadata");
            std::process::exit(1);
        },
    };

    info!(
        streamers = config_result.config.streamers.len(),
        database_path = %config_result.config.store.database_path,
        "starting archiver service"
    );

    if let Err(e) = crate::service::run(config_result.config, metadata).await {
        error!(error = %e, "service exited with an error");
        std::process::exit(1);
    }
}

/// Dispatches the parsed CLI. `Serve` is the default when no
/// subcommand is given.
pub async fn handle_command(cli: &Cli) {
    match cli.command.as_ref().unwrap_or(&Commands::Serve) {
        Commands::Serve => handle_serve_command(cli).await,
    }
}
