//! Graphcache CLI Binary
//!
//! Command-line front end for inspecting and exercising a graphcache store.

use clap::Parser;
use graphcache::cli::{map_error, Cli, RunContext};
use graphcache::config::ConfigLoader;
use graphcache::logging::{init_logging, LoggingConfig};
use std::process;
use tracing::{error, info};

fn main() {
    let cli = Cli::parse();

    let logging_config = build_logging_config(&cli);
    if let Err(e) = init_logging(Some(&logging_config)) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    info!("graphcache CLI starting");

    let context = match RunContext::new(&cli.workspace, cli.config.as_deref(), cli.store.clone()) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Error opening store: {:#}", e);
            eprintln!("{}", map_error(&e));
            process::exit(1);
        }
    };

    match context.execute(&cli.command) {
        Ok(output) => {
            info!("Command completed successfully");
            println!("{}", output);
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("{}", map_error(&e));
            process::exit(1);
        }
    }
}

/// Logging config from CLI args over the configuration file.
fn build_logging_config(cli: &Cli) -> LoggingConfig {
    // Quiet unless --verbose.
    if !cli.verbose {
        return LoggingConfig {
            level: "off".to_string(),
            ..LoggingConfig::default()
        };
    }

    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path).map(|c| c.logging).unwrap_or_default(),
        None => ConfigLoader::load(&cli.workspace).map(|c| c.logging).unwrap_or_default(),
    };
    if let Some(level) = &cli.log_level {
        config.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.format = format.clone();
    }
    config
}
