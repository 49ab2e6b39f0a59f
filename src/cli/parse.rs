//! CLI parse: clap types for graphcache. No behavior; definitions only.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Graphcache CLI - inspect and exercise an object-graph store
#[derive(Parser)]
#[command(name = "graphcache")]
#[command(about = "Aggregate-aware object-graph cache over an embedded store")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory (searched for config/*.toml)
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Store directory (overrides storage.path)
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the edit-type closure of an entity type
    Closure {
        /// Entity type key, e.g. MonsterDefinition
        entity_type: String,
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Write a sample game configuration into the store
    Seed {
        /// Configuration name
        #[arg(long, default_value = "Season 6")]
        name: String,
        /// Number of monster definitions to create
        #[arg(long, default_value = "5")]
        monsters: usize,
    },
    /// Row counts per type, optionally warming the aggregate caches
    Stats {
        /// Populate the cache of every aggregate root and report sizes
        #[arg(long)]
        warm: bool,
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Print stored rows of one type as JSON
    Show {
        /// Entity type key
        entity_type: String,
        /// Only this entity id (UUID)
        id: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_global_and_subcommand_args() {
        let cli = Cli::try_parse_from([
            "graphcache",
            "--store",
            "/tmp/gc",
            "stats",
            "--warm",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.store, Some(PathBuf::from("/tmp/gc")));
        assert!(matches!(
            cli.command,
            Commands::Stats {
                warm: true,
                format: OutputFormat::Json
            }
        ));
    }

    #[test]
    fn test_show_id_is_optional() {
        let cli = Cli::try_parse_from(["graphcache", "show", "Account"]).unwrap();
        assert!(matches!(cli.command, Commands::Show { id: None, .. }));
        assert!(Cli::try_parse_from(["graphcache", "show"]).is_err());
    }
}
