// ABOUTME: Command line argument definitions and parsing using Clap
// ABOUTME: Defines the main CLI structure and subcommands for tokenwatch

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "tokenwatch")]
#[command(about = "Staged trust evaluation for tracked blockchain tokens")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Path to configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Disable colored output")]
    pub no_color: bool,

    #[arg(long, global = true, help = "Directory holding tracked token snapshots")]
    pub store_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a pipeline template without tracking anything
    Validate {
        #[arg(help = "Path to pipeline template YAML file")]
        template: PathBuf,

        #[arg(long, help = "Treat warnings as errors")]
        strict: bool,
    },

    /// Start tracking a token with a pipeline template
    Track {
        #[arg(help = "Path to pipeline template YAML file")]
        template: PathBuf,

        #[arg(long, help = "Chain id the token lives on")]
        chain_id: u64,

        #[arg(long, help = "Token contract address")]
        address: String,
    },

    /// Run one evaluation tick for a tracked token
    Tick {
        #[arg(help = "UUID of the tracked token")]
        uuid: Uuid,

        #[arg(long, help = "YAML fixture file to read token data from")]
        fixtures: Option<PathBuf>,
    },

    /// Print the stored snapshot of a tracked token
    Show {
        #[arg(help = "UUID of the tracked token")]
        uuid: Uuid,

        #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
        format: OutputFormat,
    },

    /// List tracked tokens in the store
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
