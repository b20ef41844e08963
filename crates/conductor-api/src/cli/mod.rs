//! CLI command definitions for the `conductor` binary.

pub mod run;
pub mod validate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use conductor_observe::LogFormat;

/// Run and serve workflow orchestrations.
#[derive(Parser)]
#[command(name = "conductor", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Data directory holding `config.toml` (default: ~/.conductor).
    #[arg(long, global = true, env = "CONDUCTOR_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Log output format: pretty or json.
    #[arg(long, global = true, default_value = "pretty", env = "CONDUCTOR_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "CONDUCTOR_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load a workflow file, run it once and print the result.
    Run {
        /// Workflow definition (.yaml, .yml or .json).
        file: PathBuf,

        /// Run input as inline JSON, or @path to read it from a file.
        #[arg(long, short)]
        input: Option<String>,

        /// Stream run events while the run executes.
        #[arg(long, short)]
        follow: bool,

        /// Correlation id for the run (generated when absent).
        #[arg(long)]
        correlation_id: Option<String>,
    },

    /// Check a workflow file for structural errors.
    Validate {
        /// Workflow definition (.yaml, .yml or .json).
        file: PathBuf,
    },

    /// Start the REST API server.
    Serve {
        /// Interface to bind.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on.
        #[arg(long, short, default_value_t = 3000)]
        port: u16,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
