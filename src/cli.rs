// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `ferryman`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "ferryman",
    version,
    about = "Supervise rsync/rclone transfers with retries and durable state.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// A missing file is not an error; built-in defaults are used instead.
    #[arg(long, value_name = "PATH", default_value = "Ferryman.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FERRYMAN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List every job and operation with its status.
    List,

    /// Create an rsync job.
    CreateJob(CreateArgs),

    /// Create an rclone operation.
    CreateOperation {
        /// rclone verb (copy, sync, move, check, delete, ...).
        #[arg(long, value_name = "TYPE", default_value = "copy")]
        operation_type: String,

        /// Dry-run the operation first and hold it for `approve`.
        #[arg(long)]
        preview: bool,

        #[command(flatten)]
        args: CreateArgs,
    },

    /// Start a record and wait until it reaches a terminal state.
    ///
    /// Ctrl-C stops the transfer.
    Run {
        /// Record ID (`job_...` or `rclone_...`).
        id: String,
    },

    /// Start an operation waiting for approval after its preview, then wait.
    Approve { id: String },

    /// Restart every failed record that still has retry budget, then wait.
    RestartFailed,

    /// Mark records that claim to be running but have no live worker as failed.
    Reconcile,

    /// Delete a record.
    Delete { id: String },

    /// Print the per-record transfer log.
    Logs { id: String },
}

#[derive(Debug, Clone, clap::Args)]
pub struct CreateArgs {
    #[arg(long)]
    pub name: String,

    #[arg(long)]
    pub source: String,

    #[arg(long)]
    pub destination: String,

    /// Tool options as a JSON object, e.g. '{"archive": true}'.
    #[arg(long, value_name = "JSON", default_value = "{}")]
    pub options: String,

    /// Exclude pattern; may be repeated.
    #[arg(long = "exclude", value_name = "PATTERN")]
    pub excludes: Vec<String>,

    #[arg(long)]
    pub max_retries: Option<u32>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
