// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `fshasherd`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "fshasherd",
    version,
    about = "File-hash caching daemon with filesystem watching.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to an optional settings file (TOML).
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FSHASHER_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Start the daemon and listen for connections.
    Start {
        /// Socket path (Unix) or pipe name (Windows).
        #[arg(long, value_name = "PATH")]
        socket_path: Option<String>,

        /// State file used for persistent watch records.
        #[arg(long, value_name = "PATH")]
        state_file: Option<PathBuf>,

        /// Debounce window for filesystem events, in milliseconds.
        #[arg(long, value_name = "MS")]
        debounce_ms: Option<u64>,
    },
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
