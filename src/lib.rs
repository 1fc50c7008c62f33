// src/lib.rs

pub mod cli;
pub mod config;
pub mod daemon;
pub mod errors;
pub mod index;
pub mod key;
pub mod logging;
pub mod persist;
pub mod server;
pub mod watch;

use anyhow::Result;
use tracing::info;

use crate::cli::{CliArgs, Command};
use crate::config::RawSettings;
use crate::daemon::Daemon;
use crate::watch::NotifyBackend;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - settings (defaults + optional TOML file + CLI flags)
/// - the daemon state (hash index, watch registry, persistence store)
/// - the invalidator loop
/// - the NDJSON socket server
pub async fn run(args: CliArgs) -> Result<()> {
    let raw = match &args.config {
        Some(path) => config::load_from_path(path)?,
        None => RawSettings::default(),
    };

    match args.command {
        Command::Start {
            socket_path,
            state_file,
            debounce_ms,
        } => {
            let settings = config::resolve(raw, socket_path, state_file, debounce_ms)?;
            info!(
                socket = %settings.socket_path,
                state = %settings.state_file.display(),
                debounce = ?settings.debounce,
                "starting fshasherd"
            );

            let daemon = Daemon::open(NotifyBackend, &settings)?;
            server::run(daemon, &settings.socket_path).await
        }
    }
}
