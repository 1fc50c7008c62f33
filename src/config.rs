// src/config.rs

//! Daemon settings: defaults, optional TOML file, CLI overrides.
//!
//! Precedence, lowest to highest:
//! 1. built-in defaults
//! 2. the settings file passed via `--config` (TOML)
//! 3. individual CLI flags (`--socket-path`, `--state-file`, `--debounce-ms`)

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::errors::{HashError, Result};

/// Resolved, validated daemon settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Unix socket path or Windows pipe name to listen on.
    pub socket_path: String,
    /// File holding persistent watch records.
    pub state_file: PathBuf,
    /// Debounce window for coalescing filesystem events.
    pub debounce: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path().to_string(),
            state_file: default_state_file(),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
        }
    }
}

const DEFAULT_DEBOUNCE_MS: u64 = 75;

/// Raw, all-optional settings as they appear in the TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSettings {
    pub socket_path: Option<String>,
    pub state_file: Option<PathBuf>,
    pub debounce_ms: Option<u64>,
}

/// Load raw settings from a TOML file.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawSettings> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let raw: RawSettings = toml::from_str(&contents)?;
    Ok(raw)
}

/// Merge file settings with CLI overrides and validate the result.
pub fn resolve(
    raw: RawSettings,
    socket_path: Option<String>,
    state_file: Option<PathBuf>,
    debounce_ms: Option<u64>,
) -> Result<Settings> {
    let defaults = Settings::default();

    let debounce_ms = debounce_ms
        .or(raw.debounce_ms)
        .unwrap_or(DEFAULT_DEBOUNCE_MS);
    if debounce_ms == 0 {
        return Err(HashError::Config(
            "debounce_ms must be greater than zero".to_string(),
        ));
    }

    Ok(Settings {
        socket_path: socket_path
            .or(raw.socket_path)
            .unwrap_or(defaults.socket_path),
        state_file: state_file.or(raw.state_file).unwrap_or(defaults.state_file),
        debounce: Duration::from_millis(debounce_ms),
    })
}

/// Default transport endpoint per platform.
pub fn default_socket_path() -> &'static str {
    #[cfg(unix)]
    {
        "/tmp/fs-hasher.sock"
    }
    #[cfg(windows)]
    {
        r"\\.\pipe\fs-hasher"
    }
}

fn default_state_file() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fs-hasher")
        .join("state.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_win_over_file_settings() {
        let raw = RawSettings {
            socket_path: Some("/tmp/from-file.sock".to_string()),
            state_file: None,
            debounce_ms: Some(200),
        };

        let settings = resolve(raw, Some("/tmp/from-cli.sock".to_string()), None, Some(50))
            .expect("settings should resolve");

        assert_eq!(settings.socket_path, "/tmp/from-cli.sock");
        assert_eq!(settings.debounce, Duration::from_millis(50));
    }

    #[test]
    fn zero_debounce_is_rejected() {
        let err = resolve(RawSettings::default(), None, None, Some(0));
        assert!(err.is_err());
    }

    #[test]
    fn defaults_apply_when_nothing_is_given() {
        let settings = resolve(RawSettings::default(), None, None, None).unwrap();
        assert_eq!(settings.debounce, Duration::from_millis(75));
        assert_eq!(settings.socket_path, default_socket_path());
    }
}
