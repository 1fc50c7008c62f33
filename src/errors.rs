// src/errors.rs

//! Crate-wide error taxonomy.
//!
//! Every per-request failure is recoverable: it is reported on the response
//! stream and never terminates a connection or corrupts shared cache state.
//! Only socket bind and persistence-store open failures abort startup, and
//! those travel as `anyhow` errors through the bootstrap path.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HashError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Root or path does not exist: {0}")]
    NotFound(PathBuf),

    #[error("No files matched the glob pattern")]
    NoMatch,

    #[error("Invalid glob pattern: {0}")]
    InvalidGlob(#[from] globset::Error),

    #[error("Failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to arm watch: {0}")]
    Watch(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, HashError>;
