//! Error handling for the KQSP CLI

use thiserror::Error;

use crate::config::ConfigError;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Mesh error: {0}")]
    Mesh(#[from] kqsp_core::MeshError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("Event stream already taken")]
    EventStreamUnavailable,
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
