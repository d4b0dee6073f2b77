//! KQSP CLI library
//!
//! Components of the `kqsp` interactive client: argument parsing, TOML
//! configuration, the command parser and the chat loop.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use app::ChatApp;
pub use cli::Cli;
pub use commands::ReplCommand;
pub use config::{AppConfig, ConfigError};
pub use error::{CliError, Result};
