//! KQSP CLI Configuration Management
//!
//! Configuration is resolved in this order, later sources winning:
//! - built-in defaults
//! - a TOML file (`--config`, or `~/.kqsp/config.toml` when it exists)
//! - command line overrides

use std::path::{Path, PathBuf};

use kqsp_core::{LocalIdentity, MeshConfig};
use serde::{Deserialize, Serialize};

use crate::cli::Cli;

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the KQSP CLI application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Mesh runtime configuration
    pub mesh: MeshConfig,

    /// CLI-specific configuration
    pub cli: CliConfig,

    /// Identity configuration
    pub identity: IdentityConfig,
}

/// CLI-specific configuration options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Prompt shown before each input line
    pub prompt: String,

    /// Enable verbose logging output
    pub verbose: bool,

    /// Where received files are written; the working directory if unset
    pub downloads_dir: Option<PathBuf>,
}

/// Identity configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Fixed `K(a.b.c.d)` address; a random one is generated if unset
    pub k_addr: Option<String>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            prompt: "kqsp> ".to_string(),
            verbose: false,
            downloads_dir: None,
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load from an explicit path, else the default path if it exists, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => match Self::default_config_path() {
                Some(default_path) if default_path.is_file() => Self::load_from_file(default_path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileSystem {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// `~/.kqsp/config.toml`
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".kqsp").join("config.toml"))
    }

    /// Save configuration to a specific file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::FileSystem {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string).map_err(|e| ConfigError::FileSystem {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Apply command line arguments on top of the loaded configuration
    pub fn apply_overrides(&mut self, cli: &Cli) -> Result<(), ConfigError> {
        if let Some(port) = cli.port {
            self.mesh.listen.port = port;
        }
        if let Some(host) = &cli.host {
            self.mesh.listen.host = host.clone();
        }
        if cli.verbose {
            self.cli.verbose = true;
        }
        if let Some(identity) = &cli.identity {
            self.identity.k_addr = Some(identity.clone());
        }
        if let Some(dir) = &cli.downloads_dir {
            self.cli.downloads_dir = Some(PathBuf::from(dir));
        }
        self.validate()
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mesh.validate().map_err(ConfigError::Validation)?;
        if let Some(k_addr) = &self.identity.k_addr {
            k_addr
                .parse::<LocalIdentity>()
                .map_err(|e| ConfigError::Validation(e.to_string()))?;
        }
        Ok(())
    }

    /// The configured identity, or a freshly generated one
    pub fn local_identity(&self) -> Result<LocalIdentity, ConfigError> {
        match &self.identity.k_addr {
            Some(k_addr) => k_addr
                .parse()
                .map_err(|e: kqsp_core::MeshError| ConfigError::Validation(e.to_string())),
            None => Ok(LocalIdentity::generate()),
        }
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.cli
            .downloads_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Create example configuration file content
    pub fn example_config() -> String {
        let example = AppConfig {
            cli: CliConfig {
                downloads_dir: Some(PathBuf::from("downloads")),
                ..CliConfig::default()
            },
            identity: IdentityConfig {
                k_addr: Some("K(10.0.0.7)".to_string()),
            },
            ..Default::default()
        };

        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| "# Failed to generate example config".to_string())
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot access {path}: {source}")]
    FileSystem {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
