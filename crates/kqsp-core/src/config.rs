//! Centralized Configuration Management
//!
//! This module consolidates the configuration structures used by the KQSP core
//! and runtime. All structures are serde-serializable so the CLI can load them
//! from TOML.

use core::time::Duration;

use serde::{Deserialize, Serialize};

/// Documented default listening port
pub const DEFAULT_PORT: u16 = 61757;

/// Default bound for a single frame's payload (1 MiB)
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

// ----------------------------------------------------------------------------
// Listener Configuration
// ----------------------------------------------------------------------------

/// Where the listener binds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Host or interface address to bind
    pub host: String,
    /// TCP port to bind (0 picks an ephemeral port)
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ListenConfig {
    /// `host:port` string suitable for binding
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ----------------------------------------------------------------------------
// Protocol Configuration
// ----------------------------------------------------------------------------

/// Wire protocol limits and handshake behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Maximum accepted frame payload length in bytes
    pub max_frame_len: usize,
    /// Maximum size of an unframed (legacy) hello object
    pub max_handshake_len: usize,
    /// Time allowed for the hello exchange, in milliseconds
    pub handshake_timeout_ms: u64,
    /// Send the outbound hello as a raw unframed JSON object
    ///
    /// Only the outbound hello changes. Connects still wait for the
    /// acceptor's hello reply, so a listener that never answers fails with
    /// a handshake timeout. Raw inbound hellos are accepted regardless.
    pub legacy_raw_handshake: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_handshake_len: 4096,
            handshake_timeout_ms: 5_000,
            legacy_raw_handshake: false,
        }
    }
}

impl ProtocolConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

// ----------------------------------------------------------------------------
// Network Configuration
// ----------------------------------------------------------------------------

/// Outbound dialing and accept-loop behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Outbound connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Back-off after a failed accept, in milliseconds
    pub accept_retry_delay_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            accept_retry_delay_ms: 100,
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn accept_retry_delay(&self) -> Duration {
        Duration::from_millis(self.accept_retry_delay_ms)
    }
}

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Configuration for channel buffer sizes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Buffer size for the event channel (handlers → presentation layer)
    pub event_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 256, // Network events can be bursty
        }
    }
}

// ----------------------------------------------------------------------------
// Mesh Configuration
// ----------------------------------------------------------------------------

/// Master configuration for a mesh node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub listen: ListenConfig,
    pub protocol: ProtocolConfig,
    pub network: NetworkConfig,
    pub channels: ChannelConfig,
}

impl MeshConfig {
    /// Create new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Loopback, ephemeral port, short timeouts
    pub fn testing() -> Self {
        Self {
            listen: ListenConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            protocol: ProtocolConfig {
                handshake_timeout_ms: 2_000,
                ..ProtocolConfig::default()
            },
            network: NetworkConfig {
                connect_timeout_ms: 2_000,
                accept_retry_delay_ms: 10,
            },
            channels: ChannelConfig {
                event_buffer_size: 64,
            },
        }
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<(), String> {
        if self.listen.host.trim().is_empty() {
            return Err("Listen host cannot be empty".into());
        }
        if self.protocol.max_frame_len == 0 {
            return Err("Max frame length cannot be zero".into());
        }
        if self.protocol.max_frame_len > u32::MAX as usize {
            return Err("Max frame length cannot exceed the 4-byte length prefix".into());
        }
        if self.protocol.max_handshake_len == 0 {
            return Err("Max handshake length cannot be zero".into());
        }
        if self.protocol.handshake_timeout_ms == 0 {
            return Err("Handshake timeout must be greater than 0".into());
        }
        if self.network.connect_timeout_ms == 0 {
            return Err("Connect timeout must be greater than 0".into());
        }
        if self.channels.event_buffer_size == 0 {
            return Err("Event buffer size cannot be zero".into());
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MeshConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.listen.port, DEFAULT_PORT);
        assert_eq!(config.listen.bind_address(), "0.0.0.0:61757");
        assert!(MeshConfig::testing().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_limits() {
        let mut config = MeshConfig::default();
        config.protocol.max_frame_len = 0;
        assert!(config.validate().is_err());

        let mut config = MeshConfig::default();
        config.channels.event_buffer_size = 0;
        assert!(config.validate().is_err());

        let mut config = MeshConfig::default();
        config.listen.host = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: MeshConfig =
            serde_json::from_str(r#"{"listen":{"port":7000}}"#).expect("partial config parses");
        assert_eq!(config.listen.port, 7000);
        assert_eq!(config.listen.host, "0.0.0.0");
        assert_eq!(config.protocol, ProtocolConfig::default());
    }
}
