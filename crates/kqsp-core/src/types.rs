//! Core types for the KQSP protocol
//!
//! This module defines the identifiers exchanged on the mesh, using newtype
//! patterns so wire identifiers and display identifiers cannot be mixed up.

use core::fmt;
use core::str::FromStr;

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::errors::MeshError;

// ----------------------------------------------------------------------------
// Peer Identifier
// ----------------------------------------------------------------------------

/// Opaque wire identifier of a peer, exchanged during the handshake
///
/// Locally generated ids look like `a-b-c-d`, but any non-empty string received
/// in a `hello` is accepted. Ids are not cryptographically verified: any peer
/// can claim any identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Create a PeerId from any string
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is empty (never valid on the wire)
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ----------------------------------------------------------------------------
// Local Identity
// ----------------------------------------------------------------------------

/// The four random bytes identifying this process
///
/// Both the wire id (`a-b-c-d`) and the display form (`K(a.b.c.d)`) are derived
/// from the same bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalIdentity([u8; 4]);

impl LocalIdentity {
    /// Create an identity from explicit bytes
    pub fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh identity from the OS random number generator
    pub fn generate() -> Self {
        let mut bytes = [0u8; 4];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Hyphen-joined wire identifier, e.g. `10-0-0-7`
    pub fn peer_id(&self) -> PeerId {
        PeerId(self.join("-"))
    }

    /// Dot-joined address without the `K(...)` wrapper, e.g. `10.0.0.7`
    pub fn address(&self) -> String {
        self.join(".")
    }

    /// Human readable display form, e.g. `K(10.0.0.7)`
    pub fn display_name(&self) -> String {
        format!("K({})", self.address())
    }

    fn join(&self, separator: &str) -> String {
        self.0
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(separator)
    }
}

impl fmt::Display for LocalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "K({})", self.address())
    }
}

impl FromStr for LocalIdentity {
    type Err = MeshError;

    /// Accepts `K(a.b.c.d)`, `a.b.c.d` or `a-b-c-d`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let inner = trimmed
            .strip_prefix("K(")
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or(trimmed);

        let separator = if inner.contains('-') { '-' } else { '.' };
        let parts: Vec<&str> = inner.split(separator).collect();
        if parts.len() != 4 {
            return Err(MeshError::InvalidIdentity(format!(
                "expected four byte values, got '{}'",
                s
            )));
        }

        let mut bytes = [0u8; 4];
        for (slot, part) in bytes.iter_mut().zip(parts) {
            *slot = part
                .parse::<u8>()
                .map_err(|_| MeshError::InvalidIdentity(format!("'{}' is not a byte value", part)))?;
        }
        Ok(Self(bytes))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
