//! Group key derivation and the payload cipher
//!
//! All mesh members derive the same key from the same membership set, so no
//! key-exchange round is needed. The cipher is a repeating-key XOR: it hides
//! payloads from casual inspection but provides neither integrity nor
//! authentication, and ciphertext is trivially malleable.

use core::fmt;
use std::collections::BTreeSet;

use sha2::{Digest, Sha256};
use tracing::error;

use crate::types::PeerId;

/// Length of the derived key in bytes
pub const GROUP_KEY_SIZE: usize = 32;

// ----------------------------------------------------------------------------
// Group Key
// ----------------------------------------------------------------------------

/// Shared symmetric key for the current mesh membership
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupKey([u8; GROUP_KEY_SIZE]);

impl GroupKey {
    pub fn from_bytes(bytes: [u8; GROUP_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; GROUP_KEY_SIZE] {
        &self.0
    }

    /// Short hex prefix for display; the full key never appears in logs
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupKey({}..)", self.fingerprint())
    }
}

// ----------------------------------------------------------------------------
// Group Key Deriver
// ----------------------------------------------------------------------------

/// Computes the group key from the membership set
pub struct GroupKeyDeriver;

impl GroupKeyDeriver {
    /// SHA-256 over the compact JSON array of the sorted, deduplicated union
    /// `{self_id} ∪ peer_ids`, e.g. `["1-2-3-4","5-6-7-8"]`
    pub fn derive<'a, I>(self_id: &PeerId, peer_ids: I) -> GroupKey
    where
        I: IntoIterator<Item = &'a PeerId>,
    {
        let mut members: BTreeSet<&str> = peer_ids.into_iter().map(PeerId::as_str).collect();
        members.insert(self_id.as_str());

        let mut hasher = Sha256::new();
        hasher.update(Self::serialize_members(&members));
        GroupKey(hasher.finalize().into())
    }

    fn serialize_members(members: &BTreeSet<&str>) -> Vec<u8> {
        // A set of strings always serializes
        serde_json::to_vec(members).unwrap_or_else(|e| {
            error!("Failed to serialize group membership: {}", e);
            Vec::new()
        })
    }
}

/// SHA-256 of a password, used as the key for protected files
pub fn password_key(password: &str) -> [u8; GROUP_KEY_SIZE] {
    Sha256::digest(password.as_bytes()).into()
}

// ----------------------------------------------------------------------------
// Cipher Engine
// ----------------------------------------------------------------------------

/// Repeating-key XOR transform
pub struct CipherEngine;

impl CipherEngine {
    /// XOR `data` with `key` cycled to its length
    ///
    /// Applying the transform twice with the same key restores the input. An
    /// empty key returns the data unchanged; callers must refuse to send
    /// rather than rely on that.
    pub fn transform(data: &[u8], key: &[u8]) -> Vec<u8> {
        if key.is_empty() {
            return data.to_vec();
        }
        data.iter()
            .zip(key.iter().cycle())
            .map(|(d, k)| d ^ k)
            .collect()
    }

    pub fn encrypt(plaintext: &[u8], key: &GroupKey) -> Vec<u8> {
        Self::transform(plaintext, key.as_bytes())
    }

    pub fn decrypt(ciphertext: &[u8], key: &GroupKey) -> Vec<u8> {
        Self::transform(ciphertext, key.as_bytes())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
