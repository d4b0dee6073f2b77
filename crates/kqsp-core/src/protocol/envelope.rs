//! Wire envelopes
//!
//! Every frame carries one UTF-8 JSON object tagged by its `"type"` field.
//! Known kinds decode into typed variants exactly once, at the boundary;
//! anything else is kept verbatim as `Envelope::Unknown` so it can be logged
//! or forwarded without loss.
//!
//! Ciphertext travels inside JSON strings as a latin-1 byte string: each byte
//! becomes the code point with the same value.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DecodeError;
use crate::types::PeerId;

// ----------------------------------------------------------------------------
// Latin-1 Byte Strings
// ----------------------------------------------------------------------------

/// Map every byte to the char with the same code point
pub fn latin1_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Inverse of [`latin1_encode`]; fails on any char above U+00FF
pub fn latin1_decode(text: &str) -> Result<Vec<u8>, DecodeError> {
    text.chars()
        .map(|c| {
            u8::try_from(u32::from(c)).map_err(|_| DecodeError::InvalidLatin1 {
                code_point: u32::from(c),
            })
        })
        .collect()
}

mod latin1_string {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::latin1_encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::latin1_decode(&text).map_err(D::Error::custom)
    }
}

// ----------------------------------------------------------------------------
// Envelope
// ----------------------------------------------------------------------------

pub const KIND_HELLO: &str = "hello";
pub const KIND_TEXT: &str = "text";
pub const KIND_FILE: &str = "file";

/// Known envelope kinds with their wire layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum KnownEnvelope {
    Hello {
        peer_id: PeerId,
    },
    Text {
        #[serde(default)]
        from: String,
        #[serde(with = "latin1_string")]
        text: Vec<u8>,
    },
    File {
        #[serde(default)]
        from: String,
        filename: String,
        #[serde(default)]
        protected: bool,
        #[serde(with = "latin1_string")]
        data: Vec<u8>,
    },
}

/// A decoded wire envelope
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// One-shot handshake carrying the sender's wire id
    Hello { peer_id: PeerId },
    /// Encrypted chat text; `from` is the sender's display name
    Text { from: String, text: Vec<u8> },
    /// Encrypted file payload
    File {
        from: String,
        filename: String,
        protected: bool,
        data: Vec<u8>,
    },
    /// Any kind this build does not understand, preserved as received
    Unknown { raw: Value },
}

impl Envelope {
    pub fn hello(peer_id: PeerId) -> Self {
        Envelope::Hello { peer_id }
    }

    pub fn text<S: Into<String>>(from: S, ciphertext: Vec<u8>) -> Self {
        Envelope::Text {
            from: from.into(),
            text: ciphertext,
        }
    }

    /// Value of the `"type"` tag
    pub fn kind(&self) -> &str {
        match self {
            Envelope::Hello { .. } => KIND_HELLO,
            Envelope::Text { .. } => KIND_TEXT,
            Envelope::File { .. } => KIND_FILE,
            Envelope::Unknown { raw } => raw.get("type").and_then(Value::as_str).unwrap_or("?"),
        }
    }

    /// Decode one envelope from a frame payload
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let raw: Value = serde_json::from_slice(payload)?;
        let kind = raw
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingField { field: "type" })?;

        if !matches!(kind, KIND_HELLO | KIND_TEXT | KIND_FILE) {
            return Ok(Envelope::Unknown { raw });
        }

        Ok(match serde_json::from_value::<KnownEnvelope>(raw)? {
            KnownEnvelope::Hello { peer_id } => Envelope::Hello { peer_id },
            KnownEnvelope::Text { from, text } => Envelope::Text { from, text },
            KnownEnvelope::File {
                from,
                filename,
                protected,
                data,
            } => Envelope::File {
                from,
                filename,
                protected,
                data,
            },
        })
    }

    /// Encode as a compact JSON payload
    pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
        let bytes = match self {
            Envelope::Hello { peer_id } => serde_json::to_vec(&KnownEnvelope::Hello {
                peer_id: peer_id.clone(),
            })?,
            Envelope::Text { from, text } => serde_json::to_vec(&KnownEnvelope::Text {
                from: from.clone(),
                text: text.clone(),
            })?,
            Envelope::File {
                from,
                filename,
                protected,
                data,
            } => serde_json::to_vec(&KnownEnvelope::File {
                from: from.clone(),
                filename: filename.clone(),
                protected: *protected,
                data: data.clone(),
            })?,
            Envelope::Unknown { raw } => serde_json::to_vec(raw)?,
        };
        Ok(bytes)
    }
}

// ----------------------------------------------------------------------------
// Decrypted Message
// ----------------------------------------------------------------------------

/// Steady-state message after frame extraction and decryption
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Text { from: String, body: String },
    Unknown { raw: Value },
}

impl core::fmt::Display for Message {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Message::Text { from, body } => write!(f, "{}: {}", from, body),
            Message::Unknown { raw } => write!(f, "unknown message {}", raw),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
