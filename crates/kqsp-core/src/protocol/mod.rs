//! Protocol Module
//!
//! Wire-level building blocks:
//! - `frame`: length-prefixed framing
//! - `envelope`: typed JSON envelopes and latin-1 byte strings
//! - `crypto`: group key derivation and the XOR cipher
//! - `file`: file payload sealing and unlocking

pub mod crypto;
pub mod envelope;
pub mod file;
pub mod frame;

pub use crypto::{password_key, CipherEngine, GroupKey, GroupKeyDeriver, GROUP_KEY_SIZE};
pub use envelope::{latin1_decode, latin1_encode, Envelope, Message};
pub use file::PROTECTED_MAGIC;
pub use frame::{FrameCodec, LENGTH_PREFIX_SIZE};
