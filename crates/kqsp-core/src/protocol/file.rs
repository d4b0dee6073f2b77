//! File payloads
//!
//! Plain files are transformed with the group key like text. Password
//! protected files are prefixed with a magic header and transformed with the
//! SHA-256 of the password instead; the header lets the receiver tell a wrong
//! password from a right one.

use super::crypto::{password_key, CipherEngine, GroupKey};

/// Header prepended to protected file contents before encryption
pub const PROTECTED_MAGIC: &[u8; 4] = b"KQSP";

/// Encrypt a file body for the wire, returning `(data, protected)`
pub fn seal(contents: &[u8], key: &GroupKey, password: Option<&str>) -> (Vec<u8>, bool) {
    match password {
        Some(password) => {
            let mut plain = Vec::with_capacity(PROTECTED_MAGIC.len() + contents.len());
            plain.extend_from_slice(PROTECTED_MAGIC);
            plain.extend_from_slice(contents);
            (CipherEngine::transform(&plain, &password_key(password)), true)
        }
        None => (CipherEngine::encrypt(contents, key), false),
    }
}

/// Decrypt an unprotected file body
pub fn open(data: &[u8], key: &GroupKey) -> Vec<u8> {
    CipherEngine::decrypt(data, key)
}

/// Decrypt a protected file body, or `None` if the password is wrong
pub fn unlock(data: &[u8], password: &str) -> Option<Vec<u8>> {
    let plain = CipherEngine::transform(data, &password_key(password));
    plain
        .strip_prefix(PROTECTED_MAGIC.as_slice())
        .map(<[u8]>::to_vec)
}
