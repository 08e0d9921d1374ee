//! RC4-HMAC (RFC 4757) key derivation.
//!
//! Only string-to-key is provided. RC4 keys are written to keytabs for
//! clients that still ask for them; the KDC itself never encrypts with RC4.

use md4::{Digest, Md4};

/// RC4-HMAC key length.
pub const KEY_LEN: usize = 16;

/// `MD4(UTF-16LE(password))`. The salt is ignored.
pub fn string_to_key(password: &str) -> Vec<u8> {
    let utf16: Vec<u8> = password
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect();
    Md4::digest(&utf16).to_vec()
}
