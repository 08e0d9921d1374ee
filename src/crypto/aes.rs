//! AES-CTS-HMAC-SHA1-96 (RFC 3962), encryption types 17 and 18.
//!
//! ```text
//! string-to-key:  tkey = PBKDF2-HMAC-SHA1(password, salt, iter, keylen)
//!                 key  = DK(tkey, "kerberos")
//! encrypt(usage): Ke = DK(key, usage | 0xAA), Ki = DK(key, usage | 0x55)
//!                 C  = AES-CTS(Ke, iv=0, confounder || plaintext)
//!                 H  = HMAC-SHA1(Ki, confounder || plaintext)[..12]
//!                 out = C || H
//! checksum:       Kc = DK(key, usage | 0x99), HMAC-SHA1(Kc, data)[..12]
//! ```

use super::nfold::nfold;
use crate::core::error::{KdcError, KdcResult};
use ::aes::cipher::generic_array::GenericArray;
use ::aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use ::aes::{Aes128, Aes256};
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// AES block size.
pub const BLOCK_SIZE: usize = 16;
/// Truncated HMAC length.
pub const HMAC_SIZE: usize = 12;
/// Default PBKDF2 iteration count.
pub const DEFAULT_ITERATIONS: u32 = 4096;

const KEY_USAGE_ENC: u8 = 0xAA;
const KEY_USAGE_INTEG: u8 = 0x55;
const KEY_USAGE_CKSUM: u8 = 0x99;

/// AES key width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesKind {
    /// aes128-cts-hmac-sha1-96
    Aes128,
    /// aes256-cts-hmac-sha1-96
    Aes256,
}

impl AesKind {
    /// Key length in bytes.
    pub const fn key_len(self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes256 => 32,
        }
    }
}

enum BlockCipher {
    A128(Aes128),
    A256(Aes256),
}

impl BlockCipher {
    fn new(kind: AesKind, key: &[u8]) -> KdcResult<Self> {
        if key.len() != kind.key_len() {
            return Err(KdcError::crypto(format!(
                "expected {}-byte AES key, got {}",
                kind.key_len(),
                key.len()
            )));
        }
        let cipher = match kind {
            AesKind::Aes128 => Aes128::new_from_slice(key).map(Self::A128),
            AesKind::Aes256 => Aes256::new_from_slice(key).map(Self::A256),
        };
        cipher.map_err(|_| KdcError::crypto("invalid AES key length"))
    }

    fn encrypt(&self, block: &mut [u8; BLOCK_SIZE]) {
        let b = GenericArray::from_mut_slice(block);
        match self {
            Self::A128(c) => c.encrypt_block(b),
            Self::A256(c) => c.encrypt_block(b),
        }
    }

    fn decrypt(&self, block: &mut [u8; BLOCK_SIZE]) {
        let b = GenericArray::from_mut_slice(block);
        match self {
            Self::A128(c) => c.decrypt_block(b),
            Self::A256(c) => c.decrypt_block(b),
        }
    }
}

fn to_block(data: &[u8]) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    block[..data.len()].copy_from_slice(data);
    block
}

fn xor_into(block: &mut [u8; BLOCK_SIZE], other: &[u8; BLOCK_SIZE]) {
    for (b, o) in block.iter_mut().zip(other) {
        *b ^= o;
    }
}

/// RFC 3961 DR/DK. AES random-to-key is the identity, so DK == DR.
fn derive(kind: AesKind, key: &[u8], constant: &[u8]) -> KdcResult<Vec<u8>> {
    let cipher = BlockCipher::new(kind, key)?;
    let mut block = if constant.len() == BLOCK_SIZE {
        to_block(constant)
    } else {
        to_block(&nfold(constant, BLOCK_SIZE))
    };

    let mut out = Vec::with_capacity(kind.key_len());
    while out.len() < kind.key_len() {
        cipher.encrypt(&mut block);
        out.extend_from_slice(&block);
    }
    out.truncate(kind.key_len());
    Ok(out)
}

fn usage_constant(usage: u32, suffix: u8) -> [u8; 5] {
    let u = usage.to_be_bytes();
    [u[0], u[1], u[2], u[3], suffix]
}

fn hmac_sha1(key: &[u8], data: &[u8]) -> KdcResult<Vec<u8>> {
    let mut mac = <HmacSha1 as Mac>::new_from_slice(key)
        .map_err(|_| KdcError::crypto("invalid HMAC key"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Derive a long-term key from a password and salt.
pub fn string_to_key(
    kind: AesKind,
    password: &[u8],
    salt: &[u8],
    iterations: u32,
) -> KdcResult<Vec<u8>> {
    let mut tkey = vec![0u8; kind.key_len()];
    pbkdf2::pbkdf2_hmac::<Sha1>(password, salt, iterations, &mut tkey);
    derive(kind, &tkey, b"kerberos")
}

/// CBC ciphertext stealing with a zero IV, final two blocks swapped.
fn cts_encrypt(cipher: &BlockCipher, data: &[u8]) -> Vec<u8> {
    if data.len() == BLOCK_SIZE {
        let mut block = to_block(data);
        cipher.encrypt(&mut block);
        return block.to_vec();
    }

    let n = data.len().div_ceil(BLOCK_SIZE);
    let last_len = data.len() - (n - 1) * BLOCK_SIZE;

    let mut blocks = Vec::with_capacity(n);
    let mut prev = [0u8; BLOCK_SIZE];
    for chunk in data.chunks(BLOCK_SIZE) {
        let mut block = to_block(chunk);
        xor_into(&mut block, &prev);
        cipher.encrypt(&mut block);
        blocks.push(block);
        prev = block;
    }

    let mut out = Vec::with_capacity(data.len());
    for block in &blocks[..n - 2] {
        out.extend_from_slice(block);
    }
    out.extend_from_slice(&blocks[n - 1]);
    out.extend_from_slice(&blocks[n - 2][..last_len]);
    out
}

fn cts_decrypt(cipher: &BlockCipher, data: &[u8]) -> KdcResult<Vec<u8>> {
    if data.len() < BLOCK_SIZE {
        return Err(KdcError::crypto("ciphertext shorter than one block"));
    }
    if data.len() == BLOCK_SIZE {
        let mut block = to_block(data);
        cipher.decrypt(&mut block);
        return Ok(block.to_vec());
    }

    let n = data.len().div_ceil(BLOCK_SIZE);
    let last_len = data.len() - (n - 1) * BLOCK_SIZE;
    let head = &data[..(n - 2) * BLOCK_SIZE];
    let stolen = &data[(n - 2) * BLOCK_SIZE..(n - 1) * BLOCK_SIZE];
    let tail = &data[(n - 1) * BLOCK_SIZE..];

    let mut d = to_block(stolen);
    cipher.decrypt(&mut d);

    let mut penultimate = [0u8; BLOCK_SIZE];
    penultimate[..last_len].copy_from_slice(tail);
    penultimate[last_len..].copy_from_slice(&d[last_len..]);
    let last_plain: Vec<u8> = (0..last_len).map(|i| d[i] ^ penultimate[i]).collect();

    let mut out = Vec::with_capacity(data.len());
    let mut prev = [0u8; BLOCK_SIZE];
    for chunk in head.chunks(BLOCK_SIZE).chain(std::iter::once(&penultimate[..])) {
        let cblock = to_block(chunk);
        let mut block = cblock;
        cipher.decrypt(&mut block);
        xor_into(&mut block, &prev);
        out.extend_from_slice(&block);
        prev = cblock;
    }
    out.extend_from_slice(&last_plain);
    Ok(out)
}

/// Encrypt `plaintext` for `usage` with a caller-supplied confounder.
pub fn encrypt(
    kind: AesKind,
    key: &[u8],
    usage: u32,
    confounder: &[u8; BLOCK_SIZE],
    plaintext: &[u8],
) -> KdcResult<Vec<u8>> {
    let ke = derive(kind, key, &usage_constant(usage, KEY_USAGE_ENC))?;
    let ki = derive(kind, key, &usage_constant(usage, KEY_USAGE_INTEG))?;

    let mut data = Vec::with_capacity(BLOCK_SIZE + plaintext.len());
    data.extend_from_slice(confounder);
    data.extend_from_slice(plaintext);

    let mut out = cts_encrypt(&BlockCipher::new(kind, &ke)?, &data);
    let mac = hmac_sha1(&ki, &data)?;
    out.extend_from_slice(&mac[..HMAC_SIZE]);
    Ok(out)
}

/// Decrypt and integrity-check `ciphertext` for `usage`.
pub fn decrypt(kind: AesKind, key: &[u8], usage: u32, ciphertext: &[u8]) -> KdcResult<Vec<u8>> {
    if ciphertext.len() < BLOCK_SIZE + HMAC_SIZE {
        return Err(KdcError::crypto("ciphertext too short"));
    }
    let ke = derive(kind, key, &usage_constant(usage, KEY_USAGE_ENC))?;
    let ki = derive(kind, key, &usage_constant(usage, KEY_USAGE_INTEG))?;

    let (body, tag) = ciphertext.split_at(ciphertext.len() - HMAC_SIZE);
    let data = cts_decrypt(&BlockCipher::new(kind, &ke)?, body)?;

    let mut mac = <HmacSha1 as Mac>::new_from_slice(&ki)
        .map_err(|_| KdcError::crypto("invalid HMAC key"))?;
    mac.update(&data);
    mac.verify_truncated_left(tag)
        .map_err(|_| KdcError::crypto("integrity check failed"))?;

    Ok(data[BLOCK_SIZE..].to_vec())
}

/// Keyed checksum (hmac-sha1-96-aes128/256).
pub fn checksum(kind: AesKind, key: &[u8], usage: u32, data: &[u8]) -> KdcResult<Vec<u8>> {
    let kc = derive(kind, key, &usage_constant(usage, KEY_USAGE_CKSUM))?;
    let mut mac = hmac_sha1(&kc, data)?;
    mac.truncate(HMAC_SIZE);
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3962_string_to_key_single_iteration() {
        let k128 = string_to_key(AesKind::Aes128, b"password", b"ATHENA.MIT.EDUraeburn", 1).unwrap();
        assert_eq!(hex::encode(k128), "42263c6e89f4fc28b8df68ee09799f15");

        let k256 = string_to_key(AesKind::Aes256, b"password", b"ATHENA.MIT.EDUraeburn", 1).unwrap();
        assert_eq!(
            hex::encode(k256),
            "fe697b52bc0d3ce14432ba036a92e65bbb52280990a2fa27883998d72af30161"
        );
    }

    #[test]
    fn rfc3962_cts_vector() {
        let cipher = BlockCipher::new(AesKind::Aes128, b"chicken teriyaki").unwrap();
        let out = cts_encrypt(&cipher, b"I would like the ");
        assert_eq!(hex::encode(&out), "c6353568f2bf8cb4d8a580362da7ff7f97");
        assert_eq!(cts_decrypt(&cipher, &out).unwrap(), b"I would like the ");
    }

    #[test]
    fn cts_round_trips_every_length() {
        let cipher = BlockCipher::new(AesKind::Aes256, &[7u8; 32]).unwrap();
        for len in 16..80 {
            let data: Vec<u8> = (0..len as u8).collect();
            let enc = cts_encrypt(&cipher, &data);
            assert_eq!(enc.len(), len);
            assert_eq!(cts_decrypt(&cipher, &enc).unwrap(), data, "len {len}");
        }
    }

    #[test]
    fn encrypt_decrypt_with_usage() {
        let key = string_to_key(AesKind::Aes256, b"secret", b"EXAMPLE.COMalice", 2).unwrap();
        let conf = [3u8; BLOCK_SIZE];
        let ct = encrypt(AesKind::Aes256, &key, 3, &conf, b"hello kerberos").unwrap();
        assert_eq!(ct.len(), BLOCK_SIZE + 14 + HMAC_SIZE);
        assert_eq!(decrypt(AesKind::Aes256, &key, 3, &ct).unwrap(), b"hello kerberos");
        // Same key, different usage: integrity check must fail.
        assert!(decrypt(AesKind::Aes256, &key, 2, &ct).is_err());
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let key = [9u8; 16];
        let mut ct = encrypt(AesKind::Aes128, &key, 1, &[0u8; 16], b"timestamp").unwrap();
        ct[5] ^= 1;
        assert!(decrypt(AesKind::Aes128, &key, 1, &ct).is_err());
    }

    #[test]
    fn checksum_is_keyed() {
        let a = checksum(AesKind::Aes128, &[1u8; 16], 6, b"body").unwrap();
        let b = checksum(AesKind::Aes128, &[2u8; 16], 6, b"body").unwrap();
        assert_eq!(a.len(), HMAC_SIZE);
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_length() {
        assert!(BlockCipher::new(AesKind::Aes256, &[0u8; 16]).is_err());
    }
}
