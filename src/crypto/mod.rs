//! Kerberos encryption types and key derivation.
//!
//! Keys are derived from `(principal@REALM, password)` with the RFC 3961
//! salt: the realm followed by every name component, no separators. The
//! derivation is deterministic, so the KDC and a keytab built from the same
//! password always agree.

pub mod aes;
pub mod arcfour;
pub mod nfold;

use crate::core::error::{KdcError, KdcResult};
use rand::RngCore;
use std::collections::BTreeMap;
use std::fmt;

use self::aes::AesKind;

/// PA-ENC-TIMESTAMP encryption.
pub const USAGE_PA_ENC_TIMESTAMP: u32 = 1;
/// Ticket encryption (EncTicketPart).
pub const USAGE_TICKET: u32 = 2;
/// AS-REP EncKDCRepPart, client long-term key.
pub const USAGE_AS_REP: u32 = 3;
/// TGS-REQ authenticator checksum over the request body.
pub const USAGE_TGS_REQ_AUTH_CKSUM: u32 = 6;
/// TGS-REQ authenticator.
pub const USAGE_TGS_REQ_AUTH: u32 = 7;
/// TGS-REP EncKDCRepPart, session key.
pub const USAGE_TGS_REP_SESSION: u32 = 8;
/// TGS-REP EncKDCRepPart, authenticator subkey.
pub const USAGE_TGS_REP_SUBKEY: u32 = 9;

/// Kerberos encryption type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EncryptionType {
    DesCbcCrc,
    DesCbcMd5,
    Des3CbcSha1Kd,
    Aes128CtsHmacSha196,
    Aes256CtsHmacSha196,
    Rc4Hmac,
}

/// Encryption types derived for every principal, strongest first.
pub const DEFAULT_ENCTYPES: [EncryptionType; 3] = [
    EncryptionType::Aes256CtsHmacSha196,
    EncryptionType::Aes128CtsHmacSha196,
    EncryptionType::Rc4Hmac,
];

impl EncryptionType {
    /// IANA etype number.
    pub const fn id(self) -> i32 {
        match self {
            Self::DesCbcCrc => 1,
            Self::DesCbcMd5 => 3,
            Self::Des3CbcSha1Kd => 16,
            Self::Aes128CtsHmacSha196 => 17,
            Self::Aes256CtsHmacSha196 => 18,
            Self::Rc4Hmac => 23,
        }
    }

    /// Look up an etype number.
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(Self::DesCbcCrc),
            3 => Some(Self::DesCbcMd5),
            16 => Some(Self::Des3CbcSha1Kd),
            17 => Some(Self::Aes128CtsHmacSha196),
            18 => Some(Self::Aes256CtsHmacSha196),
            23 => Some(Self::Rc4Hmac),
            _ => None,
        }
    }

    /// Name as used in krb5.conf.
    pub const fn name(self) -> &'static str {
        match self {
            Self::DesCbcCrc => "des-cbc-crc",
            Self::DesCbcMd5 => "des-cbc-md5",
            Self::Des3CbcSha1Kd => "des3-cbc-sha1",
            Self::Aes128CtsHmacSha196 => "aes128-cts-hmac-sha1-96",
            Self::Aes256CtsHmacSha196 => "aes256-cts-hmac-sha1-96",
            Self::Rc4Hmac => "arcfour-hmac",
        }
    }

    /// Whether the KDC can encrypt and decrypt with this type.
    pub const fn supports_encryption(self) -> bool {
        self.aes_kind().is_some()
    }

    /// Keyed checksum type paired with this etype.
    pub const fn checksum_type(self) -> Option<i32> {
        match self {
            Self::Aes128CtsHmacSha196 => Some(15),
            Self::Aes256CtsHmacSha196 => Some(16),
            _ => None,
        }
    }

    const fn aes_kind(self) -> Option<AesKind> {
        match self {
            Self::Aes128CtsHmacSha196 => Some(AesKind::Aes128),
            Self::Aes256CtsHmacSha196 => Some(AesKind::Aes256),
            _ => None,
        }
    }

    const fn key_len(self) -> Option<usize> {
        match self {
            Self::Aes128CtsHmacSha196 => Some(16),
            Self::Aes256CtsHmacSha196 => Some(32),
            Self::Rc4Hmac => Some(arcfour::KEY_LEN),
            _ => None,
        }
    }
}

impl fmt::Display for EncryptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A key of a specific encryption type.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    etype: EncryptionType,
    bytes: Vec<u8>,
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("etype", &self.etype)
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

impl EncryptionKey {
    pub fn new(etype: EncryptionType, bytes: Vec<u8>) -> Self {
        Self { etype, bytes }
    }

    /// A fresh random key, used for session keys.
    pub fn random(etype: EncryptionType) -> KdcResult<Self> {
        let len = etype
            .key_len()
            .ok_or(KdcError::UnsupportedCipher { etype: etype.id() })?;
        let mut bytes = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut bytes);
        Ok(Self { etype, bytes })
    }

    pub fn etype(&self) -> EncryptionType {
        self.etype
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn aes(&self) -> KdcResult<AesKind> {
        self.etype.aes_kind().ok_or(KdcError::UnsupportedCipher {
            etype: self.etype.id(),
        })
    }

    /// Encrypt with a random confounder.
    pub fn encrypt(&self, usage: u32, plaintext: &[u8]) -> KdcResult<Vec<u8>> {
        let kind = self.aes()?;
        let mut confounder = [0u8; aes::BLOCK_SIZE];
        rand::thread_rng().fill_bytes(&mut confounder);
        aes::encrypt(kind, &self.bytes, usage, &confounder, plaintext)
    }

    /// Decrypt and verify integrity.
    pub fn decrypt(&self, usage: u32, ciphertext: &[u8]) -> KdcResult<Vec<u8>> {
        aes::decrypt(self.aes()?, &self.bytes, usage, ciphertext)
    }

    /// Keyed checksum; returns `(cksumtype, checksum)`.
    pub fn checksum(&self, usage: u32, data: &[u8]) -> KdcResult<(i32, Vec<u8>)> {
        let kind = self.aes()?;
        let cksumtype = self
            .etype
            .checksum_type()
            .ok_or(KdcError::UnsupportedCipher {
                etype: self.etype.id(),
            })?;
        Ok((cksumtype, aes::checksum(kind, &self.bytes, usage, data)?))
    }

    /// Verify a keyed checksum produced by [`EncryptionKey::checksum`].
    pub fn verify_checksum(
        &self,
        usage: u32,
        data: &[u8],
        cksumtype: i32,
        expected: &[u8],
    ) -> KdcResult<()> {
        let (ty, actual) = self.checksum(usage, data)?;
        if ty != cksumtype {
            return Err(KdcError::crypto(format!(
                "checksum type {cksumtype} does not match key type {ty}"
            )));
        }
        if actual != expected {
            return Err(KdcError::crypto("checksum mismatch"));
        }
        Ok(())
    }
}

/// Keys for one principal, one per encryption type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeySet {
    kvno: u8,
    keys: BTreeMap<EncryptionType, EncryptionKey>,
}

impl KeySet {
    pub fn new(kvno: u8) -> Self {
        Self {
            kvno,
            keys: BTreeMap::new(),
        }
    }

    pub fn kvno(&self) -> u8 {
        self.kvno
    }

    pub fn insert(&mut self, key: EncryptionKey) {
        self.keys.insert(key.etype, key);
    }

    pub fn get(&self, etype: EncryptionType) -> Option<&EncryptionKey> {
        self.keys.get(&etype)
    }

    pub fn etypes(&self) -> impl Iterator<Item = EncryptionType> + '_ {
        self.keys.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EncryptionKey> {
        self.keys.values()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// First etype in `preference` with a key that can also encrypt.
    pub fn negotiate(&self, preference: &[i32]) -> Option<&EncryptionKey> {
        preference
            .iter()
            .filter_map(|id| EncryptionType::from_id(*id))
            .filter(|etype| etype.supports_encryption())
            .find_map(|etype| self.keys.get(&etype))
    }
}

/// Split `name/inst@REALM` into components and realm.
pub fn split_principal(principal: &str) -> (Vec<&str>, &str) {
    let (name, realm) = principal.rsplit_once('@').unwrap_or((principal, ""));
    (name.split('/').collect(), realm)
}

/// RFC 3961 default salt: realm followed by the name components.
pub fn salt_for(principal: &str) -> Vec<u8> {
    let (components, realm) = split_principal(principal);
    let mut salt = realm.as_bytes().to_vec();
    for c in components {
        salt.extend_from_slice(c.as_bytes());
    }
    salt
}

/// Derive a single key for `principal` (with realm) from `password`.
pub fn derive_key(
    etype: EncryptionType,
    principal: &str,
    password: &str,
) -> KdcResult<EncryptionKey> {
    let bytes = match etype {
        EncryptionType::Aes128CtsHmacSha196 | EncryptionType::Aes256CtsHmacSha196 => {
            let kind = etype
                .aes_kind()
                .ok_or(KdcError::UnsupportedCipher { etype: etype.id() })?;
            aes::string_to_key(
                kind,
                password.as_bytes(),
                &salt_for(principal),
                aes::DEFAULT_ITERATIONS,
            )?
        }
        EncryptionType::Rc4Hmac => arcfour::string_to_key(password),
        other => return Err(KdcError::UnsupportedCipher { etype: other.id() }),
    };
    Ok(EncryptionKey::new(etype, bytes))
}

/// Derive keys for every type in `etypes`, at key version 0.
///
/// Any unsupported type fails the whole derivation.
pub fn derive_key_set(
    principal: &str,
    password: &str,
    etypes: &[EncryptionType],
) -> KdcResult<KeySet> {
    let mut set = KeySet::new(0);
    for etype in etypes {
        set.insert(derive_key(*etype, principal, password)?);
    }
    Ok(set)
}
