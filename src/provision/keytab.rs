//! Keytab files.
//!
//! Layout (version 0x0502, all integers big-endian):
//!
//! ```text
//! u16 version
//! entry*:
//!   i32 size               negative: a hole of |size| bytes
//!   u16 component count    realm not included
//!   u16 len, realm
//!   (u16 len, component)*
//!   u32 name type
//!   u32 timestamp
//!   u8  key version
//!   u16 enctype
//!   u16 len, key bytes
//!   u32 key version        optional, supersedes the 8-bit one
//! ```
//!
//! Version 0x0501 uses native byte order and counts the realm as a
//! component; it is accepted on read (little-endian) and never written.

use crate::core::error::{KdcError, KdcResult};
use crate::crypto::{self, EncryptionKey, EncryptionType};
use bytes::{Buf, BufMut, BytesMut};
use std::io::Write;
use std::path::Path;

/// Current keytab format version.
pub const VERSION_2: u16 = 0x0502;

/// Legacy native-endian format version.
pub const VERSION_1: u16 = 0x0501;

/// `KRB5_NT_PRINCIPAL`.
pub const NT_PRINCIPAL: u32 = 1;

/// One key for one principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeytabEntry {
    /// `name/instance@REALM`.
    pub principal: String,
    pub name_type: u32,
    /// Seconds since the Unix epoch.
    pub timestamp: u32,
    pub kvno: u32,
    pub etype: i32,
    pub key: Vec<u8>,
}

impl KeytabEntry {
    pub fn new(principal: &str, timestamp: u32, kvno: u32, key: &EncryptionKey) -> Self {
        Self {
            principal: principal.to_string(),
            name_type: NT_PRINCIPAL,
            timestamp,
            kvno,
            etype: key.etype().id(),
            key: key.bytes().to_vec(),
        }
    }

    /// The key, when its encryption type is known.
    pub fn encryption_key(&self) -> Option<EncryptionKey> {
        EncryptionType::from_id(self.etype).map(|etype| EncryptionKey::new(etype, self.key.clone()))
    }

    fn encode(&self, out: &mut BytesMut) -> KdcResult<()> {
        let (components, realm) = crypto::split_principal(&self.principal);
        if realm.is_empty() {
            return Err(invalid(format!("principal {} has no realm", self.principal)));
        }

        let mut body = BytesMut::new();
        body.put_u16(u16_len(components.len())?);
        put_counted(&mut body, realm.as_bytes())?;
        for c in &components {
            put_counted(&mut body, c.as_bytes())?;
        }
        body.put_u32(self.name_type);
        body.put_u32(self.timestamp);
        body.put_u8(self.kvno.min(u8::MAX.into()) as u8);
        body.put_u16(
            u16::try_from(self.etype).map_err(|_| invalid(format!("etype {} out of range", self.etype)))?,
        );
        put_counted(&mut body, &self.key)?;
        body.put_u32(self.kvno);

        out.put_i32(
            i32::try_from(body.len()).map_err(|_| invalid("entry too large".to_string()))?,
        );
        out.extend_from_slice(&body);
        Ok(())
    }
}

/// An ordered collection of keytab entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keytab {
    entries: Vec<KeytabEntry>,
}

impl Keytab {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: KeytabEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[KeytabEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries for `principal`.
    pub fn entries_for<'a>(&'a self, principal: &'a str) -> impl Iterator<Item = &'a KeytabEntry> {
        self.entries.iter().filter(move |e| e.principal == principal)
    }

    /// Serialize in version 0x0502 format.
    pub fn to_bytes(&self) -> KdcResult<Vec<u8>> {
        let mut out = BytesMut::with_capacity(2 + self.entries.len() * 96);
        out.put_u16(VERSION_2);
        for entry in &self.entries {
            entry.encode(&mut out)?;
        }
        Ok(out.to_vec())
    }

    pub fn parse(bytes: &[u8]) -> KdcResult<Self> {
        let mut buf = bytes;
        if buf.remaining() < 2 {
            return Err(invalid("missing version".to_string()));
        }
        let version = buf.get_u16();
        let order = match version {
            VERSION_2 => ByteOrder::Big,
            VERSION_1 => ByteOrder::Little,
            other => return Err(invalid(format!("unsupported version {other:#06x}"))),
        };

        let mut entries = Vec::new();
        while buf.has_remaining() {
            let size = order.i32(&mut buf)?;
            let len = size.unsigned_abs() as usize;
            if buf.remaining() < len {
                return Err(invalid(format!(
                    "entry of {len} bytes, {} remaining",
                    buf.remaining()
                )));
            }
            let (record, rest) = buf.split_at(len);
            buf = rest;
            if size > 0 {
                entries.push(parse_entry(record, order, version)?);
            }
        }
        Ok(Self { entries })
    }

    pub fn read(path: &Path) -> KdcResult<Self> {
        let bytes = std::fs::read(path)?;
        Self::parse(&bytes)
    }

    /// Write to `path` through a temporary file in the same directory.
    ///
    /// Readers see either the previous file or the complete new one.
    pub fn write_atomic(&self, path: &Path) -> KdcResult<()> {
        let bytes = self.to_bytes()?;
        let write_err = |source: std::io::Error| KdcError::FileWrite {
            path: path.to_path_buf(),
            source,
        };

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => std::env::current_dir().map_err(write_err)?,
        };
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "keytab".to_string());
        let tmp = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));

        let result = (|| {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            std::fs::rename(&tmp, path)
        })();
        if let Err(e) = result {
            let _ = std::fs::remove_file(&tmp);
            return Err(write_err(e));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum ByteOrder {
    Big,
    Little,
}

impl ByteOrder {
    fn u16(self, buf: &mut &[u8]) -> KdcResult<u16> {
        need(buf, 2)?;
        Ok(match self {
            Self::Big => buf.get_u16(),
            Self::Little => buf.get_u16_le(),
        })
    }

    fn u32(self, buf: &mut &[u8]) -> KdcResult<u32> {
        need(buf, 4)?;
        Ok(match self {
            Self::Big => buf.get_u32(),
            Self::Little => buf.get_u32_le(),
        })
    }

    fn i32(self, buf: &mut &[u8]) -> KdcResult<i32> {
        need(buf, 4)?;
        Ok(match self {
            Self::Big => buf.get_i32(),
            Self::Little => buf.get_i32_le(),
        })
    }

    fn counted(self, buf: &mut &[u8]) -> KdcResult<Vec<u8>> {
        let len = self.u16(buf)? as usize;
        need(buf, len)?;
        let value = buf[..len].to_vec();
        buf.advance(len);
        Ok(value)
    }

    fn string(self, buf: &mut &[u8]) -> KdcResult<String> {
        String::from_utf8(self.counted(buf)?).map_err(|_| invalid("name is not UTF-8".to_string()))
    }
}

fn parse_entry(mut buf: &[u8], order: ByteOrder, version: u16) -> KdcResult<KeytabEntry> {
    let buf = &mut buf;
    let mut count = order.u16(buf)?;
    if version == VERSION_1 {
        count = count.saturating_sub(1);
    }
    let realm = order.string(buf)?;
    let components = (0..count)
        .map(|_| order.string(buf))
        .collect::<KdcResult<Vec<_>>>()?;
    let name_type = if version == VERSION_1 {
        NT_PRINCIPAL
    } else {
        order.u32(buf)?
    };
    let timestamp = order.u32(buf)?;
    need(buf, 1)?;
    let kvno8 = buf.get_u8();
    let etype = order.u16(buf)?;
    let key = order.counted(buf)?;
    let kvno = if buf.remaining() >= 4 {
        order.u32(buf)?
    } else {
        kvno8.into()
    };

    Ok(KeytabEntry {
        principal: format!("{}@{realm}", components.join("/")),
        name_type,
        timestamp,
        kvno,
        etype: etype.into(),
        key,
    })
}

fn need(buf: &[u8], n: usize) -> KdcResult<()> {
    if buf.len() < n {
        return Err(invalid("truncated entry".to_string()));
    }
    Ok(())
}

fn put_counted(out: &mut BytesMut, data: &[u8]) -> KdcResult<()> {
    out.put_u16(u16_len(data.len())?);
    out.put_slice(data);
    Ok(())
}

fn u16_len(len: usize) -> KdcResult<u16> {
    u16::try_from(len).map_err(|_| invalid(format!("field of {len} bytes too long")))
}

fn invalid(message: String) -> KdcError {
    KdcError::InvalidKeytab { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{derive_key_set, DEFAULT_ENCTYPES};

    fn sample() -> Keytab {
        let mut keytab = Keytab::new();
        for principal in ["alice@EXAMPLE.COM", "HTTP/localhost@EXAMPLE.COM"] {
            let keys = derive_key_set(principal, "pw", &DEFAULT_ENCTYPES).unwrap();
            for key in keys.iter() {
                keytab.push(KeytabEntry::new(principal, 1_700_000_000, 0, key));
            }
        }
        keytab
    }

    #[test]
    fn header_and_first_entry_layout() {
        let mut keytab = Keytab::new();
        keytab.push(KeytabEntry {
            principal: "a@R".to_string(),
            name_type: NT_PRINCIPAL,
            timestamp: 7,
            kvno: 3,
            etype: 23,
            key: vec![0xAA; 2],
        });
        let bytes = keytab.to_bytes().unwrap();
        let expected: &[u8] = &[
            0x05, 0x02, // version
            0, 0, 0, 27, // size
            0, 1, // components
            0, 1, b'R', // realm
            0, 1, b'a', // name
            0, 0, 0, 1, // name type
            0, 0, 0, 7, // timestamp
            3, // kvno8
            0, 23, // enctype
            0, 2, 0xAA, 0xAA, // key
            0, 0, 0, 3, // kvno32
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn parse_reads_what_was_written() {
        let keytab = sample();
        assert_eq!(keytab.len(), 6);
        let parsed = Keytab::parse(&keytab.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, keytab);

        let http: Vec<_> = parsed.entries_for("HTTP/localhost@EXAMPLE.COM").collect();
        assert_eq!(http.len(), 3);
        assert!(http.iter().all(|e| !e.key.is_empty() && e.encryption_key().is_some()));
    }

    #[test]
    fn holes_are_skipped() {
        let mut bytes = vec![0x05, 0x02];
        bytes.extend_from_slice(&(-5i32).to_be_bytes());
        bytes.extend_from_slice(&[0; 5]);
        bytes.extend_from_slice(&sample().to_bytes().unwrap()[2..]);
        assert_eq!(Keytab::parse(&bytes).unwrap().len(), 6);
    }

    #[test]
    fn legacy_version_is_read() {
        let mut entry = Vec::new();
        entry.extend_from_slice(&2u16.to_le_bytes()); // realm counted
        entry.extend_from_slice(&1u16.to_le_bytes());
        entry.push(b'R');
        entry.extend_from_slice(&1u16.to_le_bytes());
        entry.push(b'a');
        entry.extend_from_slice(&9u32.to_le_bytes());
        entry.push(4);
        entry.extend_from_slice(&18u16.to_le_bytes());
        entry.extend_from_slice(&1u16.to_le_bytes());
        entry.push(0x55);

        let mut bytes = vec![0x05, 0x01];
        bytes.extend_from_slice(&(entry.len() as i32).to_le_bytes());
        bytes.extend_from_slice(&entry);

        let parsed = Keytab::parse(&bytes).unwrap();
        let e = &parsed.entries()[0];
        assert_eq!(e.principal, "a@R");
        assert_eq!((e.timestamp, e.kvno, e.etype), (9, 4, 18));
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(Keytab::parse(&[]).is_err());
        assert!(Keytab::parse(&[0x05, 0x03]).is_err());
        assert!(Keytab::parse(&[0x05, 0x02, 0, 0, 0, 50, 0]).is_err());

        let mut no_realm = Keytab::new();
        no_realm.push(KeytabEntry {
            principal: "alice".to_string(),
            name_type: NT_PRINCIPAL,
            timestamp: 0,
            kvno: 0,
            etype: 18,
            key: vec![1],
        });
        assert!(no_realm.to_bytes().is_err());
    }

    #[test]
    fn atomic_write_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.keytab");
        std::fs::write(&path, b"stale").unwrap();

        sample().write_atomic(&path).unwrap();
        assert_eq!(Keytab::read(&path).unwrap(), sample());
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn atomic_write_to_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = sample()
            .write_atomic(&dir.path().join("missing").join("k.keytab"))
            .unwrap_err();
        assert!(matches!(err, KdcError::FileWrite { .. }));
    }
}
