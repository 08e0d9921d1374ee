//! Per-partition append-only journal.
//!
//! Every accepted add is appended as a bincode-serialized, length-prefixed
//! record before the partition's in-memory view changes. Opening a partition
//! replays its journal. A torn final record (short length or body) is
//! treated as the end of the journal.

use super::entry::Entry;
use crate::core::error::{KdcError, KdcResult};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// Journal file name inside a partition directory.
pub const JOURNAL_FILE: &str = "entries.journal";

/// Journaled operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JournalOp {
    /// Entry added.
    Add(Entry),
}

/// A single journal record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    /// Sequence number, starting at 1.
    pub seq: u64,
    /// Wall-clock time of the append (for diagnostics).
    pub timestamp_ms: u64,
    /// The operation.
    pub op: JournalOp,
}

impl JournalRecord {
    fn new(seq: u64, op: JournalOp) -> Self {
        Self {
            seq,
            timestamp_ms: chrono::Utc::now().timestamp_millis().max(0) as u64,
            op,
        }
    }

    /// Serialize this record to bytes.
    pub fn serialize(&self) -> KdcResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| KdcError::Io(std::io::Error::other(e)))
    }

    /// Deserialize a record from bytes.
    pub fn deserialize(bytes: &[u8]) -> KdcResult<Self> {
        bincode::deserialize(bytes).map_err(|e| KdcError::Io(std::io::Error::other(e)))
    }
}

/// Append handle on a journal file.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    next_seq: u64,
}

impl Journal {
    /// Open (creating if needed) the journal in `dir` and replay it.
    pub fn open(dir: &Path) -> KdcResult<(Self, Vec<JournalRecord>)> {
        let path = dir.join(JOURNAL_FILE);
        let records = Self::replay(&path)?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let next_seq = records.last().map(|r| r.seq + 1).unwrap_or(1);
        Ok((
            Self {
                path,
                writer: Some(BufWriter::new(file)),
                next_seq,
            },
            records,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every complete record from `path`.
    pub fn replay(path: &Path) -> KdcResult<Vec<JournalRecord>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut len_buf = [0u8; 4];
        loop {
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut body = vec![0u8; len];
            match reader.read_exact(&mut body) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    tracing::warn!(path = %path.display(), "ignoring torn journal record");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
            records.push(JournalRecord::deserialize(&body)?);
        }
        Ok(records)
    }

    /// Append and flush one operation.
    pub fn append(&mut self, op: JournalOp) -> KdcResult<u64> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            KdcError::Io(std::io::Error::other(format!(
                "journal {} is closed",
                self.path.display()
            )))
        })?;
        let record = JournalRecord::new(self.next_seq, op);
        let bytes = record.serialize()?;
        writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        self.next_seq += 1;
        Ok(record.seq)
    }

    /// Flush, sync and release the file.
    pub fn close(&mut self) -> KdcResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Replace the writer with a read-only handle holding unflushed bytes,
    /// so the next `close` fails.
    #[cfg(test)]
    pub(crate) fn jam_writer(&mut self) -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::open(&self.path)?);
        writer.write_all(b"pending")?;
        self.writer = Some(writer);
        Ok(())
    }
}
