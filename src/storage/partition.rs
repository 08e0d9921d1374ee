//! A directory partition: one naming context with attribute indexes.

use super::dn::Dn;
use super::entry::Entry;
use super::journal::{Journal, JournalOp};
use crate::core::error::{KdcError, KdcResult};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Equality index: lowercase value -> normalized DNs.
type Index = BTreeMap<String, BTreeSet<String>>;

/// Entries under one suffix, backed by a journal.
#[derive(Debug)]
pub struct Partition {
    id: String,
    suffix: Dn,
    dir: PathBuf,
    entries: BTreeMap<String, Entry>,
    indexes: BTreeMap<String, Index>,
    journal: Journal,
}

impl Partition {
    /// Open the partition stored in `dir`, replaying its journal.
    pub fn open(id: &str, suffix: Dn, dir: &Path, indexed: &[&str]) -> KdcResult<Self> {
        let start_err = |message: String| KdcError::PartitionStart {
            partition: id.to_string(),
            message,
        };
        std::fs::create_dir_all(dir)
            .map_err(|e| start_err(format!("cannot create {}: {e}", dir.display())))?;
        let (journal, records) = Journal::open(dir).map_err(|e| start_err(e.to_string()))?;

        let mut partition = Self {
            id: id.to_string(),
            suffix,
            dir: dir.to_path_buf(),
            entries: BTreeMap::new(),
            indexes: indexed
                .iter()
                .map(|a| (a.to_ascii_lowercase(), Index::new()))
                .collect(),
            journal,
        };
        for record in records {
            let JournalOp::Add(entry) = record.op;
            partition.insert(entry);
        }
        debug!(
            partition = %partition.id,
            suffix = %partition.suffix,
            entries = partition.entries.len(),
            "partition opened"
        );
        Ok(partition)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    #[cfg(test)]
    pub(crate) fn journal_mut(&mut self) -> &mut Journal {
        &mut self.journal
    }

    pub fn suffix(&self) -> &Dn {
        &self.suffix
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `dn` belongs to this partition.
    pub fn holds(&self, dn: &Dn) -> bool {
        dn.is_within(&self.suffix)
    }

    pub fn is_indexed(&self, attr: &str) -> bool {
        self.indexes.contains_key(&attr.to_ascii_lowercase())
    }

    /// Add a new entry. Its parent must exist unless it is the suffix entry.
    pub fn add(&mut self, entry: Entry) -> KdcResult<()> {
        let key = entry.dn().normalized();
        if self.entries.contains_key(&key) {
            return Err(KdcError::DuplicateEntry {
                dn: entry.dn().to_string(),
            });
        }
        if entry.dn() != &self.suffix {
            let parent = entry.dn().parent().map(|p| p.normalized());
            if !parent.is_some_and(|p| self.entries.contains_key(&p)) {
                return Err(KdcError::SchemaViolation {
                    dn: entry.dn().to_string(),
                    message: "parent entry does not exist".to_string(),
                });
            }
        }

        self.journal.append(JournalOp::Add(entry.clone()))?;
        self.insert(entry);
        Ok(())
    }

    fn insert(&mut self, entry: Entry) {
        let key = entry.dn().normalized();
        for (attr, index) in self.indexes.iter_mut() {
            for value in entry.get(attr).unwrap_or(&[]) {
                index
                    .entry(value.to_lowercase())
                    .or_default()
                    .insert(key.clone());
            }
        }
        self.entries.insert(key, entry);
    }

    pub fn lookup(&self, dn: &Dn) -> Option<&Entry> {
        self.entries.get(&dn.normalized())
    }

    /// Entries at or below `base` whose `attr` has `value` (case-insensitive).
    pub fn search(&self, base: &Dn, attr: &str, value: &str) -> Vec<&Entry> {
        let wanted = value.to_lowercase();
        let candidates: Vec<&Entry> = match self.indexes.get(&attr.to_ascii_lowercase()) {
            Some(index) => index
                .get(&wanted)
                .into_iter()
                .flatten()
                .filter_map(|key| self.entries.get(key))
                .collect(),
            None => self
                .entries
                .values()
                .filter(|e| {
                    e.get(attr)
                        .unwrap_or(&[])
                        .iter()
                        .any(|v| v.to_lowercase() == wanted)
                })
                .collect(),
        };
        candidates
            .into_iter()
            .filter(|e| e.dn().is_within(base))
            .collect()
    }

    /// Flush and close the journal.
    pub fn close(&mut self) -> KdcResult<()> {
        self.journal.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    fn open(dir: &Path) -> Partition {
        Partition::open("example", dn("dc=example,dc=com"), dir, &["objectClass", "ou"]).unwrap()
    }

    fn seed(p: &mut Partition) {
        p.add(Entry::new(dn("dc=example,dc=com")).with("objectClass", "domain"))
            .unwrap();
        p.add(
            Entry::new(dn("ou=users,dc=example,dc=com"))
                .with("objectClass", "organizationalUnit")
                .with("ou", "users"),
        )
        .unwrap();
        p.add(Entry::new(dn("uid=alice,ou=users,dc=example,dc=com")).with("uid", "Alice"))
            .unwrap();
    }

    #[test]
    fn add_lookup_search() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = open(dir.path());
        seed(&mut p);

        assert_eq!(p.len(), 3);
        assert!(p.lookup(&dn("UID=ALICE,ou=users,dc=example,dc=com")).is_some());
        let base = dn("dc=example,dc=com");
        assert_eq!(p.search(&base, "ou", "USERS").len(), 1);
        assert_eq!(p.search(&base, "uid", "alice").len(), 1);
        assert!(p.search(&dn("ou=groups,dc=example,dc=com"), "uid", "alice").is_empty());
    }

    #[test]
    fn rejects_duplicates_and_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = open(dir.path());
        seed(&mut p);

        let dup = p.add(Entry::new(dn("ou=users,dc=example,dc=com")));
        assert!(matches!(dup, Err(KdcError::DuplicateEntry { .. })));
        let orphan = p.add(Entry::new(dn("uid=x,ou=missing,dc=example,dc=com")));
        assert!(matches!(orphan, Err(KdcError::SchemaViolation { .. })));
    }

    #[test]
    fn reopen_replays_and_reindexes() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut p = open(dir.path());
            seed(&mut p);
            p.close().unwrap();
        }
        let p = open(dir.path());
        assert_eq!(p.len(), 3);
        assert_eq!(
            p.search(&dn("dc=example,dc=com"), "objectClass", "organizationalunit").len(),
            1
        );
    }
}
