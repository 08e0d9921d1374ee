//! Recursive working-directory teardown.
//!
//! Deletion is an explicit post-order walk over a [`FileTree`]. A node that
//! cannot be listed or removed is recorded and skipped; the walk always visits
//! every reachable node and reports all failures at once.

use std::io;
use std::path::{Path, PathBuf};

/// Minimal filesystem surface needed to delete a tree.
pub trait FileTree {
    /// Whether `path` exists (without following a final symlink).
    fn exists(&self, path: &Path) -> bool;
    /// Whether `path` is a directory (symlinks are treated as files).
    fn is_dir(&self, path: &Path) -> io::Result<bool>;
    /// Direct children of a directory.
    fn children(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
    /// Remove a file or symlink.
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    /// Remove an empty directory.
    fn remove_dir(&self, path: &Path) -> io::Result<()>;
}

/// The local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl FileTree for LocalFs {
    fn exists(&self, path: &Path) -> bool {
        std::fs::symlink_metadata(path).is_ok()
    }

    fn is_dir(&self, path: &Path) -> io::Result<bool> {
        Ok(std::fs::symlink_metadata(path)?.is_dir())
    }

    fn children(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        std::fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect()
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_dir(path)
    }
}

/// Outcome of [`delete_tree`].
#[derive(Debug, Default)]
pub struct DeleteReport {
    /// Number of nodes removed.
    pub removed: usize,
    /// Nodes that could not be listed or removed.
    pub failures: Vec<(PathBuf, io::Error)>,
}

impl DeleteReport {
    /// Whether every node was removed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Emit a single warning summarizing all failures.
    pub fn log_failures(&self, root: &Path) {
        if self.is_clean() {
            return;
        }
        let detail: Vec<String> = self
            .failures
            .iter()
            .map(|(path, err)| format!("{}: {}", path.display(), err))
            .collect();
        tracing::warn!(
            root = %root.display(),
            failed = self.failures.len(),
            removed = self.removed,
            details = %detail.join("; "),
            "could not delete working directory completely"
        );
    }
}

enum Visit {
    Enter(PathBuf),
    Leave(PathBuf),
}

/// Delete `root` and everything beneath it.
///
/// A missing root is not an error.
pub fn delete_tree(fs: &dyn FileTree, root: &Path) -> DeleteReport {
    let mut report = DeleteReport::default();
    if !fs.exists(root) {
        return report;
    }

    let mut stack = vec![Visit::Enter(root.to_path_buf())];
    while let Some(visit) = stack.pop() {
        match visit {
            Visit::Enter(path) => match fs.is_dir(&path) {
                Ok(true) => match fs.children(&path) {
                    Ok(children) => {
                        stack.push(Visit::Leave(path));
                        stack.extend(children.into_iter().map(Visit::Enter));
                    }
                    Err(e) => report.failures.push((path, e)),
                },
                Ok(false) => match fs.remove_file(&path) {
                    Ok(()) => report.removed += 1,
                    Err(e) => report.failures.push((path, e)),
                },
                Err(e) => report.failures.push((path, e)),
            },
            Visit::Leave(path) => match fs.remove_dir(&path) {
                Ok(()) => report.removed += 1,
                Err(e) => report.failures.push((path, e)),
            },
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, BTreeSet};

    #[test]
    fn deletes_nested_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("instance");
        std::fs::create_dir_all(root.join("partitions/system")).unwrap();
        std::fs::write(root.join("krb5.conf"), "x").unwrap();
        std::fs::write(root.join("partitions/system/journal"), "y").unwrap();

        let report = delete_tree(&LocalFs, &root);
        assert!(report.is_clean());
        assert_eq!(report.removed, 5);
        assert!(!root.exists());
    }

    #[test]
    fn missing_root_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let report = delete_tree(&LocalFs, &dir.path().join("absent"));
        assert!(report.is_clean());
        assert_eq!(report.removed, 0);
    }

    /// In-memory tree whose `locked` file refuses deletion.
    struct FakeTree {
        dirs: Mutex<BTreeSet<PathBuf>>,
        files: Mutex<BTreeMap<PathBuf, bool>>,
    }

    impl FakeTree {
        fn new() -> Self {
            let dirs = ["/w", "/w/a", "/w/b"].iter().map(PathBuf::from).collect();
            let files = [("/w/a/ok", false), ("/w/b/locked", true), ("/w/top", false)]
                .iter()
                .map(|(p, locked)| (PathBuf::from(p), *locked))
                .collect();
            Self {
                dirs: Mutex::new(dirs),
                files: Mutex::new(files),
            }
        }
    }

    impl FileTree for FakeTree {
        fn exists(&self, path: &Path) -> bool {
            self.dirs.lock().contains(path) || self.files.lock().contains_key(path)
        }

        fn is_dir(&self, path: &Path) -> io::Result<bool> {
            Ok(self.dirs.lock().contains(path))
        }

        fn children(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
            let dirs = self.dirs.lock();
            let files = self.files.lock();
            Ok(dirs
                .iter()
                .chain(files.keys())
                .filter(|p| p.parent() == Some(path))
                .cloned()
                .collect())
        }

        fn remove_file(&self, path: &Path) -> io::Result<()> {
            let mut files = self.files.lock();
            if files.get(path) == Some(&true) {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            files.remove(path);
            Ok(())
        }

        fn remove_dir(&self, path: &Path) -> io::Result<()> {
            let has_children = self
                .files
                .lock()
                .keys()
                .chain(self.dirs.lock().iter())
                .any(|p| p.parent() == Some(path));
            if has_children {
                return Err(io::Error::new(io::ErrorKind::Other, "directory not empty"));
            }
            self.dirs.lock().remove(path);
            Ok(())
        }
    }

    #[test]
    fn continues_past_failures() {
        let fs = FakeTree::new();
        let report = delete_tree(&fs, Path::new("/w"));

        let failed: Vec<&Path> = report.failures.iter().map(|(p, _)| p.as_path()).collect();
        assert_eq!(
            failed.iter().collect::<BTreeSet<_>>(),
            [Path::new("/w/b/locked"), Path::new("/w/b"), Path::new("/w")]
                .iter()
                .collect::<BTreeSet<_>>()
        );
        // `a`, `a/ok` and `top` are gone despite the failure under `b`.
        assert!(!fs.exists(Path::new("/w/a")));
        assert!(!fs.exists(Path::new("/w/top")));
        assert_eq!(report.removed, 3);
    }
}
