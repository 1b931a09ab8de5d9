//! Filesystem ↔ store diffing.
//!
//! Compares a filesystem scan against the persisted file index and produces
//! three disjoint path sets: added, changed, deleted. A file counts as
//! changed when its content hash differs; matching mtime and size can skip
//! the hash when the caller opts in.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;

use crate::types::FileState;
use crate::types::ScannedFile;
use crate::types::content_hash;

/// Result of a diff pass. The three sets are disjoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FsDiff {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub deleted: Vec<String>,
}

impl FsDiff {
    /// True when nothing changed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.deleted.is_empty()
    }

    /// Number of paths needing (re)indexing.
    pub fn upsert_count(&self) -> usize {
        self.added.len() + self.changed.len()
    }
}

/// Diff a scan against the persisted state.
///
/// `trust_mtime` skips hashing files whose mtime and size both match the
/// stored row, assuming them unchanged.
pub fn compute_diff(
    root: &Path,
    scanned: &[ScannedFile],
    persisted: &HashMap<String, FileState>,
    trust_mtime: bool,
) -> FsDiff {
    let mut diff = FsDiff::default();
    let mut seen: HashSet<&str> = HashSet::with_capacity(scanned.len());

    for file in scanned {
        seen.insert(file.path.as_str());

        let Some(state) = persisted.get(&file.path) else {
            diff.added.push(file.path.clone());
            continue;
        };

        if trust_mtime && state.mtime == file.mtime && state.size == file.size {
            continue;
        }

        match hash_file(&root.join(&file.path)) {
            Some(hash) if hash == state.content_hash => {}
            Some(_) => diff.changed.push(file.path.clone()),
            // Unreadable between scan and hash: leave it alone this pass.
            None => {}
        }
    }

    for path in persisted.keys() {
        if !seen.contains(path.as_str()) {
            diff.deleted.push(path.clone());
        }
    }
    diff.deleted.sort();

    diff
}

/// Hash a file's content; None when unreadable.
pub fn hash_file(path: &Path) -> Option<String> {
    std::fs::read(path).ok().map(|bytes| content_hash(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scanned(path: &str, size: u64, mtime: i64) -> ScannedFile {
        ScannedFile {
            path: path.to_string(),
            size,
            mtime,
        }
    }

    fn state(hash: &str, size: u64, mtime: i64) -> FileState {
        FileState {
            content_hash: hash.to_string(),
            size,
            mtime,
        }
    }

    #[test]
    fn test_new_files_are_added() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}").unwrap();

        let diff = compute_diff(
            dir.path(),
            &[scanned("a.rs", 9, 100)],
            &HashMap::new(),
            false,
        );
        assert_eq!(diff.added, vec!["a.rs"]);
        assert!(diff.changed.is_empty());
        assert!(diff.deleted.is_empty());
    }

    #[test]
    fn test_changed_content_detected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() { new }").unwrap();

        let mut persisted = HashMap::new();
        persisted.insert("a.rs".to_string(), state("oldhash0000000000", 9, 100));

        let diff = compute_diff(dir.path(), &[scanned("a.rs", 14, 200)], &persisted, false);
        assert_eq!(diff.changed, vec!["a.rs"]);
    }

    #[test]
    fn test_unchanged_content_skipped() {
        let dir = TempDir::new().unwrap();
        let content = "fn a() {}";
        std::fs::write(dir.path().join("a.rs"), content).unwrap();
        let hash = content_hash(content.as_bytes());

        let mut persisted = HashMap::new();
        persisted.insert("a.rs".to_string(), state(&hash, 9, 100));

        // Even with a different mtime, matching hash means unchanged.
        let diff = compute_diff(dir.path(), &[scanned("a.rs", 9, 999)], &persisted, false);
        assert!(diff.is_empty());
    }

    #[test]
    fn test_trust_mtime_skips_hash() {
        let dir = TempDir::new().unwrap();
        // File content does not even exist on disk; the mtime+size match
        // short-circuits before hashing.
        let mut persisted = HashMap::new();
        persisted.insert("a.rs".to_string(), state("whatever", 9, 100));

        let diff = compute_diff(dir.path(), &[scanned("a.rs", 9, 100)], &persisted, true);
        assert!(diff.is_empty());
    }

    #[test]
    fn test_missing_files_are_deleted() {
        let dir = TempDir::new().unwrap();
        let mut persisted = HashMap::new();
        persisted.insert("gone.rs".to_string(), state("h", 1, 1));
        persisted.insert("also_gone.rs".to_string(), state("h", 1, 1));

        let diff = compute_diff(dir.path(), &[], &persisted, false);
        assert_eq!(diff.deleted, vec!["also_gone.rs", "gone.rs"]);
    }

    #[test]
    fn test_sets_are_disjoint() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("new.rs"), "new").unwrap();
        std::fs::write(dir.path().join("changed.rs"), "changed now").unwrap();

        let mut persisted = HashMap::new();
        persisted.insert("changed.rs".to_string(), state("stale", 11, 1));
        persisted.insert("deleted.rs".to_string(), state("h", 1, 1));

        let diff = compute_diff(
            dir.path(),
            &[scanned("new.rs", 3, 1), scanned("changed.rs", 11, 2)],
            &persisted,
            false,
        );
        assert_eq!(diff.added, vec!["new.rs"]);
        assert_eq!(diff.changed, vec!["changed.rs"]);
        assert_eq!(diff.deleted, vec!["deleted.rs"]);
    }
}
