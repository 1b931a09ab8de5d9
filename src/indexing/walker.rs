//! Filesystem walking with ignore rules.
//!
//! Honors nested `.gitignore` / `.ignore` files, always skips `.git`, and
//! enforces the per-file size cap. Binary detection sniffs the first 8 KiB
//! for NUL bytes at read time.

use std::path::Path;

use ignore::WalkBuilder;
use ignore::gitignore::GitignoreBuilder;

use crate::error::Result;
use crate::types::ScannedFile;
use crate::types::normalize_rel_path;

/// Bytes sniffed for the binary heuristic.
const BINARY_SNIFF_LEN: usize = 8192;

/// Filesystem walker.
pub struct Walker {
    max_file_size: u64,
}

impl Walker {
    /// Create a walker with a per-file size cap in bytes.
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    /// Walk the repository and return eligible files with size and mtime,
    /// sorted by path for deterministic batching.
    pub fn scan(&self, root: &Path) -> Result<Vec<ScannedFile>> {
        let walker = WalkBuilder::new(root)
            .hidden(false)
            .git_ignore(true)
            .git_exclude(true)
            .ignore(true)
            .filter_entry(|entry| entry.file_name() != std::ffi::OsStr::new(".git"))
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::debug!(error = %e, "walk entry error");
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }

            let Ok(metadata) = path.metadata() else {
                continue;
            };
            if metadata.len() > self.max_file_size {
                tracing::debug!(path = %path.display(), size = metadata.len(), "skipping oversized file");
                continue;
            }

            let mtime = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);

            files.push(ScannedFile {
                path: normalize_rel_path(root, path),
                size: metadata.len(),
                mtime,
            });
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    /// Per-file size cap.
    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }
}

/// Check whether a path is excluded by ignore rules.
///
/// Used on watcher events, which bypass the walk: `.git` is always
/// excluded, and `.gitignore` files between the root and the file are
/// applied in order.
pub fn is_ignored(root: &Path, path: &Path) -> bool {
    let rel = match path.strip_prefix(root) {
        Ok(rel) => rel,
        Err(_) => return true,
    };
    if rel.components().any(|c| c.as_os_str() == ".git") {
        return true;
    }

    let mut builder = GitignoreBuilder::new(root);
    let root_ignore = root.join(".gitignore");
    if root_ignore.is_file() {
        builder.add(root_ignore);
    }
    let mut dir = root.to_path_buf();
    for component in rel.components().take(rel.components().count().saturating_sub(1)) {
        dir.push(component);
        let nested = dir.join(".gitignore");
        if nested.is_file() {
            builder.add(nested);
        }
    }

    match builder.build() {
        Ok(gitignore) => gitignore
            .matched_path_or_any_parents(path, false)
            .is_ignore(),
        Err(_) => false,
    }
}

/// Heuristic binary check over the first 8 KiB: any NUL byte means binary.
pub fn is_probably_binary(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .take(BINARY_SNIFF_LEN)
        .any(|&b| b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, rel: &str, content: &str) {
        let path = dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scan_collects_files_sorted() {
        let dir = TempDir::new().unwrap();
        write(&dir, "b.rs", "fn b() {}");
        write(&dir, "a.rs", "fn a() {}");
        write(&dir, "src/c.rs", "fn c() {}");

        let files = Walker::new(1_048_576).scan(dir.path()).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.rs", "b.rs", "src/c.rs"]);
    }

    #[test]
    fn test_scan_skips_git_dir() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.rs", "fn a() {}");
        write(&dir, ".git/HEAD", "ref: refs/heads/main");

        let files = Walker::new(1_048_576).scan(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "a.rs");
    }

    #[test]
    fn test_scan_honors_gitignore() {
        let dir = TempDir::new().unwrap();
        write(&dir, ".gitignore", "target/\n");
        write(&dir, "a.rs", "fn a() {}");
        write(&dir, "target/debug/out.rs", "generated");

        let files = Walker::new(1_048_576).scan(dir.path()).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert!(paths.contains(&"a.rs"));
        assert!(!paths.iter().any(|p| p.starts_with("target/")));
    }

    #[test]
    fn test_scan_skips_oversized() {
        let dir = TempDir::new().unwrap();
        write(&dir, "small.rs", "fn s() {}");
        write(&dir, "large.rs", &"x".repeat(2048));

        let files = Walker::new(1024).scan(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "small.rs");
    }

    #[test]
    fn test_is_ignored() {
        let dir = TempDir::new().unwrap();
        write(&dir, ".gitignore", "*.log\n");
        write(&dir, "app.log", "log line");
        write(&dir, "app.rs", "fn main() {}");

        assert!(is_ignored(dir.path(), &dir.path().join("app.log")));
        assert!(!is_ignored(dir.path(), &dir.path().join("app.rs")));
        assert!(is_ignored(dir.path(), &dir.path().join(".git/config")));
    }

    #[test]
    fn test_binary_detection() {
        assert!(!is_probably_binary(b"plain text content"));
        assert!(is_probably_binary(b"binary\x00content"));
        assert!(!is_probably_binary(b""));
    }
}
