//! Indexing status shared with concurrent readers.
//!
//! Writers replace the snapshot once per file group; readers clone it. The
//! lock is held only for the copy, never across I/O.

use std::sync::Arc;
use std::sync::RwLock;

use serde::Deserialize;
use serde::Serialize;

/// Point-in-time indexing state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStatus {
    /// True while a pass is running.
    pub indexing: bool,
    /// Overall progress, 0..=100.
    pub progress: u8,
    pub total_files: u64,
    pub processed_files: u64,
    pub total_chunks: u64,
    pub indexed_chunks: u64,
    /// File currently being processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
}

/// Shared handle to the status snapshot.
#[derive(Debug, Clone, Default)]
pub struct StatusHandle {
    inner: Arc<RwLock<IndexStatus>>,
}

impl StatusHandle {
    /// Create a handle with an idle status.
    pub fn new() -> Self {
        Self::default()
    }

    /// Coherent copy of the current status.
    pub fn snapshot(&self) -> IndexStatus {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Atomically update the status.
    pub fn update(&self, f: impl FnOnce(&mut IndexStatus)) {
        let mut status = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut status);
    }

    /// Mark a pass started with a known file total.
    pub fn begin(&self, total_files: u64) {
        self.update(|status| {
            status.indexing = true;
            status.progress = 0;
            status.total_files = total_files;
            status.processed_files = 0;
            status.current_file = None;
        });
    }

    /// Record group completion.
    pub fn advance(&self, processed: u64, indexed_chunks: u64, current_file: Option<String>) {
        self.update(|status| {
            status.processed_files = processed;
            status.indexed_chunks = indexed_chunks;
            status.current_file = current_file;
            status.progress = if status.total_files == 0 {
                100
            } else {
                ((processed * 100) / status.total_files).min(100) as u8
            };
        });
    }

    /// Mark the pass finished.
    pub fn finish(&self, total_chunks: u64) {
        self.update(|status| {
            status.indexing = false;
            status.progress = 100;
            status.total_chunks = total_chunks;
            status.indexed_chunks = total_chunks;
            status.current_file = None;
        });
    }
}

/// Textual progress bar for the status surface.
pub fn render_progress_bar(progress: u8, width: usize) -> String {
    let progress = progress.min(100) as usize;
    let filled = (progress * width) / 100;
    let mut bar = String::with_capacity(width + 8);
    bar.push('[');
    for i in 0..width {
        bar.push(if i < filled { '=' } else { ' ' });
    }
    bar.push(']');
    bar.push_str(&format!(" {progress:>3}%"));
    bar
}
