//! File watcher.
//!
//! Observes the repository subtree with a debounce window and posts
//! normalized events into the [`EventQueue`]. The watcher never touches the
//! store; the index engine consumes the queue. Dropping (or stopping) the
//! watcher cancels in-flight debounces.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::DebounceEventResult;
use notify_debouncer_mini::Debouncer;
use notify_debouncer_mini::new_debouncer;
use notify_debouncer_mini::notify::RecommendedWatcher;

use crate::error::CoderagErr;
use crate::error::Result;
use crate::indexing::queue::EventQueue;
use crate::indexing::queue::WatchEventKind;
use crate::indexing::walker::is_ignored;

/// Watches a repository root and feeds the event queue.
pub struct FileWatcher {
    debouncer: Option<Debouncer<RecommendedWatcher>>,
    queue: Arc<EventQueue>,
}

impl FileWatcher {
    /// Start watching `root` recursively.
    ///
    /// Events are debounced for `debounce` (at least 200 ms), normalized to
    /// created/modified/deleted by checking the path, filtered through the
    /// ignore rules, and pushed into `queue`.
    pub fn start(root: &Path, debounce: Duration, queue: Arc<EventQueue>) -> Result<Self> {
        let root_buf = root.to_path_buf();
        let handler_queue = queue.clone();

        let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in events {
                        handle_event(&root_buf, &handler_queue, event.path);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "watch error");
                }
            }
        })
        .map_err(|e| CoderagErr::Io {
            path: root.to_path_buf(),
            cause: format!("failed to start watcher: {e}"),
        })?;

        debouncer
            .watcher()
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| CoderagErr::Io {
                path: root.to_path_buf(),
                cause: format!("failed to watch root: {e}"),
            })?;

        tracing::info!(root = %root.display(), debounce_ms = debounce.as_millis() as u64, "file watcher started");

        Ok(Self {
            debouncer: Some(debouncer),
            queue,
        })
    }

    /// Stop watching: cancels in-flight debounces and drains the queue.
    pub fn stop(mut self) {
        self.debouncer.take();
        self.queue.clear();
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.debouncer.take();
    }
}

/// Classify and enqueue one debounced event.
///
/// The mini-debouncer reports paths without an add/modify/remove kind, so
/// the kind is recovered from the filesystem: a missing path is a deletion,
/// an existing file is a modification. Directory events are dropped; their
/// contained files produce their own events.
fn handle_event(root: &Path, queue: &EventQueue, path: PathBuf) {
    if path.is_dir() {
        return;
    }

    let kind = if path.exists() {
        WatchEventKind::Modified
    } else {
        WatchEventKind::Deleted
    };

    // Ignore rules only apply to live files; deletions must pass through so
    // stale rows are removed even when an ignore file appeared meanwhile.
    if kind != WatchEventKind::Deleted && is_ignored(root, &path) {
        return;
    }

    tracing::debug!(path = %path.display(), ?kind, "watch event");
    queue.push(path, kind);
}
