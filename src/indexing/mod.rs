//! Incremental indexing pipeline.
//!
//! Filesystem walking with ignore rules, change detection, the batch index
//! engine, the debounced file watcher, and the shared status snapshot.

pub mod diff;
pub mod engine;
pub mod progress;
pub mod queue;
pub mod walker;
pub mod watcher;

pub use diff::FsDiff;
pub use diff::compute_diff;
pub use engine::IndexEngine;
pub use engine::IndexOutcome;
pub use engine::RebuildMode;
pub use progress::IndexStatus;
pub use progress::StatusHandle;
pub use progress::render_progress_bar;
pub use queue::EventQueue;
pub use queue::WatchEventKind;
pub use walker::Walker;
pub use watcher::FileWatcher;
