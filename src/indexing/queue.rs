//! Watch event queue with per-path merging.
//!
//! Multiple events for the same path collapse into one:
//! - Deleted always wins over earlier events,
//! - Created followed by Modified stays Created (the file is still new to
//!   the index),
//! - Deleted followed by Created becomes Created (recreated file).
//!
//! Pushes are synchronous so the watcher's callback thread can enqueue
//! directly; consumers await [`EventQueue::notified`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use tokio::sync::Notify;

/// Kind of filesystem change observed for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Modified,
    Deleted,
}

/// Merge two events for the same path, newest second.
pub fn merge_events(existing: WatchEventKind, new: WatchEventKind) -> WatchEventKind {
    match (existing, new) {
        (_, WatchEventKind::Deleted) => WatchEventKind::Deleted,
        (WatchEventKind::Deleted, _) => new,
        (WatchEventKind::Created, WatchEventKind::Modified) => WatchEventKind::Created,
        _ => new,
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingEvent {
    kind: WatchEventKind,
    first_seen: Instant,
}

/// Bounded-by-dedup event queue.
///
/// The map holds at most one entry per path, so a burst of events for the
/// same file costs one slot regardless of length.
#[derive(Debug, Default)]
pub struct EventQueue {
    pending: Mutex<HashMap<PathBuf, PendingEvent>>,
    notify: Notify,
}

impl EventQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an event, merging with any pending event for the path.
    pub fn push(&self, path: PathBuf, kind: WatchEventKind) {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pending
            .entry(path)
            .and_modify(|event| event.kind = merge_events(event.kind, kind))
            .or_insert(PendingEvent {
                kind,
                first_seen: Instant::now(),
            });
        drop(pending);
        self.notify.notify_one();
    }

    /// Pop the oldest pending event, FIFO by first observation.
    pub fn pop(&self) -> Option<(PathBuf, WatchEventKind)> {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let oldest = pending
            .iter()
            .min_by_key(|(_, event)| event.first_seen)
            .map(|(path, event)| (path.clone(), event.kind));
        if let Some((path, _)) = &oldest {
            pending.remove(path);
        }
        oldest
    }

    /// Drain every pending event, FIFO by first observation.
    pub fn drain(&self) -> Vec<(PathBuf, WatchEventKind)> {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut events: Vec<_> = pending
            .drain()
            .map(|(path, event)| (path, event.kind, event.first_seen))
            .collect();
        events.sort_by_key(|(_, _, at)| *at);
        events.into_iter().map(|(path, kind, _)| (path, kind)).collect()
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all pending events.
    pub fn clear(&self) {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    /// Wait until an event is pushed.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}
