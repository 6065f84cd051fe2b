// ── Versioned snapshot store ──
//
// Copy-on-write: readers load the current `Arc<Snapshot>` lock-free and
// keep it as long as they like; merges are serialized behind one mutex,
// build a new snapshot and swap it in. Every published snapshot is also
// pushed to subscribers through a `watch` channel.

use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tracing::trace;

use super::delta::Delta;
use super::snapshot::Snapshot;
use crate::stream::SnapshotStream;

/// Single source of truth for panel, circuit and statistic state.
pub struct SnapshotStore {
    current: ArcSwap<Snapshot>,
    writer: Mutex<()>,
    published: watch::Sender<Arc<Snapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        let initial = Arc::new(Snapshot::default());
        let (published, _) = watch::channel(Arc::clone(&initial));
        Self {
            current: ArcSwap::new(initial),
            writer: Mutex::new(()),
            published,
        }
    }

    /// Immutable view of the current state. Never blocks.
    pub fn read(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn version(&self) -> u64 {
        self.current.load().version
    }

    /// Apply one delta atomically. Returns the new version.
    pub fn merge(&self, delta: Delta) -> u64 {
        self.merge_all(std::iter::once(delta))
    }

    /// Apply several deltas as one atomic step with a single version bump.
    ///
    /// Readers see either none or all of them. The version increases even
    /// when `deltas` is empty.
    pub fn merge_all(&self, deltas: impl IntoIterator<Item = Delta>) -> u64 {
        // A panic mid-merge never publishes, so the guarded state is
        // still the last good snapshot.
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = Snapshot::clone(&self.current.load());
        let mut applied = 0_usize;
        for delta in deltas {
            next.apply(delta);
            applied += 1;
        }
        next.version += 1;
        let version = next.version;

        let next = Arc::new(next);
        self.current.store(Arc::clone(&next));
        self.published.send_replace(next);

        trace!(version, applied, "snapshot merged");
        version
    }

    /// Subscribe to published snapshots.
    pub fn subscribe(&self) -> SnapshotStream {
        SnapshotStream::new(self.published.subscribe())
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}
