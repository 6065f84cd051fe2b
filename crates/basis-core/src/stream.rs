// ── Reactive snapshot stream ──
//
// Subscription type for consuming snapshot changes from the store.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::store::Snapshot;

/// A subscription to the snapshot store.
///
/// Provides both point-in-time access and change notification via
/// [`changed()`](Self::changed) or by converting to a `Stream`.
pub struct SnapshotStream {
    current: Arc<Snapshot>,
    receiver: watch::Receiver<Arc<Snapshot>>,
}

impl SnapshotStream {
    pub(crate) fn new(mut receiver: watch::Receiver<Arc<Snapshot>>) -> Self {
        let current = receiver.borrow_and_update().clone();
        Self { current, receiver }
    }

    /// The snapshot seen at creation or at the last `changed()`.
    pub fn current(&self) -> &Arc<Snapshot> {
        &self.current
    }

    /// The latest published snapshot.
    pub fn latest(&self) -> Arc<Snapshot> {
        self.receiver.borrow().clone()
    }

    /// Wait for a newer snapshot. Intermediate versions may be skipped.
    /// Returns `None` once the store has been dropped.
    pub async fn changed(&mut self) -> Option<Arc<Snapshot>> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = Arc::clone(&snap);
        Some(snap)
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    ///
    /// The stream yields the current snapshot first, then each newer one.
    pub fn into_stream(self) -> SnapshotWatchStream {
        SnapshotWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
pub struct SnapshotWatchStream {
    inner: WatchStream<Arc<Snapshot>>,
}

impl Stream for SnapshotWatchStream {
    type Item = Arc<Snapshot>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
