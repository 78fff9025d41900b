use std::{collections::BTreeMap, num::NonZeroU64, ops::RangeInclusive, sync::Arc};

use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, watch};

use crate::types::SourceId;

/// Last block height fully scanned for one source.
///
/// Only moves forward, and only after every event of the range following it has been queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanCursor {
    last_scanned_height: u64,
}

impl ScanCursor {
    #[must_use]
    pub const fn new(last_scanned_height: u64) -> Self {
        Self { last_scanned_height }
    }

    #[must_use]
    pub const fn last_scanned_height(&self) -> u64 {
        self.last_scanned_height
    }

    /// First height not yet scanned.
    #[must_use]
    pub const fn next_height(&self) -> u64 {
        self.last_scanned_height.saturating_add(1)
    }

    /// The next range to fetch given chain head `latest`, at most `batch_size` blocks long.
    ///
    /// `None` when the cursor already caught up with `latest`.
    #[must_use]
    pub fn next_batch(&self, latest: u64, batch_size: NonZeroU64) -> Option<RangeInclusive<u64>> {
        let start = self.last_scanned_height.checked_add(1)?;
        if start > latest {
            return None;
        }
        let end = start.saturating_add(batch_size.get() - 1).min(latest);
        Some(start..=end)
    }

    /// Moves the cursor to `height`. Lower heights are ignored.
    pub fn advance_to(&mut self, height: u64) {
        self.last_scanned_height = self.last_scanned_height.max(height);
    }
}

/// Where a source is in its scan cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    #[default]
    Idle,
    Fetching,
    Advancing,
    Error,
}

/// Observable progress of one source, published after every state change.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SourceProgress {
    pub last_scanned_height: u64,
    pub events_processed: u64,
    pub state: ScanState,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

/// A cursor, its exclusive lock and the progress it publishes.
#[derive(Debug)]
pub(crate) struct CursorSlot {
    cursor: Mutex<ScanCursor>,
    progress: watch::Sender<SourceProgress>,
}

impl CursorSlot {
    pub(crate) fn new(last_scanned_height: u64) -> Self {
        let progress = SourceProgress { last_scanned_height, ..SourceProgress::default() };
        Self {
            cursor: Mutex::new(ScanCursor::new(last_scanned_height)),
            progress: watch::Sender::new(progress),
        }
    }

    /// Acquires the source's exclusive scan lock.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, ScanCursor> {
        self.cursor.lock().await
    }

    pub(crate) fn progress(&self) -> SourceProgress {
        self.progress.borrow().clone()
    }

    pub(crate) fn update(&self, modify: impl FnOnce(&mut SourceProgress)) {
        self.progress.send_modify(modify);
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SourceProgress> {
        self.progress.subscribe()
    }
}

/// Every cursor owned by the scanner, keyed by source identity.
#[derive(Debug, Clone, Default)]
pub struct CursorTable {
    slots: BTreeMap<SourceId, Arc<CursorSlot>>,
}

impl CursorTable {
    pub(crate) fn insert(&mut self, id: SourceId, last_scanned_height: u64) -> Arc<CursorSlot> {
        let slot = Arc::new(CursorSlot::new(last_scanned_height));
        self.slots.insert(id, Arc::clone(&slot));
        slot
    }

    #[must_use]
    pub fn contains(&self, id: &SourceId) -> bool {
        self.slots.contains_key(id)
    }

    /// Progress of a single source.
    #[must_use]
    pub fn progress(&self, id: &SourceId) -> Option<SourceProgress> {
        self.slots.get(id).map(|slot| slot.progress())
    }

    /// Follows progress updates of a single source.
    #[must_use]
    pub fn watch(&self, id: &SourceId) -> Option<watch::Receiver<SourceProgress>> {
        self.slots.get(id).map(|slot| slot.subscribe())
    }

    /// Progress of every source, ordered by identity.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(SourceId, SourceProgress)> {
        self.slots.iter().map(|(id, slot)| (id.clone(), slot.progress())).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
