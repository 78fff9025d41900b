//! The Event Scanner: one timer-driven task per tracked source.
//!
//! Each task runs the source's state machine (`IDLE → FETCHING → ADVANCING | ERROR → IDLE`)
//! once per loop interval. A cycle scans from the source's cursor up to the chain head in
//! batches of at most `batch_size` blocks and hands the decoded events to the delivery queue.
//!
//! # Cursors
//!
//! Every source owns its own [`ScanCursor`]. The cursor only advances after a batch was fetched
//! and all of its events were queued, so a failed cycle leaves nothing half-done: the next cycle
//! fetches the very same range again.
//!
//! # Ordering
//!
//! Within a source, events are queued in the order the Source Client returned them (block number,
//! then log index). There is no ordering across sources.
//!
//! # Backpressure
//!
//! A full delivery queue suspends the producing scan task. A sink that never returns therefore
//! eventually stalls scanning; events are never dropped to make room.

mod builder;
mod cursor;
mod handle;
mod source_scanner;

use std::{collections::BTreeMap, num::NonZeroU64, sync::Arc, time::Duration};

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

pub use builder::{
    DEFAULT_BATCH_PAUSE, DEFAULT_BATCH_SIZE, DEFAULT_LOOP_INTERVAL, DEFAULT_SOURCE_PAUSE,
    EventScannerBuilder, StartHeight,
};
pub use cursor::{CursorTable, ScanCursor, ScanState, SourceProgress};
pub use handle::ScannerHandle;
pub use source_scanner::{ScanReport, SourceScanner};

use crate::{
    delivery::QueueSender,
    error::ScannerError,
    source::SourceClient,
    types::{ChainId, TrackedSource},
};

#[derive(Debug, Clone)]
pub(crate) struct ScanConfig {
    pub(crate) batch_size: NonZeroU64,
    pub(crate) loop_interval: Duration,
    pub(crate) batch_pause: Duration,
    pub(crate) source_pause: Duration,
    pub(crate) start_height: StartHeight,
}

/// A validated scanner that has not started yet. Built by [`EventScannerBuilder`].
#[derive(Debug)]
pub struct EventScanner<C> {
    pub(crate) client: Arc<C>,
    pub(crate) sources: Vec<TrackedSource>,
    pub(crate) config: ScanConfig,
}

impl<C: SourceClient> EventScanner<C> {
    #[must_use]
    pub fn sources(&self) -> &[TrackedSource] {
        &self.sources
    }

    #[must_use]
    pub fn batch_size(&self) -> u64 {
        self.config.batch_size.get()
    }

    #[must_use]
    pub fn loop_interval(&self) -> Duration {
        self.config.loop_interval
    }

    /// Initializes every cursor and spawns one scan task per source.
    ///
    /// With [`StartHeight::Latest`] the chain head is queried once per chain and every source of
    /// that chain starts there.
    ///
    /// # Errors
    ///
    /// * [`ScannerError::Transport`] - a chain head needed for initialization could not be read.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    pub async fn start(
        self,
        queue: QueueSender,
        shutdown: CancellationToken,
    ) -> Result<ScannerHandle<C>, ScannerError> {
        let initial = self.initial_heights().await?;

        let mut cursors = CursorTable::default();
        let mut scanners = BTreeMap::new();
        let mut tasks = Vec::with_capacity(self.sources.len());

        for (position, source) in self.sources.into_iter().enumerate() {
            let id = source.identity().clone();
            let start = match self.config.start_height {
                StartHeight::Number(height) => height,
                StartHeight::Latest => initial.get(&source.chain_id()).copied().unwrap_or_default(),
            };
            let slot = cursors.insert(id.clone(), start);
            let scanner = Arc::new(SourceScanner::new(
                source,
                Arc::clone(&self.client),
                slot,
                queue.clone(),
                self.config.batch_size,
                self.config.batch_pause,
            ));
            info!(source = %id, last_scanned_height = start, "Tracking source");

            let offset = u32::try_from(position).unwrap_or(u32::MAX);
            let stagger = self.config.source_pause.saturating_mul(offset);
            tasks.push(tokio::spawn(run_source(
                Arc::clone(&scanner),
                stagger,
                self.config.loop_interval,
                shutdown.clone(),
            )));
            scanners.insert(id, scanner);
        }

        info!(
            sources = scanners.len(),
            batch_size = self.config.batch_size.get(),
            loop_interval_ms = self.config.loop_interval.as_millis(),
            "Scanner started"
        );

        Ok(ScannerHandle::new(scanners, cursors, tasks, shutdown, self.config))
    }

    async fn initial_heights(&self) -> Result<BTreeMap<ChainId, u64>, ScannerError> {
        let mut heights = BTreeMap::new();
        if self.config.start_height != StartHeight::Latest {
            return Ok(heights);
        }
        for source in &self.sources {
            let chain_id = source.chain_id();
            if heights.contains_key(&chain_id) {
                continue;
            }
            let head = self.client.head_height(chain_id).await?;
            debug!(chain_id = chain_id, head = head, "Starting from chain head");
            heights.insert(chain_id, head);
        }
        Ok(heights)
    }
}

/// Timer loop of one source. Runs until `shutdown` is cancelled; an in-flight cycle is
/// abandoned, which is safe because the cursor only moves at the end of a batch.
async fn run_source<C: SourceClient>(
    scanner: Arc<SourceScanner<C>>,
    stagger: Duration,
    loop_interval: Duration,
    shutdown: CancellationToken,
) {
    tokio::select! {
        () = shutdown.cancelled() => return,
        () = tokio::time::sleep(stagger) => {}
    }

    let mut ticker = interval(loop_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            result = scanner.scan() => match result {
                Ok(report) if report.batches > 0 => {
                    debug!(
                        source = %scanner.identity(),
                        batches = report.batches,
                        events = report.events,
                        last_scanned_height = report.last_scanned_height,
                        "Scan cycle finished"
                    );
                }
                Ok(_) => {}
                // already logged and recorded in the source's progress
                Err(_) => {}
            },
        }
    }
    debug!(source = %scanner.identity(), "Scan task stopped");
}
