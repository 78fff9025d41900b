use std::{num::NonZeroU64, sync::Arc, time::Duration};

use alloy::json_abi::Event as EventSchema;

use crate::{
    delivery::QueueSender,
    error::ScannerError,
    event::decode,
    scanner::cursor::{CursorSlot, ScanState, SourceProgress},
    source::SourceClient,
    types::{SourceId, TrackedSource},
};

/// What one scan cycle of a source did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Batches fetched and fully queued.
    pub batches: usize,
    /// Events queued.
    pub events: usize,
    /// Logs that failed to decode and were dropped.
    pub dropped: usize,
    /// Cursor height after the cycle.
    pub last_scanned_height: u64,
}

/// The scan state machine of a single [`TrackedSource`].
///
/// Cycles of the same source are serialized by the source's cursor lock, so a manual trigger and
/// the timer never fetch overlapping ranges.
#[derive(Debug)]
pub struct SourceScanner<C> {
    source: TrackedSource,
    client: Arc<C>,
    slot: Arc<CursorSlot>,
    queue: QueueSender,
    batch_size: NonZeroU64,
    batch_pause: Duration,
}

impl<C: SourceClient> SourceScanner<C> {
    pub(crate) fn new(
        source: TrackedSource,
        client: Arc<C>,
        slot: Arc<CursorSlot>,
        queue: QueueSender,
        batch_size: NonZeroU64,
        batch_pause: Duration,
    ) -> Self {
        Self { source, client, slot, queue, batch_size, batch_pause }
    }

    #[must_use]
    pub fn identity(&self) -> &SourceId {
        self.source.identity()
    }

    /// Last fully scanned height, as last published.
    #[must_use]
    pub fn height(&self) -> u64 {
        self.slot.progress().last_scanned_height
    }

    #[must_use]
    pub fn raw_schema(&self) -> &EventSchema {
        self.source.raw_schema()
    }

    #[must_use]
    pub fn progress(&self) -> SourceProgress {
        self.slot.progress()
    }

    /// Runs one scan cycle: scans from the cursor up to the current chain head in batches.
    ///
    /// Each batch is fetched, decoded and pushed to the delivery queue in log order while the
    /// source's lock is held; the cursor advances to the end of the batch only after every event
    /// of the batch was queued. Logs that fail to decode are logged and dropped.
    ///
    /// # Errors
    ///
    /// * [`ScannerError::Transport`] - the head query or a log fetch failed. Batches completed
    ///   earlier in the cycle keep their progress; the failed range is retried next cycle.
    /// * [`ScannerError::DeliveryQueueClosed`] - the dispatch loop is gone.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip_all, fields(source = %self.source.identity()))
    )]
    pub async fn scan(&self) -> Result<ScanReport, ScannerError> {
        let latest = match self.client.head_height(self.source.chain_id()).await {
            Ok(latest) => latest,
            Err(err) => return Err(self.fail(err.into())),
        };

        let mut report =
            ScanReport { last_scanned_height: self.height(), ..ScanReport::default() };

        loop {
            let mut cursor = self.slot.lock().await;
            let Some(range) = cursor.next_batch(latest, self.batch_size) else {
                report.last_scanned_height = cursor.last_scanned_height();
                break;
            };
            let (from, to) = (*range.start(), *range.end());

            self.slot.update(|progress| progress.state = ScanState::Fetching);
            trace!(from_block = from, to_block = to, latest_block = latest, "Fetching batch");

            let logs = match self.client.get_logs(&self.source, from, to).await {
                Ok(logs) => logs,
                Err(err) => {
                    warn!(from_block = from, to_block = to, error = %err, "Batch fetch failed");
                    return Err(self.fail(err.into()));
                }
            };

            let mut queued = 0u64;
            for raw in &logs {
                let event = match decode(raw, &self.source) {
                    Ok(event) => event,
                    Err(err) => {
                        warn!(
                            block = ?raw.block_number,
                            log_index = ?raw.log_index,
                            error = %err,
                            "Dropping undecodable log"
                        );
                        report.dropped += 1;
                        continue;
                    }
                };
                trace!(event_id = %event.short_id(), block = event.block_number, "Queueing event");
                if self.queue.push(event).await.is_err() {
                    return Err(self.fail(ScannerError::DeliveryQueueClosed));
                }
                queued += 1;
            }

            self.slot.update(|progress| progress.state = ScanState::Advancing);
            cursor.advance_to(to);
            let height = cursor.last_scanned_height();
            self.slot.update(|progress| {
                progress.last_scanned_height = height;
                progress.events_processed += queued;
                progress.consecutive_failures = 0;
                progress.last_error = None;
            });
            drop(cursor);

            debug!(from_block = from, to_block = to, events = queued, "Batch scanned");
            report.batches += 1;
            report.events += usize::try_from(queued).unwrap_or(usize::MAX);
            report.last_scanned_height = height;

            if to < latest && !self.batch_pause.is_zero() {
                tokio::time::sleep(self.batch_pause).await;
            }
        }

        self.slot.update(|progress| progress.state = ScanState::Idle);
        Ok(report)
    }

    fn fail(&self, err: ScannerError) -> ScannerError {
        error!(error = %err, "Scan cycle aborted");
        let message = err.to_string();
        self.slot.update(|progress| {
            progress.state = ScanState::Error;
            progress.consecutive_failures = progress.consecutive_failures.saturating_add(1);
            progress.last_error = Some(message);
        });
        err
    }

    #[cfg(test)]
    pub(crate) fn slot(&self) -> &CursorSlot {
        &self.slot
    }
}
