use std::{
    collections::BTreeMap,
    mem,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    error::ScannerError,
    scanner::{CursorTable, ScanConfig, ScanReport, SourceProgress, SourceScanner},
    source::SourceClient,
    types::SourceId,
};

/// Control surface of a started scanner.
///
/// Cheap to clone. Every clone controls the same scan tasks.
#[derive(Debug)]
pub struct ScannerHandle<C> {
    inner: Arc<HandleInner<C>>,
}

impl<C> Clone for ScannerHandle<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

#[derive(Debug)]
struct HandleInner<C> {
    scanners: BTreeMap<SourceId, Arc<SourceScanner<C>>>,
    cursors: CursorTable,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
    config: ScanConfig,
}

impl<C: SourceClient> ScannerHandle<C> {
    pub(crate) fn new(
        scanners: BTreeMap<SourceId, Arc<SourceScanner<C>>>,
        cursors: CursorTable,
        tasks: Vec<JoinHandle<()>>,
        shutdown: CancellationToken,
        config: ScanConfig,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                scanners,
                cursors,
                tasks: Mutex::new(tasks),
                shutdown,
                config,
            }),
        }
    }

    /// Runs a scan cycle of `source` right now, outside its timer.
    ///
    /// Waits for a cycle already in progress on the same source to finish first.
    ///
    /// # Errors
    ///
    /// * [`ScannerError::UnknownSource`] - `source` is not tracked.
    /// * Any error of [`SourceScanner::scan`].
    pub async fn trigger(&self, source: &SourceId) -> Result<ScanReport, ScannerError> {
        let scanner = self
            .inner
            .scanners
            .get(source)
            .ok_or_else(|| ScannerError::UnknownSource(source.clone()))?;
        info!(source = %source, "Manual scan triggered");
        scanner.scan().await
    }

    #[must_use]
    pub fn cursors(&self) -> &CursorTable {
        &self.inner.cursors
    }

    #[must_use]
    pub fn progress(&self, source: &SourceId) -> Option<SourceProgress> {
        self.inner.cursors.progress(source)
    }

    #[must_use]
    pub fn sources(&self) -> Vec<SourceId> {
        self.inner.scanners.keys().cloned().collect()
    }

    #[must_use]
    pub fn batch_size(&self) -> u64 {
        self.inner.config.batch_size.get()
    }

    #[must_use]
    pub fn loop_interval(&self) -> Duration {
        self.inner.config.loop_interval
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Stops every scan task and waits for them to exit.
    ///
    /// Cursors keep the heights they reached. Calling this more than once is harmless.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let tasks = {
            let mut guard = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            mem::take(&mut *guard)
        };
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "Scan task ended abnormally");
            }
        }
        info!("Scanner stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use crate::{
        assert_event_sequence, assert_queue_empty,
        delivery::bounded,
        error::ScannerError,
        scanner::{EventScannerBuilder, ScanState, StartHeight},
        test_utils::{MockSourceClient, TOKEN, approval_source, transfer_log, transfer_source},
        types::SourceId,
    };

    #[tokio::test(start_paused = true)]
    async fn latest_start_skips_history_and_follows_head() {
        let client = MockSourceClient::new();
        client.set_head(1, 100);
        let source = transfer_source(1, TOKEN);
        let id = source.identity().clone();
        client.push_log(&id, transfer_log(TOKEN, 90, 0, 1));
        client.push_log(&id, transfer_log(TOKEN, 101, 0, 2));
        client.push_log(&id, transfer_log(TOKEN, 102, 3, 3));

        let scanner = EventScannerBuilder::new()
            .batch_size(10)
            .loop_interval(Duration::from_secs(5))
            .build(client, vec![source])
            .unwrap();
        let client = std::sync::Arc::clone(&scanner.client);
        let (sender, mut receiver) = bounded(16).unwrap();
        let handle = scanner.start(sender, CancellationToken::new()).await.unwrap();

        assert_eq!(handle.progress(&id).unwrap().last_scanned_height, 100);

        // first tick fires immediately and finds nothing new
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_queue_empty!(receiver);

        client.set_head(1, 102);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_event_sequence!(receiver, [(101, 0), (102, 3)]);
        assert_eq!(handle.progress(&id).unwrap().last_scanned_height, 102);
        assert_eq!(handle.progress(&id).unwrap().events_processed, 2);

        handle.shutdown().await;
        assert!(handle.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_start_height_scans_history() {
        let client = MockSourceClient::new();
        client.set_head(1, 105);
        let source = transfer_source(1, TOKEN);
        let id = source.identity().clone();
        client.push_log(&id, transfer_log(TOKEN, 100, 0, 1));
        client.push_log(&id, transfer_log(TOKEN, 101, 0, 1));
        client.push_log(&id, transfer_log(TOKEN, 105, 1, 1));

        let scanner = EventScannerBuilder::new()
            .batch_size(2)
            .batch_pause(Duration::ZERO)
            .start_height(StartHeight::Number(100))
            .build(client, vec![source])
            .unwrap();
        let client = std::sync::Arc::clone(&scanner.client);
        let (sender, mut receiver) = bounded(16).unwrap();
        let handle = scanner.start(sender, CancellationToken::new()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_event_sequence!(receiver, [(101, 0), (105, 1)]);
        assert_eq!(client.ranges(&id), vec![(101, 102), (103, 104), (105, 105)]);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_scans_outside_the_timer() {
        let client = MockSourceClient::new();
        client.set_head(1, 10);
        let source = transfer_source(1, TOKEN);
        let id = source.identity().clone();

        let scanner = EventScannerBuilder::new()
            .loop_interval(Duration::from_secs(3600))
            .build(client, vec![source])
            .unwrap();
        let client = std::sync::Arc::clone(&scanner.client);
        let (sender, mut receiver) = bounded(16).unwrap();
        let handle = scanner.start(sender, CancellationToken::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        client.push_log(&id, transfer_log(TOKEN, 12, 0, 1));
        client.set_head(1, 12);
        let report = handle.trigger(&id).await.unwrap();

        assert_eq!(report.events, 1);
        assert_eq!(report.last_scanned_height, 12);
        assert_event_sequence!(receiver, [(12, 0)]);

        let unknown = SourceId::new(5, TOKEN, "Transfer");
        assert!(matches!(handle.trigger(&unknown).await, Err(ScannerError::UnknownSource(_))));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failing_source_does_not_stall_others() {
        let client = MockSourceClient::new();
        client.set_head(1, 10);
        client.set_head(137, 10);
        let healthy = transfer_source(1, TOKEN);
        let broken = approval_source(137, TOKEN);
        let (healthy_id, broken_id) = (healthy.identity().clone(), broken.identity().clone());
        client.push_log(&healthy_id, transfer_log(TOKEN, 8, 0, 1));

        let scanner = EventScannerBuilder::new()
            .start_height(StartHeight::Number(5))
            .source_pause(Duration::ZERO)
            .build(client, vec![healthy, broken])
            .unwrap();
        let client = std::sync::Arc::clone(&scanner.client);
        client.fail_range_once(&broken_id, 6, 10);
        let (sender, mut receiver) = bounded(16).unwrap();
        let handle = scanner.start(sender, CancellationToken::new()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_event_sequence!(receiver, [(8, 0)]);
        let broken_progress = handle.progress(&broken_id).unwrap();
        assert_eq!(broken_progress.state, ScanState::Error);
        assert_eq!(broken_progress.consecutive_failures, 1);
        assert_eq!(broken_progress.last_scanned_height, 5);
        assert_eq!(handle.progress(&healthy_id).unwrap().last_scanned_height, 10);

        // next cycle retries the failed range and recovers
        tokio::time::sleep(Duration::from_secs(10)).await;
        let broken_progress = handle.progress(&broken_id).unwrap();
        assert_eq!(broken_progress.state, ScanState::Idle);
        assert_eq!(broken_progress.consecutive_failures, 0);
        assert_eq!(broken_progress.last_scanned_height, 10);
        assert_eq!(client.ranges(&broken_id), vec![(6, 10), (6, 10)]);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_fails_when_head_is_unavailable() {
        let client = MockSourceClient::new();
        client.set_head(1, 10);
        client.fail_next_head(1);

        let scanner =
            EventScannerBuilder::new().build(client, vec![transfer_source(1, TOKEN)]).unwrap();
        let (sender, _receiver) = bounded(16).unwrap();

        let result = scanner.start(sender, CancellationToken::new()).await;
        assert!(matches!(result, Err(ScannerError::Transport(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_timer() {
        let client = MockSourceClient::new();
        client.set_head(1, 10);
        let source = transfer_source(1, TOKEN);
        let id = source.identity().clone();

        let scanner = EventScannerBuilder::new()
            .loop_interval(Duration::from_secs(1))
            .build(client, vec![source])
            .unwrap();
        let client = std::sync::Arc::clone(&scanner.client);
        let (sender, _receiver) = bounded(16).unwrap();
        let handle = scanner.start(sender, CancellationToken::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        handle.shutdown().await;
        let fetched = client.fetches().len();

        client.set_head(1, 20);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(client.fetches().len(), fetched);
        assert_eq!(handle.progress(&id).unwrap().last_scanned_height, 10);
    }
}
