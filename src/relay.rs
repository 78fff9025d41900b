//! Composition root: wires the scanner, the delivery queue and the subscription router.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use event_relay::{
//! #     RelayBuilder, RpcSourceClient, SubscriptionTarget, TrackedSource, WebhookSink,
//! # };
//! # async fn example(
//! #     client: RpcSourceClient,
//! #     source: TrackedSource,
//! #     sink: WebhookSink,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let id = source.identity().clone();
//! let relay = RelayBuilder::new().build(client, vec![source])?;
//! relay.router().subscribe(SubscriptionTarget::Source(id), Arc::new(sink))?;
//!
//! let handle = relay.start().await?;
//! println!("{:?}", handle.status());
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::{Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    delivery::{
        DEFAULT_QUEUE_CAPACITY, QueueReceiver, QueueSender, SubscriptionRouter,
        SubscriptionRouterBuilder, bounded,
    },
    error::{ConfigError, ScannerError},
    scanner::{EventScanner, EventScannerBuilder, ScanReport, ScannerHandle},
    source::SourceClient,
    status::{StatusReporter, StatusSnapshot},
    types::{SourceId, TrackedSource},
};

#[derive(Debug, Clone)]
pub struct RelayBuilder {
    scanner: EventScannerBuilder,
    router: SubscriptionRouterBuilder,
    queue_capacity: usize,
}

impl Default for RelayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scanner: EventScannerBuilder::new(),
            router: SubscriptionRouter::builder(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    #[must_use]
    pub fn scanner(mut self, scanner: EventScannerBuilder) -> Self {
        self.scanner = scanner;
        self
    }

    #[must_use]
    pub fn router(mut self, router: SubscriptionRouterBuilder) -> Self {
        self.router = router;
        self
    }

    /// Number of events buffered between scanning and dispatch. Must be greater than 0.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Any error of [`EventScannerBuilder::build`], or
    /// [`ConfigError::InvalidQueueCapacity`] for a zero queue capacity.
    pub fn build<C: SourceClient>(
        self,
        client: C,
        sources: Vec<TrackedSource>,
    ) -> Result<Relay<C>, ConfigError> {
        let scanner = self.scanner.build(client, sources)?;
        let (sender, receiver) = bounded(self.queue_capacity)?;
        Ok(Relay { scanner, router: self.router.build(), sender, receiver })
    }
}

/// A fully configured relay that is not running yet.
#[derive(Debug)]
pub struct Relay<C> {
    scanner: EventScanner<C>,
    router: SubscriptionRouter,
    sender: QueueSender,
    receiver: QueueReceiver,
}

impl<C: SourceClient> Relay<C> {
    /// The router, for registering subscriptions before (or after) starting.
    #[must_use]
    pub fn router(&self) -> &SubscriptionRouter {
        &self.router
    }

    #[must_use]
    pub fn sources(&self) -> &[TrackedSource] {
        self.scanner.sources()
    }

    /// Starts the dispatch loop, then the scanner.
    ///
    /// # Errors
    ///
    /// Any error of [`EventScanner::start`]; nothing keeps running in that case.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    pub async fn start(self) -> Result<RelayHandle<C>, ScannerError> {
        let Relay { scanner, router, sender, receiver } = self;
        let shutdown = CancellationToken::new();

        let dispatch = tokio::spawn(router.clone().run(receiver, shutdown.child_token()));

        let batch_size = scanner.batch_size();
        let loop_interval = scanner.loop_interval();
        let scanner = match scanner.start(sender.clone(), shutdown.child_token()).await {
            Ok(scanner) => scanner,
            Err(err) => {
                error!(error = %err, "Relay failed to start");
                shutdown.cancel();
                return Err(err);
            }
        };

        let status = StatusReporter::new(
            scanner.cursors().clone(),
            sender.probe(),
            router.clone(),
            batch_size,
            loop_interval,
        );
        info!(sources = scanner.cursors().len(), sinks = router.sink_count(), "Relay started");

        Ok(RelayHandle { scanner, router, status, shutdown, dispatch: Mutex::new(Some(dispatch)) })
    }
}

/// Control surface of a running relay.
#[derive(Debug)]
pub struct RelayHandle<C> {
    scanner: ScannerHandle<C>,
    router: SubscriptionRouter,
    status: StatusReporter,
    shutdown: CancellationToken,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl<C: SourceClient> RelayHandle<C> {
    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    #[must_use]
    pub fn reporter(&self) -> &StatusReporter {
        &self.status
    }

    /// The live router; subscriptions may be changed while events are being dispatched.
    #[must_use]
    pub fn router(&self) -> &SubscriptionRouter {
        &self.router
    }

    #[must_use]
    pub fn scanner(&self) -> &ScannerHandle<C> {
        &self.scanner
    }

    /// See [`ScannerHandle::trigger`].
    ///
    /// # Errors
    ///
    /// Any error of [`ScannerHandle::trigger`].
    pub async fn trigger(&self, source: &SourceId) -> Result<ScanReport, ScannerError> {
        self.scanner.trigger(source).await
    }

    /// Stops scanning, then the dispatch loop. Events still queued are not delivered.
    pub async fn shutdown(&self) {
        self.scanner.shutdown().await;
        self.shutdown.cancel();
        let dispatch = self.dispatch.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(dispatch) = dispatch
            && let Err(err) = dispatch.await
        {
            warn!(error = %err, "Dispatch loop ended abnormally");
        }
        info!("Relay stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        delivery::SubscriptionTarget,
        scanner::StartHeight,
        test_utils::{
            FailingSink, MockSourceClient, RecordingSink, TOKEN, transfer_log, transfer_source,
        },
    };

    #[test]
    fn zero_queue_capacity_is_rejected() {
        let result = RelayBuilder::new()
            .queue_capacity(0)
            .build(MockSourceClient::new(), vec![transfer_source(1, TOKEN)]);

        assert!(matches!(result, Err(ConfigError::InvalidQueueCapacity)));
    }

    #[tokio::test(start_paused = true)]
    async fn events_flow_from_source_to_sinks() {
        let client = Arc::new(MockSourceClient::new());
        client.set_head(1, 20);
        let source = transfer_source(1, TOKEN);
        let id = source.identity().clone();
        client.push_log(&id, transfer_log(TOKEN, 11, 0, 5));
        client.push_log(&id, transfer_log(TOKEN, 11, 1, 6));
        client.push_log(&id, transfer_log(TOKEN, 19, 0, 7));

        let relay = RelayBuilder::new()
            .scanner(EventScannerBuilder::new().start_height(StartHeight::Number(10)))
            .router(SubscriptionRouter::builder().dispatch_pause(Duration::ZERO))
            .build(Arc::clone(&client), vec![source])
            .unwrap();
        let recording = Arc::new(RecordingSink::new("ops"));
        let failing = Arc::new(FailingSink::new("down"));
        let target = SubscriptionTarget::Source(id.clone());
        relay.router().subscribe(target.clone(), failing.clone()).unwrap();
        relay.router().subscribe(target, recording.clone()).unwrap();

        let handle = relay.start().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), recording.wait_for(3)).await.unwrap();

        let positions: Vec<_> = recording.events().iter().map(|event| event.position()).collect();
        assert_eq!(positions, vec![(11, 0), (11, 1), (19, 0)]);
        assert_eq!(failing.attempts(), 3);

        let status = handle.status();
        assert_eq!(status.sources[0].last_scanned_height, 20);
        assert_eq!(status.events_processed(), 3);
        assert_eq!(status.delivery.delivered, 3);
        assert_eq!(status.delivery.failed, 3);
        assert_eq!(status.sinks, 2);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_start_reports_transport_error() {
        let client = MockSourceClient::new();

        let relay = RelayBuilder::new().build(client, vec![transfer_source(1, TOKEN)]).unwrap();

        assert!(matches!(relay.start().await, Err(ScannerError::Transport(_))));
    }
}
