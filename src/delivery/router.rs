use std::{
    any::Any,
    collections::BTreeSet,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::FutureExt;
use serde::Serialize;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::{
    delivery::{
        QueueReceiver,
        subscription::{Subscription, SubscriptionId, SubscriptionTable, SubscriptionTarget},
    },
    error::ConfigError,
    event::Event,
    sink::{Sink, SinkKind},
};

/// Default pause after each dispatched event.
pub const DEFAULT_DISPATCH_PAUSE: Duration = Duration::from_millis(200);

#[derive(Debug, Default)]
struct DeliveryStats {
    dispatched: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

/// Cumulative delivery counters since the router was built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryCounters {
    /// Events pulled from the queue.
    pub dispatched: u64,
    /// Successful `notify` calls.
    pub delivered: u64,
    /// Failed or panicked `notify` calls.
    pub failed: u64,
    /// Sinks that declined an event through [`Sink::accepts`].
    pub skipped: u64,
}

/// Outcome of dispatching a single event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// A subscription as shown to administrative callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub target: String,
    pub sink: String,
    pub kind: SinkKind,
}

#[derive(Debug)]
struct RouterInner {
    table: SubscriptionTable,
    stats: DeliveryStats,
    allow_wildcard: bool,
    dispatch_pause: Duration,
}

/// Builder for a [`SubscriptionRouter`].
#[derive(Debug, Clone)]
pub struct SubscriptionRouterBuilder {
    allow_wildcard: bool,
    dispatch_pause: Duration,
}

impl Default for SubscriptionRouterBuilder {
    fn default() -> Self {
        Self { allow_wildcard: false, dispatch_pause: DEFAULT_DISPATCH_PAUSE }
    }
}

impl SubscriptionRouterBuilder {
    /// Accept [`SubscriptionTarget::AllSources`] subscriptions.
    #[must_use]
    pub fn allow_wildcard(mut self, allow: bool) -> Self {
        self.allow_wildcard = allow;
        self
    }

    /// Pause after each dispatched event, throttling outbound notifications.
    #[must_use]
    pub fn dispatch_pause(mut self, pause: Duration) -> Self {
        self.dispatch_pause = pause;
        self
    }

    #[must_use]
    pub fn build(self) -> SubscriptionRouter {
        SubscriptionRouter {
            inner: Arc::new(RouterInner {
                table: SubscriptionTable::default(),
                stats: DeliveryStats::default(),
                allow_wildcard: self.allow_wildcard,
                dispatch_pause: self.dispatch_pause,
            }),
        }
    }
}

/// Maps events to subscribed sinks and delivers them.
///
/// Cheap to clone; clones share the same subscription table and counters, so administrative
/// subscribe/unsubscribe calls can run concurrently with the dispatch loop.
#[derive(Debug, Clone)]
pub struct SubscriptionRouter {
    inner: Arc<RouterInner>,
}

impl Default for SubscriptionRouter {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SubscriptionRouter {
    #[must_use]
    pub fn builder() -> SubscriptionRouterBuilder {
        SubscriptionRouterBuilder::default()
    }

    /// Subscribes `sink` to `target`. Subscribing the same sink to the same target again is a
    /// no-op that returns the existing id.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::WildcardDisabled`] - [`SubscriptionTarget::AllSources`] while wildcards
    ///   are disabled on the builder.
    /// * [`ConfigError::DuplicateSink`] - another sink is already subscribed under the same name.
    pub fn subscribe(
        &self,
        target: SubscriptionTarget,
        sink: Arc<dyn Sink>,
    ) -> Result<SubscriptionId, ConfigError> {
        if target == SubscriptionTarget::AllSources && !self.inner.allow_wildcard {
            return Err(ConfigError::WildcardDisabled);
        }
        let sink_name = sink.name().to_owned();
        let id = self.inner.table.insert(target.clone(), sink)?;
        info!(subscription = %id, target = %target, sink = %sink_name, "Subscribed");
        Ok(id)
    }

    /// Removes the `(target, sink_name)` pair. Returns `false` if it did not exist.
    pub fn unsubscribe(&self, target: &SubscriptionTarget, sink_name: &str) -> bool {
        let removed = self.inner.table.remove(target, sink_name);
        if removed {
            info!(target = %target, sink = sink_name, "Unsubscribed");
        }
        removed
    }

    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.inner
            .table
            .snapshot()
            .iter()
            .map(|subscription| SubscriptionInfo {
                id: subscription.id,
                target: subscription.target.to_string(),
                sink: subscription.sink.name().to_owned(),
                kind: subscription.sink.kind(),
            })
            .collect()
    }

    /// Number of distinct sinks with at least one subscription.
    #[must_use]
    pub fn sink_count(&self) -> usize {
        let snapshot = self.inner.table.snapshot();
        snapshot.iter().map(|subscription| subscription.sink.name()).collect::<BTreeSet<_>>().len()
    }

    #[must_use]
    pub fn counters(&self) -> DeliveryCounters {
        let stats = &self.inner.stats;
        DeliveryCounters {
            dispatched: stats.dispatched.load(Ordering::Relaxed),
            delivered: stats.delivered.load(Ordering::Relaxed),
            failed: stats.failed.load(Ordering::Relaxed),
            skipped: stats.skipped.load(Ordering::Relaxed),
        }
    }

    /// Delivers `event` to every matching sink, one after another.
    ///
    /// Sink failures and panics are logged and counted; they never propagate.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip_all, fields(event_id = %event.short_id()))
    )]
    pub async fn dispatch(&self, event: &Event) -> DispatchOutcome {
        let stats = &self.inner.stats;
        stats.dispatched.fetch_add(1, Ordering::Relaxed);

        let snapshot = self.inner.table.snapshot();
        let mut outcome = DispatchOutcome::default();
        for Subscription { id, target, sink } in snapshot.iter() {
            if !target.matches(event) {
                continue;
            }
            if !sink.accepts(event) {
                trace!(subscription = %id, sink = sink.name(), "Sink filtered event out");
                stats.skipped.fetch_add(1, Ordering::Relaxed);
                outcome.skipped += 1;
                continue;
            }

            match AssertUnwindSafe(sink.notify(event)).catch_unwind().await {
                Ok(Ok(())) => {
                    stats.delivered.fetch_add(1, Ordering::Relaxed);
                    outcome.delivered += 1;
                }
                Ok(Err(err)) => {
                    error!(
                        sink = sink.name(),
                        kind = %sink.kind(),
                        error = %err,
                        "Sink delivery failed"
                    );
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    outcome.failed += 1;
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(sink = sink.name(), panic = %message, "Sink panicked");
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    outcome.failed += 1;
                }
            }
        }

        if outcome == DispatchOutcome::default() {
            debug!(source = %event.source_id(), "No sink subscribed to event");
        }
        outcome
    }

    /// Consumes the delivery queue until it closes or `shutdown` is cancelled.
    ///
    /// One event at a time: the next event is only pulled once every sink of the current one
    /// has returned.
    pub async fn run(self, receiver: QueueReceiver, shutdown: CancellationToken) {
        let mut events = receiver.into_stream();
        loop {
            let event = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                event = events.next() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            trace!(event = %crate::sink::format::humanize(&event), "Dispatching event");
            self.dispatch(&event).await;

            if !self.inner.dispatch_pause.is_zero() {
                tokio::time::sleep(self.inner.dispatch_pause).await;
            }
        }
        debug!("Dispatch loop stopped");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test_utils::{FailingSink, PanickingSink, RecordingSink, sample_event},
        types::SourceId,
    };

    fn exact(event: &Event) -> SubscriptionTarget {
        SubscriptionTarget::Source(event.source_id())
    }

    #[tokio::test]
    async fn failing_sink_does_not_block_the_others() {
        let router = SubscriptionRouter::builder().dispatch_pause(Duration::ZERO).build();
        let event = sample_event(1, 0);
        let failing = Arc::new(FailingSink::new("a"));
        let recording = Arc::new(RecordingSink::new("b"));
        router.subscribe(exact(&event), failing.clone()).unwrap();
        router.subscribe(exact(&event), recording.clone()).unwrap();

        let outcome = router.dispatch(&event).await;

        assert_eq!(outcome, DispatchOutcome { delivered: 1, failed: 1, skipped: 0 });
        assert_eq!(failing.attempts(), 1);
        assert_eq!(recording.events(), vec![event]);
    }

    #[tokio::test]
    async fn panicking_sink_counts_as_failure() {
        let router = SubscriptionRouter::default();
        let event = sample_event(1, 0);
        let recording = Arc::new(RecordingSink::new("after"));
        router.subscribe(exact(&event), Arc::new(PanickingSink::new("boom"))).unwrap();
        router.subscribe(exact(&event), recording.clone()).unwrap();

        let outcome = router.dispatch(&event).await;

        assert_eq!(outcome.failed, 1);
        assert_eq!(recording.events().len(), 1);
        assert_eq!(router.counters().failed, 1);
    }

    #[tokio::test]
    async fn exact_match_only_by_default() {
        let router = SubscriptionRouter::default();
        let event = sample_event(1, 0);
        let recording = Arc::new(RecordingSink::new("a"));
        let other = SourceId::new(event.chain_id, event.contract_address, "Approval");
        router.subscribe(SubscriptionTarget::Source(other), recording.clone()).unwrap();

        assert!(matches!(
            router.subscribe(SubscriptionTarget::AllSources, recording.clone()),
            Err(ConfigError::WildcardDisabled)
        ));
        assert_eq!(router.dispatch(&event).await, DispatchOutcome::default());
        assert!(recording.events().is_empty());
    }

    #[tokio::test]
    async fn wildcard_receives_every_source_when_enabled() {
        let router = SubscriptionRouter::builder().allow_wildcard(true).build();
        let recording = Arc::new(RecordingSink::new("all"));
        router.subscribe(SubscriptionTarget::AllSources, recording.clone()).unwrap();

        let mut approval = sample_event(2, 0);
        approval.event_type = "Approval".into();
        router.dispatch(&sample_event(1, 0)).await;
        router.dispatch(&approval).await;

        assert_eq!(recording.events().len(), 2);
        assert_eq!(router.sink_count(), 1);
    }

    #[tokio::test]
    async fn declined_events_are_skipped_not_failed() {
        let router = SubscriptionRouter::default();
        let event = sample_event(1, 0);
        let picky = Arc::new(RecordingSink::new("picky").rejecting_all());
        router.subscribe(exact(&event), picky.clone()).unwrap();

        router.dispatch(&event).await;

        assert_eq!(
            router.counters(),
            DeliveryCounters { dispatched: 1, skipped: 1, ..DeliveryCounters::default() }
        );
        assert!(picky.events().is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_takes_effect_for_next_event() {
        let router = SubscriptionRouter::default();
        let event = sample_event(1, 0);
        let recording = Arc::new(RecordingSink::new("a"));
        router.subscribe(exact(&event), recording.clone()).unwrap();

        router.dispatch(&event).await;
        assert!(router.unsubscribe(&exact(&event), "a"));
        router.dispatch(&event).await;

        assert_eq!(recording.events().len(), 1);
        assert!(router.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn second_sink_with_a_taken_name_is_refused() {
        let router = SubscriptionRouter::default();
        let event = sample_event(1, 0);
        let first = Arc::new(RecordingSink::new("alerts"));
        let second = Arc::new(RecordingSink::new("alerts").with_kind(SinkKind::Webhook));
        router.subscribe(exact(&event), first.clone()).unwrap();

        let err = router.subscribe(exact(&event), second.clone()).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateSink(name) if name == "alerts"));

        router.dispatch(&event).await;
        assert_eq!(first.events().len(), 1);
        assert!(second.events().is_empty());
        assert_eq!(router.subscriptions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_drains_queue_in_order_until_closed() {
        let router =
            SubscriptionRouter::builder().dispatch_pause(Duration::from_millis(200)).build();
        let recording = Arc::new(RecordingSink::new("a"));
        router.subscribe(exact(&sample_event(1, 0)), recording.clone()).unwrap();

        let (sender, receiver) = crate::delivery::bounded(8).unwrap();
        for log_index in 0..3 {
            sender.push(sample_event(1, log_index)).await.unwrap();
        }
        drop(sender);

        router.clone().run(receiver, CancellationToken::new()).await;

        let order: Vec<u64> = recording.events().iter().map(|event| event.log_index).collect();
        assert_eq!(order, [0, 1, 2]);
        assert_eq!(router.counters().dispatched, 3);
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let router = SubscriptionRouter::default();
        let (_sender, receiver) = crate::delivery::bounded(1).unwrap();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        router.run(receiver, shutdown).await;
    }
}
