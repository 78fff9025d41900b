use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{error::ConfigError, event::Event};

/// Default number of events the delivery queue buffers before producers suspend.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// The consumer side of the queue has been dropped; carries the event that could not be queued.
#[derive(Error, Debug)]
#[error("delivery queue closed")]
pub struct QueueClosed(pub Box<Event>);

/// Creates a bounded delivery queue holding at most `capacity` events.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidQueueCapacity`] if `capacity` is 0.
pub fn bounded(capacity: usize) -> Result<(QueueSender, QueueReceiver), ConfigError> {
    if capacity == 0 {
        return Err(ConfigError::InvalidQueueCapacity);
    }
    let (sender, receiver) = mpsc::channel(capacity);
    Ok((QueueSender { inner: sender }, QueueReceiver { inner: receiver }))
}

/// Producer handle, cloned into every scan task.
#[derive(Debug, Clone)]
pub struct QueueSender {
    inner: mpsc::Sender<Event>,
}

impl QueueSender {
    /// Appends `event`, suspending while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] once the receiver has been dropped.
    pub async fn push(&self, event: Event) -> Result<(), QueueClosed> {
        self.inner.send(event).await.map_err(|err| QueueClosed(Box::new(err.0)))
    }

    /// Number of events currently waiting in the queue.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.inner.max_capacity() - self.inner.capacity()
    }

    /// A probe for reading the depth that does not keep the queue open.
    #[must_use]
    pub fn probe(&self) -> QueueProbe {
        QueueProbe { inner: self.inner.downgrade(), capacity: self.inner.max_capacity() }
    }
}

/// Read-only view of the queue depth used by status reporting.
#[derive(Debug, Clone)]
pub struct QueueProbe {
    inner: mpsc::WeakSender<Event>,
    capacity: usize,
}

impl QueueProbe {
    /// Current depth, or 0 once every producer has gone away.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.inner.upgrade().map_or(0, |sender| sender.max_capacity() - sender.capacity())
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Consumer handle, owned by the dispatch loop.
#[derive(Debug)]
pub struct QueueReceiver {
    inner: mpsc::Receiver<Event>,
}

impl QueueReceiver {
    /// Next event in queue order; `None` once every producer is gone and the queue is drained.
    pub async fn pull(&mut self) -> Option<Event> {
        self.inner.recv().await
    }

    /// Next event if one is already waiting.
    pub fn try_pull(&mut self) -> Option<Event> {
        self.inner.try_recv().ok()
    }

    #[must_use]
    pub fn into_stream(self) -> ReceiverStream<Event> {
        ReceiverStream::new(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_utils::sample_event;

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(bounded(0), Err(ConfigError::InvalidQueueCapacity)));
    }

    #[tokio::test]
    async fn preserves_push_order_and_reports_depth() {
        let (sender, mut receiver) = bounded(4).unwrap();
        let probe = sender.probe();

        for log_index in 0..3 {
            sender.push(sample_event(10, log_index)).await.unwrap();
        }
        assert_eq!(sender.depth(), 3);
        assert_eq!(probe.depth(), 3);
        assert_eq!(probe.capacity(), 4);

        for expected in 0..3 {
            assert_eq!(receiver.pull().await.unwrap().log_index, expected);
        }
        assert_eq!(probe.depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_suspends_producer() {
        let (sender, mut receiver) = bounded(1).unwrap();
        sender.push(sample_event(1, 0)).await.unwrap();

        let blocked = tokio::spawn({
            let sender = sender.clone();
            async move { sender.push(sample_event(1, 1)).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!blocked.is_finished());

        assert_eq!(receiver.pull().await.unwrap().log_index, 0);
        blocked.await.unwrap().unwrap();
        assert_eq!(receiver.pull().await.unwrap().log_index, 1);
    }

    #[tokio::test]
    async fn push_fails_once_receiver_is_dropped() {
        let (sender, receiver) = bounded(1).unwrap();
        let probe = sender.probe();
        drop(receiver);

        let err = sender.push(sample_event(5, 2)).await.unwrap_err();
        assert_eq!(err.0.block_number, 5);

        drop(sender);
        assert_eq!(probe.depth(), 0);
    }
}
