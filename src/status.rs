//! Read-only view of the running relay, for whatever administrative surface embeds it.

use std::{fmt, time::Duration};

use alloy::primitives::Address;
use serde::{Serialize, Serializer};
use tokio::time::Instant;

use crate::{
    delivery::{DeliveryCounters, QueueProbe, SubscriptionRouter},
    scanner::{CursorTable, ScanState},
    types::{ChainId, SourceId},
};

/// Time since the relay started, displayed as `"{d}D {h}H {m}M {s}S"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Uptime(pub Duration);

impl fmt::Display for Uptime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        let days = secs / 86_400;
        let hours = (secs % 86_400) / 3600;
        let minutes = (secs / 60) % 60;
        write!(f, "{days}D {hours}H {minutes}M {}S", secs % 60)
    }
}

impl Serialize for Uptime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Status of one tracked source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStatus {
    pub source: String,
    pub chain_id: ChainId,
    pub contract_address: Address,
    pub event_name: String,
    pub last_scanned_height: u64,
    pub events_processed: u64,
    pub state: ScanState,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

/// Point-in-time view of the whole relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub sources: Vec<SourceStatus>,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub uptime: Uptime,
    pub delivery: DeliveryCounters,
    pub sinks: usize,
    pub batch_size: u64,
    pub loop_interval_secs: u64,
}

impl StatusSnapshot {
    /// Total events queued by every source since startup.
    #[must_use]
    pub fn events_processed(&self) -> u64 {
        self.sources.iter().map(|source| source.events_processed).sum()
    }
}

/// Builds [`StatusSnapshot`]s on demand. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    cursors: CursorTable,
    queue: QueueProbe,
    router: SubscriptionRouter,
    started_at: Instant,
    batch_size: u64,
    loop_interval: Duration,
}

impl StatusReporter {
    #[must_use]
    pub fn new(
        cursors: CursorTable,
        queue: QueueProbe,
        router: SubscriptionRouter,
        batch_size: u64,
        loop_interval: Duration,
    ) -> Self {
        Self { cursors, queue, router, started_at: Instant::now(), batch_size, loop_interval }
    }

    /// Whether `source` is one of the scanned sources.
    #[must_use]
    pub fn tracks(&self, source: &SourceId) -> bool {
        self.cursors.contains(source)
    }

    #[must_use]
    pub fn uptime(&self) -> Uptime {
        Uptime(self.started_at.elapsed())
    }

    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        let sources = self
            .cursors
            .snapshot()
            .into_iter()
            .map(|(id, progress)| SourceStatus {
                source: id.to_string(),
                chain_id: id.chain_id,
                contract_address: id.contract_address,
                event_name: id.event_name,
                last_scanned_height: progress.last_scanned_height,
                events_processed: progress.events_processed,
                state: progress.state,
                consecutive_failures: progress.consecutive_failures,
                last_error: progress.last_error,
            })
            .collect();

        StatusSnapshot {
            sources,
            queue_depth: self.queue.depth(),
            queue_capacity: self.queue.capacity(),
            uptime: self.uptime(),
            delivery: self.router.counters(),
            sinks: self.router.sink_count(),
            batch_size: self.batch_size,
            loop_interval_secs: self.loop_interval.as_secs(),
        }
    }
}
