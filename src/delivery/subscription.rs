use std::{
    fmt,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, event::Event, sink::Sink, types::SourceId};

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTarget {
    /// Events of exactly one source.
    Source(SourceId),
    /// Events of every source. Only accepted when the router allows wildcards.
    AllSources,
}

impl SubscriptionTarget {
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            SubscriptionTarget::Source(id) => event.is_from(id),
            SubscriptionTarget::AllSources => true,
        }
    }
}

impl fmt::Display for SubscriptionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionTarget::Source(id) => id.fmt(f),
            SubscriptionTarget::AllSources => f.write_str("*"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A `(target, sink)` pair.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub target: SubscriptionTarget,
    pub sink: Arc<dyn Sink>,
}

/// Copy-on-write subscription list.
///
/// Readers clone the current `Arc` and iterate without holding the lock; writers swap in a new
/// list. A dispatch that already took a snapshot keeps delivering to it.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionTable {
    entries: RwLock<Arc<Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl SubscriptionTable {
    pub(crate) fn snapshot(&self) -> Arc<Vec<Subscription>> {
        Arc::clone(&self.entries.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Adds `(target, sink)`.
    ///
    /// Sink names are unique across the table: subscribing the same sink instance to the same
    /// target again returns the existing id, while a different sink under a taken name is
    /// rejected.
    pub(crate) fn insert(
        &self,
        target: SubscriptionTarget,
        sink: Arc<dyn Sink>,
    ) -> Result<SubscriptionId, ConfigError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for entry in entries.iter().filter(|entry| entry.sink.name() == sink.name()) {
            if !Arc::ptr_eq(&entry.sink, &sink) {
                return Err(ConfigError::DuplicateSink(sink.name().to_owned()));
            }
            if entry.target == target {
                return Ok(entry.id);
            }
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut next = Vec::with_capacity(entries.len() + 1);
        next.extend(entries.iter().cloned());
        next.push(Subscription { id, target, sink });
        *entries = Arc::new(next);
        Ok(id)
    }

    /// Removes the pair, returning whether it existed.
    pub(crate) fn remove(&self, target: &SubscriptionTarget, sink_name: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let next: Vec<Subscription> = entries
            .iter()
            .filter(|entry| !(entry.target == *target && entry.sink.name() == sink_name))
            .cloned()
            .collect();
        if next.len() == entries.len() {
            return false;
        }
        *entries = Arc::new(next);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        sink::SinkKind,
        test_utils::{RecordingSink, sample_event},
    };

    #[test]
    fn exact_target_matches_only_its_source() {
        let event = sample_event(1, 0);
        let other = SourceId::new(event.chain_id, event.contract_address, "Approval");

        assert!(SubscriptionTarget::Source(event.source_id()).matches(&event));
        assert!(!SubscriptionTarget::Source(other).matches(&event));
        assert!(SubscriptionTarget::AllSources.matches(&event));
    }

    #[test]
    fn resubscribing_the_same_sink_is_idempotent() {
        let table = SubscriptionTable::default();
        let target = SubscriptionTarget::Source(sample_event(1, 0).source_id());
        let sink: Arc<dyn Sink> = Arc::new(RecordingSink::new("a"));

        let first = table.insert(target.clone(), sink.clone()).unwrap();
        let second = table.insert(target.clone(), sink.clone()).unwrap();
        let wildcard = table.insert(SubscriptionTarget::AllSources, sink).unwrap();

        assert_eq!(first, second);
        assert_ne!(first, wildcard);
        assert_eq!(table.snapshot().len(), 2);
    }

    #[test]
    fn another_sink_under_a_taken_name_is_rejected() {
        let table = SubscriptionTable::default();
        let target = SubscriptionTarget::Source(sample_event(1, 0).source_id());
        table.insert(target.clone(), Arc::new(RecordingSink::new("alerts"))).unwrap();

        let webhook = Arc::new(RecordingSink::new("alerts").with_kind(SinkKind::Webhook));
        let same_target = table.insert(target, webhook.clone());
        let other_target = table.insert(SubscriptionTarget::AllSources, webhook);

        assert!(matches!(same_target, Err(ConfigError::DuplicateSink(name)) if name == "alerts"));
        assert!(matches!(other_target, Err(ConfigError::DuplicateSink(_))));
        assert_eq!(table.snapshot().len(), 1);
    }

    #[test]
    fn removal_leaves_existing_snapshots_intact() {
        let table = SubscriptionTable::default();
        let target = SubscriptionTarget::Source(sample_event(1, 0).source_id());
        table.insert(target.clone(), Arc::new(RecordingSink::new("a"))).unwrap();

        let before = table.snapshot();
        assert!(table.remove(&target, "a"));
        assert!(!table.remove(&target, "a"));

        assert_eq!(before.len(), 1);
        assert!(table.snapshot().is_empty());
    }

    #[test]
    fn targets_render_compactly() {
        assert_eq!(SubscriptionTarget::AllSources.to_string(), "*");
        assert_eq!(SubscriptionId(3).to_string(), "#3");
    }
}
