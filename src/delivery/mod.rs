//! Hand-off between scanning and notification.
//!
//! Scan tasks push decoded events into a bounded [`queue`](bounded); a single dispatch loop owned
//! by the [`SubscriptionRouter`] pulls them one at a time and fans each out to the sinks
//! subscribed to the event's source.

mod queue;
mod router;
mod subscription;

pub use queue::{
    DEFAULT_QUEUE_CAPACITY, QueueClosed, QueueProbe, QueueReceiver, QueueSender, bounded,
};
pub use router::{
    DEFAULT_DISPATCH_PAUSE, DeliveryCounters, DispatchOutcome, SubscriptionInfo,
    SubscriptionRouter, SubscriptionRouterBuilder,
};
pub use subscription::{Subscription, SubscriptionId, SubscriptionTarget};
