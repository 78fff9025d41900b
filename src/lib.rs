//! Event-Relay polls EVM contracts for event logs and relays every new event to notification
//! sinks such as webhooks and chat channels.
//!
//! The pipeline has three stages:
//!
//! 1. An [`EventScanner`] runs one timer-driven task per [`TrackedSource`] (a `(chain, contract,
//!    event)` triple). Each cycle fetches logs from the source's cursor up to the chain head in
//!    bounded batches through a [`SourceClient`], decodes them into [`Event`]s and pushes them onto
//!    the delivery queue.
//! 2. The bounded delivery queue decouples scanning from notification. A full queue suspends the
//!    producing scan task; events are never dropped.
//! 3. A [`SubscriptionRouter`] pulls events one at a time and notifies every [`Sink`] subscribed
//!    to the event's source. Sink failures are logged and never retried.
//!
//! [`RelayBuilder`] wires the three together; [`RelayHandle`] exposes status, manual scan
//! triggers and shutdown.
//!
//! # Ordering
//!
//! Events of one source are delivered in `(block_number, log_index)` order. There is no ordering
//! guarantee across sources.
//!
//! # Failure handling
//!
//! * A failed RPC call aborts the source's cycle without moving its cursor; the next cycle fetches
//!   the same range again.
//! * A log that does not decode against the source's ABI is logged and dropped; the rest of the
//!   batch continues.
//! * A failing or panicking sink does not affect other sinks or the next event.
//!
//! # Delivery semantics
//!
//! Cursors live in memory only and there is no deduplication, so a restart resumes from the
//! configured start height. [`Event::id`] is deterministic across rescans and can be used by
//! consumers that need idempotency.
//!
//! Chain reorganizations are not detected.

#[macro_use]
mod logging;

#[cfg(feature = "cli")]
pub mod admin;
pub mod config;
pub mod delivery;
pub mod event;
pub mod scanner;
pub mod sink;
pub mod source;
pub mod status;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

mod error;
mod relay;
mod types;

pub use config::RelayConfig;
pub use delivery::{
    DeliveryCounters, QueueProbe, QueueReceiver, QueueSender, SubscriptionId, SubscriptionRouter,
    SubscriptionTarget,
};
pub use error::{ConfigError, ScannerError};
pub use event::{ArgValue, DecodeError, Event, EventArg, EventArgs};
pub use relay::{Relay, RelayBuilder, RelayHandle};
pub use scanner::{
    EventScanner, EventScannerBuilder, ScanCursor, ScanReport, ScanState, ScannerHandle,
    SourceProgress, StartHeight,
};
pub use sink::{ChannelSink, Sink, SinkError, SinkKind, WebhookFilter, WebhookSink};
pub use source::{ChainProvider, ChainProviderBuilder, RpcSourceClient, SourceClient};
pub use status::{SourceStatus, StatusReporter, StatusSnapshot, Uptime};
pub use types::{ChainId, DEFAULT_COLOR, DisplayMetadata, SourceId, TrackedSource};
