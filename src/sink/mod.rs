//! Notification sinks.
//!
//! A [`Sink`] receives every event routed to it and reports success or failure. Failures are
//! logged by the router and never retried; one sink failing does not affect the others.
//!
//! Two variants ship with the crate:
//! * [`WebhookSink`] posts `{ "event_type", "data" }` as JSON to a URL
//! * [`ChannelSink`] posts a formatted message to a chat channel resolved once at startup

mod channel;
pub mod format;
mod webhook;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::event::Event;

pub use channel::{
    ChannelDirectory, ChannelSink, ChatChannel, DEFAULT_DISCORD_API, DiscordChannel,
    DiscordDirectory,
};
pub use webhook::{WebhookFilter, WebhookSink};

/// Failure to deliver one event to one sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint responded with status {0}")]
    Status(reqwest::StatusCode),

    #[error("message rejected: {0}")]
    Rejected(String),

    #[error("channel {0} cannot be resolved")]
    Unresolvable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Channel,
    Webhook,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkKind::Channel => f.write_str("channel"),
            SinkKind::Webhook => f.write_str("webhook"),
        }
    }
}

/// An external destination for event notifications.
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use event_relay::{Event, Sink, SinkError, SinkKind};
///
/// #[derive(Debug)]
/// struct Stdout;
///
/// #[async_trait]
/// impl Sink for Stdout {
///     fn name(&self) -> &str { "stdout" }
///     fn kind(&self) -> SinkKind { SinkKind::Channel }
///     async fn notify(&self, event: &Event) -> Result<(), SinkError> {
///         println!("{}", event_relay::sink::format::humanize(event));
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Sink: Send + Sync + fmt::Debug {
    /// Name used in logs, status output and administrative unsubscribe requests.
    fn name(&self) -> &str;

    fn kind(&self) -> SinkKind;

    /// Whether this sink wants `event` at all. Skipped events count neither as delivered nor
    /// as failed.
    fn accepts(&self, _event: &Event) -> bool {
        true
    }

    async fn notify(&self, event: &Event) -> Result<(), SinkError>;
}
