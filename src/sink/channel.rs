use std::{fmt, sync::Arc};

use async_trait::async_trait;
use reqwest::{Client, header::AUTHORIZATION};
use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    event::Event,
    sink::{
        Sink, SinkError, SinkKind,
        format::{self, Embed},
    },
};

/// Discord REST API root used when no other base is configured.
pub const DEFAULT_DISCORD_API: &str = "https://discord.com/api/v10";

/// A resolved chat channel that can receive messages.
#[async_trait]
pub trait ChatChannel: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    async fn send(&self, message: &Embed) -> Result<(), SinkError>;
}

/// Looks up chat channels by id.
#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    async fn resolve(&self, channel_id: &str) -> Result<Arc<dyn ChatChannel>, SinkError>;
}

/// Sink posting one embed per event to a chat channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    name: String,
    channel: Arc<dyn ChatChannel>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(name: impl Into<String>, channel: Arc<dyn ChatChannel>) -> Self {
        Self { name: name.into(), channel }
    }

    /// Resolves `channel_id` through `directory` once.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnresolvableSink`] if the directory cannot resolve the channel.
    pub async fn resolve(
        name: impl Into<String>,
        channel_id: &str,
        directory: &dyn ChannelDirectory,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        match directory.resolve(channel_id).await {
            Ok(channel) => {
                debug!(sink = %name, channel = channel_id, "Resolved chat channel");
                Ok(Self::new(name, channel))
            }
            Err(err) => Err(ConfigError::UnresolvableSink { name, reason: err.to_string() }),
        }
    }
}

#[async_trait]
impl Sink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SinkKind {
        SinkKind::Channel
    }

    async fn notify(&self, event: &Event) -> Result<(), SinkError> {
        info!(
            event_id = %event.short_id(),
            channel = self.channel.id(),
            "Sending event to channel"
        );
        self.channel.send(&format::embed(event)).await
    }
}

struct DiscordApi {
    client: Client,
    base: String,
    token: String,
}

impl DiscordApi {
    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base.trim_end_matches('/'))
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.token)
    }
}

/// Resolves Discord text channels over the REST API.
#[derive(Clone)]
pub struct DiscordDirectory {
    api: Arc<DiscordApi>,
}

impl fmt::Debug for DiscordDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscordDirectory").field("base", &self.api.base).finish_non_exhaustive()
    }
}

impl DiscordDirectory {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base(token, DEFAULT_DISCORD_API)
    }

    #[must_use]
    pub fn with_base(token: impl Into<String>, base: impl Into<String>) -> Self {
        let api = DiscordApi { client: Client::new(), base: base.into(), token: token.into() };
        Self { api: Arc::new(api) }
    }
}

#[derive(Deserialize)]
struct ChannelInfo {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

#[async_trait]
impl ChannelDirectory for DiscordDirectory {
    async fn resolve(&self, channel_id: &str) -> Result<Arc<dyn ChatChannel>, SinkError> {
        let response = self
            .api
            .client
            .get(self.api.url(&format!("channels/{channel_id}")))
            .header(AUTHORIZATION, self.api.authorization())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SinkError::Unresolvable(channel_id.to_owned()));
        }
        let info: ChannelInfo = response.json().await?;
        Ok(Arc::new(DiscordChannel { api: Arc::clone(&self.api), id: info.id, name: info.name }))
    }
}

/// A Discord text channel resolved by [`DiscordDirectory`].
pub struct DiscordChannel {
    api: Arc<DiscordApi>,
    id: String,
    name: Option<String>,
}

impl fmt::Debug for DiscordChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscordChannel")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl DiscordChannel {
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

#[derive(Serialize)]
struct CreateMessage<'a> {
    embeds: [&'a Embed; 1],
}

#[async_trait]
impl ChatChannel for DiscordChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, message: &Embed) -> Result<(), SinkError> {
        let response = self
            .api
            .client
            .post(self.api.url(&format!("channels/{}/messages", self.id)))
            .header(AUTHORIZATION, self.api.authorization())
            .json(&CreateMessage { embeds: [message] })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::test_utils::sample_event;

    #[derive(Debug, Default)]
    struct MemoryChannel {
        sent: Mutex<Vec<Embed>>,
    }

    #[async_trait]
    impl ChatChannel for MemoryChannel {
        fn id(&self) -> &str {
            "42"
        }

        async fn send(&self, message: &Embed) -> Result<(), SinkError> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    struct MemoryDirectory(Arc<MemoryChannel>);

    #[async_trait]
    impl ChannelDirectory for MemoryDirectory {
        async fn resolve(&self, channel_id: &str) -> Result<Arc<dyn ChatChannel>, SinkError> {
            if channel_id == "42" {
                Ok(self.0.clone())
            } else {
                Err(SinkError::Unresolvable(channel_id.to_owned()))
            }
        }
    }

    #[tokio::test]
    async fn resolved_channel_receives_embeds() {
        let channel = Arc::new(MemoryChannel::default());
        let directory = MemoryDirectory(channel.clone());
        let sink = ChannelSink::resolve("alerts", "42", &directory).await.unwrap();

        let event = sample_event(7, 1);
        sink.notify(&event).await.unwrap();

        assert_eq!(sink.kind(), SinkKind::Channel);
        assert_eq!(channel.sent.lock().unwrap().as_slice(), &[format::embed(&event)]);
    }

    #[tokio::test]
    async fn unresolvable_channel_is_a_configuration_error() {
        let directory = MemoryDirectory(Arc::new(MemoryChannel::default()));
        let err = ChannelSink::resolve("alerts", "7", &directory).await.unwrap_err();

        assert!(matches!(err, ConfigError::UnresolvableSink { name, .. } if name == "alerts"));
    }

    #[test]
    fn debug_output_hides_token() {
        let directory = DiscordDirectory::new("secret-token");
        assert!(!format!("{directory:?}").contains("secret-token"));
    }
}
