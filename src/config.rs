//! File configuration for the relay binary.
//!
//! The configuration is a TOML document. Before parsing, every `{{ VAR }}` placeholder in the
//! text is replaced with the value of the environment variable `VAR`, so secrets such as RPC keys
//! and bot tokens can live in the environment (or a `.env` file) instead of the file itself.
//!
//! ```toml
//! [relay]
//! batch_size = 1000
//! start_block = "latest"
//!
//! [rpc]
//! infura_api_key = "{{ INFURA_API_KEY }}"
//!
//! [[contracts]]
//! name = "Token"
//! address = "0x00000000000000000000000000000000000000aa"
//! chain_id = 1
//! abi_file = "abi/token.json"
//! events = ["Transfer"]
//!
//! [[webhooks]]
//! name = "indexer"
//! url = "https://example.com/hook"
//! sources = ["Token:Transfer"]
//! ```

use std::{
    collections::{BTreeSet, HashMap},
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use alloy::{json_abi::JsonAbi, primitives::Address};
use reqwest::{Client, Url};
use serde::{Deserialize, Deserializer, de};

use crate::{
    delivery::{
        DEFAULT_DISPATCH_PAUSE, DEFAULT_QUEUE_CAPACITY, SubscriptionRouter, SubscriptionTarget,
    },
    error::ConfigError,
    relay::RelayBuilder,
    scanner::{
        DEFAULT_BATCH_PAUSE, DEFAULT_BATCH_SIZE, DEFAULT_LOOP_INTERVAL, DEFAULT_SOURCE_PAUSE,
        EventScannerBuilder, StartHeight,
    },
    sink::{
        ChannelDirectory, ChannelSink, DEFAULT_DISCORD_API, DiscordDirectory, WebhookFilter,
        WebhookSink,
    },
    source::{
        ChainProviderBuilder, DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_RETRIES, DEFAULT_MIN_DELAY,
        networks::EndpointTable,
    },
    types::{ChainId, DEFAULT_COLOR, DisplayMetadata, SourceId, TrackedSource},
};

/// Selector subscribing a sink to every tracked source.
pub const WILDCARD_SELECTOR: &str = "*";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub contracts: Vec<ContractConfig>,
    pub discord: Option<DiscordConfig>,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
    pub admin: Option<AdminConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelaySection {
    pub name: String,
    pub batch_size: u64,
    pub loop_interval_secs: u64,
    #[serde(deserialize_with = "start_height")]
    pub start_block: StartHeight,
    pub queue_capacity: usize,
    pub batch_pause_ms: u64,
    pub source_pause_ms: u64,
    pub dispatch_pause_ms: u64,
    pub allow_wildcard: bool,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            name: "event-relay".to_owned(),
            batch_size: DEFAULT_BATCH_SIZE,
            loop_interval_secs: DEFAULT_LOOP_INTERVAL.as_secs(),
            start_block: StartHeight::Latest,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_pause_ms: millis(DEFAULT_BATCH_PAUSE),
            source_pause_ms: millis(DEFAULT_SOURCE_PAUSE),
            dispatch_pause_ms: millis(DEFAULT_DISPATCH_PAUSE),
            allow_wildcard: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), json: false }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Used for chains of the built-in network table that have no explicit endpoint.
    pub infura_api_key: Option<String>,
    pub call_timeout_secs: u64,
    pub max_retries: usize,
    pub min_delay_ms: u64,
    pub endpoints: Vec<EndpointConfig>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            infura_api_key: None,
            call_timeout_secs: DEFAULT_CALL_TIMEOUT.as_secs(),
            max_retries: DEFAULT_MAX_RETRIES,
            min_delay_ms: millis(DEFAULT_MIN_DELAY),
            endpoints: vec![],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub chain_id: ChainId,
    pub url: String,
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractConfig {
    pub name: String,
    pub address: String,
    pub chain_id: ChainId,
    pub abi_file: PathBuf,
    pub events: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_color")]
    pub color: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    pub token: String,
    #[serde(default = "default_discord_api")]
    pub api_base: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    pub channel_id: String,
    /// `"<contract>:<event>"` selectors or `"*"`; every tracked source when omitted.
    pub sources: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub name: String,
    pub url: String,
    pub sources: Option<Vec<String>>,
    #[serde(default)]
    pub filter: WebhookFilter,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_listen")]
    pub listen: SocketAddr,
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_color() -> u32 {
    DEFAULT_COLOR
}

fn default_discord_api() -> String {
    DEFAULT_DISCORD_API.to_owned()
}

fn default_admin_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// `"latest"` or a block number.
fn start_height<'de, D: Deserializer<'de>>(deserializer: D) -> Result<StartHeight, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Tag(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(height) => Ok(StartHeight::Number(height)),
        Raw::Tag(tag) if tag.eq_ignore_ascii_case("latest") => Ok(StartHeight::Latest),
        Raw::Tag(tag) => Err(de::Error::custom(format!(
            "invalid start_block `{tag}`, expected \"latest\" or a block number"
        ))),
    }
}

/// Replaces every `{{ VAR }}` in `text` with `lookup("VAR")`.
///
/// # Errors
///
/// Returns [`ConfigError::MissingEnv`] for a placeholder `lookup` has no value for.
pub fn render_env_placeholders(
    text: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let mut rendered = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find("{{") {
        let Some(close) = rest[open + 2..].find("}}") else {
            break;
        };
        let name = rest[open + 2..open + 2 + close].trim();
        let value = lookup(name).ok_or_else(|| ConfigError::MissingEnv(name.to_owned()))?;
        rendered.push_str(&rest[..open]);
        rendered.push_str(&value);
        rest = &rest[open + 2 + close + 2..];
    }
    rendered.push_str(rest);
    Ok(rendered)
}

impl RelayConfig {
    /// Reads `path`, renders placeholders from the process environment and parses the result.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`], [`ConfigError::MissingEnv`] or [`ConfigError::Toml`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml(&text, |name| std::env::var(name).ok())
    }

    /// Parses `text` after rendering its placeholders through `lookup`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingEnv`] or [`ConfigError::Toml`].
    pub fn from_toml(
        text: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let rendered = render_env_placeholders(text, lookup)?;
        Ok(toml::from_str(&rendered)?)
    }

    /// Relay, scanner and router settings from `[relay]`.
    #[must_use]
    pub fn relay_builder(&self) -> RelayBuilder {
        let relay = &self.relay;
        let scanner = EventScannerBuilder::new()
            .batch_size(relay.batch_size)
            .loop_interval(Duration::from_secs(relay.loop_interval_secs))
            .batch_pause(Duration::from_millis(relay.batch_pause_ms))
            .source_pause(Duration::from_millis(relay.source_pause_ms))
            .start_height(relay.start_block);
        let router = SubscriptionRouter::builder()
            .allow_wildcard(relay.allow_wildcard)
            .dispatch_pause(Duration::from_millis(relay.dispatch_pause_ms));
        RelayBuilder::new().scanner(scanner).router(router).queue_capacity(relay.queue_capacity)
    }

    /// Applies the `[rpc]` timeout and retry settings to a provider builder.
    #[must_use]
    pub fn configure_provider(&self, builder: ChainProviderBuilder) -> ChainProviderBuilder {
        builder
            .call_timeout(Duration::from_secs(self.rpc.call_timeout_secs))
            .max_retries(self.rpc.max_retries)
            .min_delay(Duration::from_millis(self.rpc.min_delay_ms))
    }

    /// Endpoints of every chain a contract lives on.
    ///
    /// Explicit `[[rpc.endpoints]]` win; other chains fall back to Infura when a key is set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownChain`] for a contract chain that cannot be reached.
    pub fn endpoint_table(&self) -> Result<EndpointTable, ConfigError> {
        let mut table = EndpointTable::new();
        for endpoint in &self.rpc.endpoints {
            table.insert(endpoint.chain_id, endpoint.url.clone(), endpoint.fallbacks.clone());
        }
        for contract in &self.contracts {
            let reachable = match &self.rpc.infura_api_key {
                Some(key) => table.ensure_infura(contract.chain_id, key),
                None => table.get(contract.chain_id).is_some(),
            };
            if !reachable {
                return Err(ConfigError::UnknownChain(contract.chain_id));
            }
        }
        Ok(table)
    }

    /// Builds one tracked source per configured `(contract, event)`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidAddress`], [`ConfigError::UnknownEvent`], or any error of
    /// [`AbiCache::load`].
    pub fn catalog(&self, abis: &mut AbiCache) -> Result<SourceCatalog, ConfigError> {
        let mut catalog = SourceCatalog::default();
        for contract in &self.contracts {
            let address: Address = contract
                .address
                .parse()
                .map_err(|_| ConfigError::InvalidAddress(contract.address.clone()))?;
            let abi = abis.load(&contract.abi_file)?;
            let display = DisplayMetadata {
                name: contract.name.clone(),
                description: contract.description.clone(),
                color: contract.color,
            };

            for event_name in &contract.events {
                let schema = abi
                    .event(event_name)
                    .and_then(|overloads| overloads.first())
                    .ok_or_else(|| ConfigError::UnknownEvent {
                        contract: contract.name.clone(),
                        event: event_name.clone(),
                    })?;
                let source =
                    TrackedSource::new(contract.chain_id, address, schema.clone(), display.clone());
                catalog.push(contract.name.clone(), source);
            }
        }
        Ok(catalog)
    }

    /// The Discord directory from `[discord]`, if configured.
    #[must_use]
    pub fn discord_directory(&self) -> Option<DiscordDirectory> {
        self.discord
            .as_ref()
            .map(|discord| DiscordDirectory::with_base(discord.token.clone(), &discord.api_base))
    }

    /// Creates every configured sink and subscribes it on `router`.
    ///
    /// A sink that cannot be created (bad URL, channel not resolvable) is left out; its error is
    /// logged and returned so the caller can report it. Everything else registers normally.
    ///
    /// # Errors
    ///
    /// Invalid source selectors, wildcard selectors while wildcards are disabled, and
    /// [`ConfigError::DuplicateSink`] when two `[[webhooks]]` / `[[channels]]` entries share a
    /// name.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all))]
    pub async fn register_sinks(
        &self,
        router: &SubscriptionRouter,
        catalog: &SourceCatalog,
        directory: Option<&dyn ChannelDirectory>,
    ) -> Result<Vec<ConfigError>, ConfigError> {
        let mut names = BTreeSet::new();
        let configured = self.webhooks.iter().map(|webhook| &webhook.name);
        for name in configured.chain(self.channels.iter().map(|channel| &channel.name)) {
            if !names.insert(name) {
                return Err(ConfigError::DuplicateSink(name.clone()));
            }
        }

        let mut disabled = vec![];
        let client = Client::new();

        for webhook in &self.webhooks {
            let targets = catalog.targets(webhook.sources.as_deref())?;
            let url = match Url::parse(&webhook.url) {
                Ok(url) => url,
                Err(err) => {
                    disabled.push(disable(&webhook.name, err.to_string()));
                    continue;
                }
            };
            let sink = Arc::new(
                WebhookSink::with_client(&webhook.name, url, client.clone())
                    .filter(webhook.filter.clone()),
            );
            for target in targets {
                router.subscribe(target, sink.clone())?;
            }
        }

        for channel in &self.channels {
            let targets = catalog.targets(channel.sources.as_deref())?;
            let Some(directory) = directory else {
                disabled.push(disable(&channel.name, "no [discord] section".to_owned()));
                continue;
            };
            let resolved = ChannelSink::resolve(&channel.name, &channel.channel_id, directory);
            let sink = match resolved.await {
                Ok(sink) => Arc::new(sink),
                Err(err) => {
                    error!(error = %err, "Disabling sink");
                    disabled.push(err);
                    continue;
                }
            };
            for target in targets {
                router.subscribe(target, sink.clone())?;
            }
        }

        Ok(disabled)
    }
}

fn disable(name: &str, reason: String) -> ConfigError {
    let err = ConfigError::UnresolvableSink { name: name.to_owned(), reason };
    error!(error = %err, "Disabling sink");
    err
}

/// ABI files loaded once at startup, keyed by path.
#[derive(Debug, Default)]
pub struct AbiCache {
    base: PathBuf,
    entries: HashMap<PathBuf, JsonAbi>,
}

impl AbiCache {
    /// A cache resolving relative paths against `base`.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into(), entries: HashMap::new() }
    }

    /// The ABI at `path`, read and parsed on first use.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, [`ConfigError::Abi`] if it is not a JSON
    /// ABI.
    pub fn load(&mut self, path: &Path) -> Result<&JsonAbi, ConfigError> {
        let path = self.base.join(path);
        if !self.entries.contains_key(&path) {
            let text = fs::read_to_string(&path)
                .map_err(|source| ConfigError::Io { path: path.clone(), source })?;
            let abi: JsonAbi = serde_json::from_str(&text)
                .map_err(|source| ConfigError::Abi { path: path.clone(), source })?;
            debug!(path = %path.display(), events = abi.events.len(), "Loaded ABI");
            self.entries.insert(path.clone(), abi);
        }
        self.entries.get(&path).ok_or_else(|| ConfigError::Io {
            path: path.clone(),
            source: std::io::ErrorKind::NotFound.into(),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Tracked sources together with the contract names they were configured under.
#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    entries: Vec<(String, TrackedSource)>,
}

impl SourceCatalog {
    fn push(&mut self, contract: String, source: TrackedSource) {
        self.entries.push((contract, source));
    }

    #[must_use]
    pub fn sources(&self) -> Vec<TrackedSource> {
        self.entries.iter().map(|(_, source)| source.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves one `"<contract>:<event>"` or `"*"` selector.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidSelector`], [`ConfigError::UnknownContract`] or
    /// [`ConfigError::UnknownEvent`].
    pub fn resolve(&self, selector: &str) -> Result<SubscriptionTarget, ConfigError> {
        let selector = selector.trim();
        if selector == WILDCARD_SELECTOR {
            return Ok(SubscriptionTarget::AllSources);
        }
        let Some((contract, event)) = selector.split_once(':') else {
            return Err(ConfigError::InvalidSelector(selector.to_owned()));
        };
        let (contract, event) = (contract.trim(), event.trim());
        if contract.is_empty() || event.is_empty() {
            return Err(ConfigError::InvalidSelector(selector.to_owned()));
        }

        let mut known_contract = false;
        for (name, source) in &self.entries {
            if name != contract {
                continue;
            }
            known_contract = true;
            if source.event_name() == event {
                return Ok(SubscriptionTarget::Source(source.identity().clone()));
            }
        }
        if known_contract {
            let (contract, event) = (contract.to_owned(), event.to_owned());
            Err(ConfigError::UnknownEvent { contract, event })
        } else {
            Err(ConfigError::UnknownContract(contract.to_owned()))
        }
    }

    /// Targets for a sink's `sources` list; every tracked source when `selectors` is `None`.
    ///
    /// # Errors
    ///
    /// Any error of [`SourceCatalog::resolve`].
    pub fn targets(
        &self,
        selectors: Option<&[String]>,
    ) -> Result<Vec<SubscriptionTarget>, ConfigError> {
        match selectors {
            Some(selectors) => selectors.iter().map(|selector| self.resolve(selector)).collect(),
            None => Ok(self
                .entries
                .iter()
                .map(|(_, source)| SubscriptionTarget::Source(source.identity().clone()))
                .collect()),
        }
    }

    /// The identity configured for `contract:event`, if any.
    #[must_use]
    pub fn identity(&self, contract: &str, event: &str) -> Option<&SourceId> {
        self.entries
            .iter()
            .find(|(name, source)| name == contract && source.event_name() == event)
            .map(|(_, source)| source.identity())
    }
}
