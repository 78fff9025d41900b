use std::{collections::BTreeSet, num::NonZeroU64, sync::Arc, time::Duration};

use crate::{
    error::ConfigError,
    scanner::{EventScanner, ScanConfig},
    source::SourceClient,
    types::TrackedSource,
};

/// Default maximum number of blocks fetched per batch.
pub const DEFAULT_BATCH_SIZE: u64 = 1000;
/// Default interval between two scan cycles of the same source.
pub const DEFAULT_LOOP_INTERVAL: Duration = Duration::from_secs(10);
/// Default pause between two batches of the same source.
pub const DEFAULT_BATCH_PAUSE: Duration = Duration::from_millis(100);
/// Default offset between the first cycles of consecutive sources.
pub const DEFAULT_SOURCE_PAUSE: Duration = Duration::from_millis(100);

/// Where a source's cursor starts when the scanner starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartHeight {
    /// At the chain head: only blocks produced after startup are scanned.
    #[default]
    Latest,
    /// At the given height: the first scanned block is the one after it.
    Number(u64),
}

/// Builder/configuration for the [`EventScanner`].
#[derive(Debug, Clone)]
pub struct EventScannerBuilder {
    batch_size: u64,
    loop_interval: Duration,
    batch_pause: Duration,
    source_pause: Duration,
    start_height: StartHeight,
}

impl Default for EventScannerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventScannerBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            loop_interval: DEFAULT_LOOP_INTERVAL,
            batch_pause: DEFAULT_BATCH_PAUSE,
            source_pause: DEFAULT_SOURCE_PAUSE,
            start_height: StartHeight::Latest,
        }
    }

    /// Sets the maximum number of blocks per fetched range.
    ///
    /// Must be greater than 0.
    #[must_use]
    pub fn batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the interval between scan cycles of each source.
    ///
    /// Must be greater than 0.
    #[must_use]
    pub fn loop_interval(mut self, loop_interval: Duration) -> Self {
        self.loop_interval = loop_interval;
        self
    }

    /// Sets the pause between two batches of the same source.
    #[must_use]
    pub fn batch_pause(mut self, batch_pause: Duration) -> Self {
        self.batch_pause = batch_pause;
        self
    }

    /// Sets the offset between the first cycles of consecutive sources, spreading their
    /// requests over the loop interval.
    #[must_use]
    pub fn source_pause(mut self, source_pause: Duration) -> Self {
        self.source_pause = source_pause;
        self
    }

    #[must_use]
    pub fn start_height(mut self, start_height: StartHeight) -> Self {
        self.start_height = start_height;
        self
    }

    /// Validates the configuration and binds it to `client` and `sources`.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::InvalidBatchSize`] - batch size is 0.
    /// * [`ConfigError::InvalidLoopInterval`] - loop interval is zero.
    /// * [`ConfigError::NoSources`] - `sources` is empty.
    /// * [`ConfigError::DuplicateSource`] - two sources share an identity.
    pub fn build<C: SourceClient>(
        self,
        client: C,
        sources: Vec<TrackedSource>,
    ) -> Result<EventScanner<C>, ConfigError> {
        let batch_size = NonZeroU64::new(self.batch_size).ok_or(ConfigError::InvalidBatchSize)?;
        if self.loop_interval.is_zero() {
            return Err(ConfigError::InvalidLoopInterval);
        }
        if sources.is_empty() {
            return Err(ConfigError::NoSources);
        }

        let mut seen = BTreeSet::new();
        for source in &sources {
            if !seen.insert(source.identity()) {
                return Err(ConfigError::DuplicateSource(source.identity().clone()));
            }
        }

        Ok(EventScanner {
            client: Arc::new(client),
            sources,
            config: ScanConfig {
                batch_size,
                loop_interval: self.loop_interval,
                batch_pause: self.batch_pause,
                source_pause: self.source_pause,
                start_height: self.start_height,
            },
        })
    }
}
