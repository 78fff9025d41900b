use std::time::Duration;

use alloy::providers::RootProvider;

use crate::{source::ChainProvider, types::ChainId};

// RPC retry and timeout settings
/// Default total timeout of one RPC call, retries included.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);
/// Default maximum number of retry attempts per endpoint.
pub const DEFAULT_MAX_RETRIES: usize = 3;
/// Default base delay between retries.
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(1);

/// Builder for constructing a [`ChainProvider`].
///
/// Use this to configure timeouts, retry/backoff, and one or more fallback endpoints.
#[derive(Debug)]
pub struct ChainProviderBuilder {
    chain_id: ChainId,
    primary_provider: RootProvider,
    fallback_providers: Vec<RootProvider>,
    call_timeout: Duration,
    max_retries: usize,
    min_delay: Duration,
}

impl ChainProviderBuilder {
    /// Create a new builder for `chain_id` with default settings.
    ///
    /// The provided provider is treated as the primary provider.
    #[must_use]
    pub fn new(chain_id: ChainId, provider: RootProvider) -> Self {
        Self {
            chain_id,
            primary_provider: provider,
            fallback_providers: vec![],
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            min_delay: DEFAULT_MIN_DELAY,
        }
    }

    /// Create a builder with no retry attempts and only the timeout set.
    #[must_use]
    pub fn fragile(chain_id: ChainId, provider: RootProvider) -> Self {
        Self::new(chain_id, provider).max_retries(0).min_delay(Duration::ZERO)
    }

    /// Add a fallback provider to the list.
    ///
    /// Fallback providers are tried in insertion order once the primary provider times out or
    /// exhausts its retries.
    #[must_use]
    pub fn fallback(mut self, provider: RootProvider) -> Self {
        self.fallback_providers.push(provider);
        self
    }

    /// Set the maximum timeout for RPC operations.
    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the maximum number of retry attempts.
    #[must_use]
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay for exponential backoff retries.
    #[must_use]
    pub fn min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    #[must_use]
    pub fn build(self) -> ChainProvider {
        ChainProvider {
            chain_id: self.chain_id,
            primary_provider: self.primary_provider,
            fallback_providers: self.fallback_providers,
            call_timeout: self.call_timeout,
            max_retries: self.max_retries,
            min_delay: self.min_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::providers::mock::Asserter;

    fn mocked() -> RootProvider {
        RootProvider::new(alloy::rpc::client::RpcClient::mocked(Asserter::new()))
    }

    #[test]
    fn defaults_are_applied() {
        let provider = ChainProviderBuilder::new(137, mocked()).build();

        assert_eq!(provider.chain_id(), 137);
        assert_eq!(provider.call_timeout, DEFAULT_CALL_TIMEOUT);
        assert_eq!(provider.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(provider.min_delay, DEFAULT_MIN_DELAY);
        assert!(provider.fallback_providers.is_empty());
    }

    #[test]
    fn fragile_disables_retries() {
        let provider = ChainProviderBuilder::fragile(1, mocked())
            .fallback(mocked())
            .fallback(mocked())
            .call_timeout(Duration::from_secs(5))
            .build();

        assert_eq!(provider.max_retries, 0);
        assert_eq!(provider.min_delay, Duration::ZERO);
        assert_eq!(provider.call_timeout, Duration::from_secs(5));
        assert_eq!(provider.fallback_providers.len(), 2);
    }
}
