use std::collections::HashMap;

use alloy::{providers::RootProvider, rpc::types::Log};

use crate::{
    source::{ChainProvider, ChainProviderBuilder, Error, SourceClient, networks::EndpointTable},
    types::{ChainId, TrackedSource},
};

/// [`SourceClient`] backed by one [`ChainProvider`] per chain.
#[derive(Debug, Clone, Default)]
pub struct RpcSourceClient {
    providers: HashMap<ChainId, ChainProvider>,
}

impl RpcSourceClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `provider` for its chain, replacing any previous provider for that chain.
    #[must_use]
    pub fn with_provider(mut self, provider: ChainProvider) -> Self {
        self.providers.insert(provider.chain_id(), provider);
        self
    }

    /// Connects to every chain of `endpoints`.
    ///
    /// `configure` receives each chain's builder after its fallbacks are attached, so callers can
    /// apply timeout and retry settings uniformly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RpcError`] if any endpoint URL cannot be connected to.
    pub async fn connect<F>(endpoints: &EndpointTable, configure: F) -> Result<Self, Error>
    where
        F: Fn(ChainProviderBuilder) -> ChainProviderBuilder,
    {
        let mut client = Self::new();
        for (chain_id, chain_endpoints) in endpoints.iter() {
            let primary = RootProvider::connect(&chain_endpoints.primary).await?;
            let mut builder = ChainProviderBuilder::new(chain_id, primary);
            for url in &chain_endpoints.fallbacks {
                builder = builder.fallback(RootProvider::connect(url).await?);
            }
            debug!(
                chain_id = chain_id,
                fallbacks = chain_endpoints.fallbacks.len(),
                "Connected chain provider"
            );
            client = client.with_provider(configure(builder).build());
        }
        Ok(client)
    }

    #[must_use]
    pub fn provider(&self, chain_id: ChainId) -> Option<&ChainProvider> {
        self.providers.get(&chain_id)
    }

    fn require(&self, chain_id: ChainId) -> Result<&ChainProvider, Error> {
        self.providers.get(&chain_id).ok_or(Error::UnknownChain(chain_id))
    }
}

impl SourceClient for RpcSourceClient {
    async fn head_height(&self, chain_id: ChainId) -> Result<u64, Error> {
        self.require(chain_id)?.get_block_number().await
    }

    async fn get_logs(
        &self,
        source: &TrackedSource,
        from: u64,
        to: u64,
    ) -> Result<Vec<Log>, Error> {
        let provider = self.require(source.chain_id())?;
        provider.get_logs(&source.log_filter(from, to)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_utils::TRANSFER_SIGNATURE, types::DisplayMetadata};
    use alloy::{
        json_abi::Event as EventSchema,
        primitives::{Address, U64, address},
        providers::mock::Asserter,
        rpc::client::RpcClient,
    };

    const TOKEN: Address = address!("0x00000000000000000000000000000000000000aa");

    fn client(chain_id: ChainId, asserter: &Asserter) -> RpcSourceClient {
        let provider = RootProvider::new(RpcClient::mocked(asserter.clone()));
        let provider = ChainProviderBuilder::fragile(chain_id, provider).build();
        RpcSourceClient::new().with_provider(provider)
    }

    fn source(chain_id: ChainId) -> TrackedSource {
        TrackedSource::new(
            chain_id,
            TOKEN,
            EventSchema::parse(TRANSFER_SIGNATURE).unwrap(),
            DisplayMetadata::named("Token"),
        )
    }

    #[tokio::test]
    async fn head_height_routes_by_chain() {
        let asserter = Asserter::new();
        asserter.push_success(&U64::from(105));

        assert_eq!(client(137, &asserter).head_height(137).await.unwrap(), 105);
    }

    #[tokio::test]
    async fn unknown_chain_is_a_transport_error() {
        let asserter = Asserter::new();
        let client = client(1, &asserter);

        assert!(matches!(client.head_height(5).await, Err(Error::UnknownChain(5))));
        assert!(matches!(client.get_logs(&source(5), 1, 2).await, Err(Error::UnknownChain(5))));
    }

    #[tokio::test]
    async fn get_logs_returns_provider_logs() {
        let asserter = Asserter::new();
        let log = Log {
            inner: alloy::primitives::Log::new_unchecked(TOKEN, vec![], Default::default()),
            block_number: Some(101),
            log_index: Some(0),
            ..Default::default()
        };
        asserter.push_success(&vec![log.clone()]);

        let logs = client(1, &asserter).get_logs(&source(1), 101, 102).await.unwrap();

        assert_eq!(logs, vec![log]);
    }

    #[tokio::test]
    async fn provider_failure_surfaces_as_rpc_error() {
        let asserter = Asserter::new();
        asserter.push_failure_msg("upstream unavailable");

        let err = client(1, &asserter).get_logs(&source(1), 101, 102).await.unwrap_err();

        assert!(matches!(err, Error::RpcError(_)));
    }
}
