use std::{fmt::Debug, future::Future, time::Duration};

use alloy::{
    providers::{Provider, RootProvider},
    rpc::types::{Filter, Log},
    transports::{RpcError, TransportErrorKind},
};
use backon::{ExponentialBuilder, Retryable};
use tokio::time::timeout;

use crate::{source::Error, types::ChainId};

/// JSON-RPC provider for one chain with retry, timeout and failover.
///
/// Every call is wrapped in a total timeout and retried with exponential backoff up to
/// `max_retries`. When the primary endpoint keeps failing, the call is repeated against each
/// fallback endpoint in the order they were added.
#[derive(Clone, Debug)]
pub struct ChainProvider {
    pub(crate) chain_id: ChainId,
    pub(crate) primary_provider: RootProvider,
    pub(crate) fallback_providers: Vec<RootProvider>,
    pub(crate) call_timeout: Duration,
    pub(crate) max_retries: usize,
    pub(crate) min_delay: Duration,
}

impl ChainProvider {
    #[must_use]
    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    #[must_use]
    pub fn primary(&self) -> &RootProvider {
        &self.primary_provider
    }

    /// Fetch the latest block number.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_block_number(&self) -> Result<u64, Error> {
        trace!(chain_id = self.chain_id, "eth_blockNumber called");
        let result = self
            .try_operation_with_failover(|provider| async move {
                provider.get_block_number().await
            })
            .await;
        if let Err(e) = &result {
            error!(chain_id = self.chain_id, error = %e, "eth_blockNumber failed");
        }
        result
    }

    /// Fetch logs for the given [`Filter`].
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, Error> {
        trace!(chain_id = self.chain_id, "eth_getLogs called");
        let result = self
            .try_operation_with_failover(move |provider| async move {
                provider.get_logs(filter).await
            })
            .await;
        if let Err(e) = &result {
            error!(chain_id = self.chain_id, error = %e, "eth_getLogs failed");
        }
        result
    }

    /// Execute `operation` against the primary provider, then against each fallback.
    ///
    /// # Errors
    /// <a name="retry-errors"></a>
    ///
    /// * [`Error::Timeout`] if the last provider tried exceeded `call_timeout`.
    /// * [`Error::RpcError`] with the last provider's error once every provider failed.
    pub(crate) async fn try_operation_with_failover<T: Debug, F, Fut>(
        &self,
        operation: F,
    ) -> Result<T, Error>
    where
        F: Fn(RootProvider) -> Fut,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        let result = self.try_provider_with_timeout(self.primary(), &operation).await;
        let mut last_error = match result {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let num_fallbacks = self.fallback_providers.len();
        if num_fallbacks > 0 {
            info!(chain_id = self.chain_id, "Primary provider failed, trying fallback provider(s)");
        }

        for (idx, provider) in self.fallback_providers.iter().enumerate() {
            match self.try_provider_with_timeout(provider, &operation).await {
                Ok(value) => {
                    info!(
                        chain_id = self.chain_id,
                        provider_num = idx + 1,
                        "Fallback provider succeeded"
                    );
                    return Ok(value);
                }
                Err(e) => {
                    warn!(
                        chain_id = self.chain_id,
                        provider_num = idx + 1,
                        error = %e,
                        "Fallback provider failed"
                    );
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn try_provider_with_timeout<T, F, Fut>(
        &self,
        provider: &RootProvider,
        operation: F,
    ) -> Result<T, Error>
    where
        F: Fn(RootProvider) -> Fut,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        let retry_strategy = ExponentialBuilder::default()
            .with_max_times(self.max_retries)
            .with_min_delay(self.min_delay);

        timeout(
            self.call_timeout,
            (|| operation(provider.clone()))
                .retry(retry_strategy)
                .notify(|err: &RpcError<TransportErrorKind>, dur: Duration| {
                    debug!(error = %err, retry_in_ms = dur.as_millis(), "RPC error, retrying");
                })
                .sleep(tokio::time::sleep),
        )
        .await
        .map_err(Error::from)?
        .map_err(Error::from)
    }
}
