//! The Source Client boundary: chain head queries and ranged log fetches.
//!
//! The scanner only depends on the [`SourceClient`] trait. [`RpcSourceClient`] is the
//! production implementation, backed by one [`ChainProvider`] per chain: a thin wrapper around
//! alloy's [`RootProvider`](alloy::providers::RootProvider) that adds
//! * a bounded per-call timeout
//! * exponential backoff retries
//! * failover to fallback endpoints in the order they were configured
//!
//! Timeouts are owned here; the scanner treats an RPC call that has not returned as a plain
//! blocking wait.

mod builder;
pub mod networks;
mod provider;
mod rpc;

use std::{future::Future, sync::Arc};

use alloy::{
    rpc::types::Log,
    transports::{RpcError, TransportErrorKind},
};
use thiserror::Error;

pub use builder::{
    ChainProviderBuilder, DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_RETRIES, DEFAULT_MIN_DELAY,
};
pub use provider::ChainProvider;
pub use rpc::RpcSourceClient;

use crate::types::{ChainId, TrackedSource};

/// Transport failure talking to a source.
///
/// Never fatal: the scanner logs it, leaves the cursor where it was and retries the same range
/// on its next cycle.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("RPC error: {0}")]
    RpcError(Arc<RpcError<TransportErrorKind>>),

    #[error("operation timed out")]
    Timeout,

    #[error("no provider configured for chain {0}")]
    UnknownChain(ChainId),
}

impl From<RpcError<TransportErrorKind>> for Error {
    fn from(err: RpcError<TransportErrorKind>) -> Self {
        Error::RpcError(Arc::new(err))
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

/// Reads chain heads and logs for tracked sources.
///
/// Implementations must return the logs of a range in canonical order (block number, then log
/// index); the scanner forwards them without re-sorting.
pub trait SourceClient: Send + Sync + 'static {
    /// Current chain head height of `chain_id`.
    fn head_height(&self, chain_id: ChainId) -> impl Future<Output = Result<u64, Error>> + Send;

    /// All logs emitted for `source` in the inclusive block range `[from, to]`.
    fn get_logs(
        &self,
        source: &TrackedSource,
        from: u64,
        to: u64,
    ) -> impl Future<Output = Result<Vec<Log>, Error>> + Send;
}

impl<C: SourceClient> SourceClient for Arc<C> {
    fn head_height(&self, chain_id: ChainId) -> impl Future<Output = Result<u64, Error>> + Send {
        self.as_ref().head_height(chain_id)
    }

    fn get_logs(
        &self,
        source: &TrackedSource,
        from: u64,
        to: u64,
    ) -> impl Future<Output = Result<Vec<Log>, Error>> + Send {
        self.as_ref().get_logs(source, from, to)
    }
}
