use std::{mem::discriminant, path::PathBuf};

use thiserror::Error;

use crate::{
    source,
    types::{ChainId, SourceId},
};

/// Errors emitted by one scan cycle of a source.
///
/// None of these are fatal to the scanner as a whole: the cycle is abandoned with the cursor left
/// where it was, and the next cycle retries the same range.
#[derive(Error, Debug, Clone)]
pub enum ScannerError {
    /// The Source Client failed to report the head or return logs.
    #[error("transport error: {0}")]
    Transport(#[from] source::Error),

    /// The delivery queue's consumer is gone; events of the batch could not be handed over.
    #[error("delivery queue closed")]
    DeliveryQueueClosed,

    /// A manual trigger named a source the scanner does not track.
    #[error("source {0} is not tracked")]
    UnknownSource(SourceId),
}

impl PartialEq for ScannerError {
    fn eq(&self, other: &ScannerError) -> bool {
        discriminant(self) == discriminant(other)
    }
}

/// Invalid configuration, detected before anything starts running.
///
/// At startup these halt the process, except for a single unresolvable sink, which only disables
/// that sink.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configured batch size is invalid (must be greater than zero).
    #[error("Batch size must be greater than 0")]
    InvalidBatchSize,

    /// The configured delivery queue capacity is invalid (must be greater than zero).
    #[error("Queue capacity must be greater than 0")]
    InvalidQueueCapacity,

    /// The configured loop interval is invalid (must be non-zero).
    #[error("Loop interval must be greater than 0")]
    InvalidLoopInterval,

    #[error("no sources to scan")]
    NoSources,

    #[error("source {0} is configured more than once")]
    DuplicateSource(SourceId),

    #[error("no RPC endpoint for chain {0}")]
    UnknownChain(ChainId),

    #[error("unknown contract `{0}`")]
    UnknownContract(String),

    #[error("contract `{contract}` has no event named `{event}`")]
    UnknownEvent { contract: String, event: String },

    #[error("invalid address `{0}`")]
    InvalidAddress(String),

    #[error("invalid source selector `{0}`, expected `<contract>:<event>` or `*`")]
    InvalidSelector(String),

    #[error("environment variable `{0}` referenced by the configuration is not set")]
    MissingEnv(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid ABI in {path}: {source}")]
    Abi {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("sink `{name}` cannot be resolved: {reason}")]
    UnresolvableSink { name: String, reason: String },

    #[error("sink name `{0}` is already taken by another sink")]
    DuplicateSink(String),

    #[error("wildcard subscriptions are disabled")]
    WildcardDisabled,
}
