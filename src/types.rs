use std::fmt;

use alloy::{
    json_abi::Event as EventSchema,
    primitives::{Address, B256},
    rpc::types::Filter,
};
use serde::{Deserialize, Serialize};

/// Numeric EIP-155 chain identifier.
pub type ChainId = u64;

/// Default embed color for sources that do not configure one.
pub const DEFAULT_COLOR: u32 = 0x00ff00;

/// Identity of a tracked log stream: `(chain_id, contract_address, event_name)`.
///
/// Two sources may share a contract address as long as they differ by event name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId {
    pub chain_id: ChainId,
    pub contract_address: Address,
    pub event_name: String,
}

impl SourceId {
    #[must_use]
    pub fn new(
        chain_id: ChainId,
        contract_address: Address,
        event_name: impl Into<String>,
    ) -> Self {
        Self { chain_id, contract_address, event_name: event_name.into() }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let address = self.contract_address.to_string();
        write!(f, "{}|{}@{}", self.event_name, &address[..10], self.chain_id)
    }
}

/// Purely cosmetic metadata carried alongside a source and passed through to sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_color")]
    pub color: u32,
}

fn default_color() -> u32 {
    DEFAULT_COLOR
}

impl DisplayMetadata {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), description: String::new(), color: DEFAULT_COLOR }
    }
}

/// A single `(chain, contract, event)` stream the scanner polls, together with the event's
/// ABI description used to decode its logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedSource {
    id: SourceId,
    schema: EventSchema,
    display: DisplayMetadata,
}

impl TrackedSource {
    /// Creates a source tracking `schema` as emitted by `contract_address` on `chain_id`.
    ///
    /// The event name part of the identity is taken from the schema.
    #[must_use]
    pub fn new(
        chain_id: ChainId,
        contract_address: Address,
        schema: EventSchema,
        display: DisplayMetadata,
    ) -> Self {
        let id = SourceId::new(chain_id, contract_address, schema.name.clone());
        Self { id, schema, display }
    }

    #[must_use]
    pub fn identity(&self) -> &SourceId {
        &self.id
    }

    #[must_use]
    pub fn chain_id(&self) -> ChainId {
        self.id.chain_id
    }

    #[must_use]
    pub fn contract_address(&self) -> Address {
        self.id.contract_address
    }

    #[must_use]
    pub fn event_name(&self) -> &str {
        &self.id.event_name
    }

    /// The ABI description the decoder validates and decodes logs against.
    #[must_use]
    pub fn raw_schema(&self) -> &EventSchema {
        &self.schema
    }

    #[must_use]
    pub fn display(&self) -> &DisplayMetadata {
        &self.display
    }

    /// `topic0` of the event, `None` for anonymous events.
    #[must_use]
    pub fn selector(&self) -> Option<B256> {
        (!self.schema.anonymous).then(|| self.schema.selector())
    }

    /// Builds the `eth_getLogs` filter for the inclusive range `[from, to]`.
    #[must_use]
    pub fn log_filter(&self, from: u64, to: u64) -> Filter {
        let filter = Filter::new().address(self.id.contract_address).from_block(from).to_block(to);
        match self.selector() {
            Some(selector) => filter.event_signature(selector),
            None => filter,
        }
    }
}
