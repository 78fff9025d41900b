//! The immutable event value produced by the decoder and carried through the delivery queue.

mod decoder;

pub use decoder::{DecodeError, decode};

use alloy::primitives::{Address, B256, keccak256};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer, ser::SerializeMap};

use crate::types::{ChainId, DisplayMetadata, SourceId};

/// A decoded argument value.
///
/// Numbers are rendered as decimal strings (they routinely exceed JSON's safe integer range),
/// byte values as lowercase hex without a `0x` prefix, and list or tuple values as sequences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Number(String),
    Address(String),
    Bytes(String),
    Text(String),
    List(Vec<ArgValue>),
}

impl ArgValue {
    /// Renders the value the same way it is shown to sinks.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            ArgValue::Bool(value) => value.to_string(),
            ArgValue::Number(value)
            | ArgValue::Address(value)
            | ArgValue::Bytes(value)
            | ArgValue::Text(value) => value.clone(),
            ArgValue::List(values) => {
                let inner: Vec<String> = values.iter().map(ArgValue::render).collect();
                format!("[{}]", inner.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventArg {
    pub name: String,
    pub value: ArgValue,
}

/// Arguments in the order the event schema declares them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventArgs(Vec<EventArg>);

impl EventArgs {
    #[must_use]
    pub fn new(args: Vec<EventArg>) -> Self {
        Self(args)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.0.iter().find(|arg| arg.name == name).map(|arg| &arg.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventArg> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for EventArgs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for arg in &self.0 {
            map.serialize_entry(&arg.name, &arg.value)?;
        }
        map.end()
    }
}

/// One decoded on-chain log.
///
/// Created once by the decoder, then moved through the delivery queue to the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub chain_id: ChainId,
    pub contract_address: Address,
    pub event_type: String,
    pub block_number: u64,
    pub block_hash: B256,
    pub tx_hash: B256,
    pub tx_index: u64,
    pub log_index: u64,
    pub args: EventArgs,
    pub observed_at: DateTime<Utc>,
    #[serde(skip)]
    pub display: DisplayMetadata,
}

impl Event {
    /// `keccak256(tx_hash || log_index as 4 big-endian bytes)`.
    ///
    /// Deterministic across rescans of the same log; used for logging and display, not as a
    /// deduplication key.
    #[must_use]
    pub fn id(&self) -> B256 {
        // log indexes are block-scoped and always fit in 4 bytes
        #[allow(clippy::cast_possible_truncation)]
        let log_index = (self.log_index as u32).to_be_bytes();
        let mut preimage = [0u8; 36];
        preimage[..32].copy_from_slice(self.tx_hash.as_slice());
        preimage[32..].copy_from_slice(&log_index);
        keccak256(preimage)
    }

    /// First eight hex characters of [`Event::id`], for log lines and message titles.
    #[must_use]
    pub fn short_id(&self) -> String {
        alloy::primitives::hex::encode(&self.id()[..4])
    }

    /// Identity of the source this event was scanned from.
    #[must_use]
    pub fn source_id(&self) -> SourceId {
        SourceId::new(self.chain_id, self.contract_address, self.event_type.clone())
    }

    /// Whether this event belongs to `source`, without allocating a [`SourceId`].
    #[must_use]
    pub fn is_from(&self, source: &SourceId) -> bool {
        self.chain_id == source.chain_id
            && self.contract_address == source.contract_address
            && self.event_type == source.event_name
    }

    /// Position of the log within the chain, used for ordering checks.
    #[must_use]
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, b256};

    fn sample(log_index: u64) -> Event {
        Event {
            chain_id: 1,
            contract_address: address!("0x00000000000000000000000000000000000000aa"),
            event_type: "Transfer".into(),
            block_number: 10,
            block_hash: B256::ZERO,
            tx_hash: b256!("0x1111111111111111111111111111111111111111111111111111111111111111"),
            tx_index: 0,
            log_index,
            args: EventArgs::new(vec![
                EventArg { name: "to".into(), value: ArgValue::Address("0xabc".into()) },
                EventArg { name: "amount".into(), value: ArgValue::Number("5".into()) },
            ]),
            observed_at: DateTime::from_timestamp(0, 0).unwrap(),
            display: DisplayMetadata::named("Token"),
        }
    }

    #[test]
    fn id_hashes_tx_hash_and_big_endian_log_index() {
        let event = sample(7);
        let mut preimage = event.tx_hash.to_vec();
        preimage.extend_from_slice(&[0, 0, 0, 7]);

        assert_eq!(event.id(), keccak256(&preimage));
        assert_eq!(event.short_id().len(), 8);
    }

    #[test]
    fn id_differs_by_log_index() {
        assert_ne!(sample(0).id(), sample(1).id());
        assert_eq!(sample(3).id(), sample(3).id());
    }

    #[test]
    fn args_serialize_as_ordered_object() {
        let json = serde_json::to_string(&sample(0).args).unwrap();
        assert_eq!(json, r#"{"to":"0xabc","amount":"5"}"#);
    }

    #[test]
    fn list_values_render_as_sequences() {
        let value = ArgValue::List(vec![ArgValue::Bytes("ff".into()), ArgValue::Bool(true)]);

        assert_eq!(value.render(), "[ff, true]");
        assert_eq!(serde_json::to_string(&value).unwrap(), r#"["ff",true]"#);
    }

    #[test]
    fn is_from_matches_identity_triple() {
        let event = sample(0);
        assert!(event.is_from(&event.source_id()));
        assert!(!event.is_from(&SourceId::new(5, event.contract_address, "Transfer")));
    }
}
