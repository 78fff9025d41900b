use alloy::{
    dyn_abi::{DynSolValue, EventExt},
    primitives::{Address, B256, hex},
    rpc::types::Log,
};
use chrono::Utc;
use thiserror::Error;

use crate::{
    event::{ArgValue, Event, EventArg, EventArgs},
    types::TrackedSource,
};

/// A raw log whose shape does not match the tracked source's schema.
///
/// Only the offending log is dropped; the rest of its batch is still delivered.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("log is missing `{0}`")]
    MissingField(&'static str),

    #[error("log emitted by {found}, expected {expected}")]
    AddressMismatch { expected: Address, found: Address },

    #[error("log topic0 {found:?} does not match event selector {expected}")]
    SelectorMismatch { expected: B256, found: Option<B256> },

    #[error("failed to decode log: {0}")]
    Abi(#[from] alloy::dyn_abi::Error),

    #[error("decoded {found} values but the schema declares {expected} inputs")]
    ArityMismatch { expected: usize, found: usize },
}

/// Converts a raw log fetched for `source` into an [`Event`].
///
/// Arguments are returned in schema declaration order, interleaving indexed (topic) and
/// non-indexed (data) inputs.
///
/// # Errors
///
/// Returns [`DecodeError`] when the log lacks block/transaction coordinates, was emitted by a
/// different contract or event, or its topics/data do not decode against the schema.
pub fn decode(raw: &Log, source: &TrackedSource) -> Result<Event, DecodeError> {
    let block_number = raw.block_number.ok_or(DecodeError::MissingField("blockNumber"))?;
    let block_hash = raw.block_hash.ok_or(DecodeError::MissingField("blockHash"))?;
    let tx_hash = raw.transaction_hash.ok_or(DecodeError::MissingField("transactionHash"))?;
    let tx_index = raw.transaction_index.ok_or(DecodeError::MissingField("transactionIndex"))?;
    let log_index = raw.log_index.ok_or(DecodeError::MissingField("logIndex"))?;

    if raw.address() != source.contract_address() {
        return Err(DecodeError::AddressMismatch {
            expected: source.contract_address(),
            found: raw.address(),
        });
    }

    if let Some(expected) = source.selector() {
        let found = raw.topic0().copied();
        if found != Some(expected) {
            return Err(DecodeError::SelectorMismatch { expected, found });
        }
    }

    let schema = source.raw_schema();
    let decoded = schema.decode_log(raw.data())?;

    let declared = schema.inputs.len();
    let found = decoded.indexed.len() + decoded.body.len();
    if declared != found {
        return Err(DecodeError::ArityMismatch { expected: declared, found });
    }

    let mut indexed = decoded.indexed.into_iter();
    let mut body = decoded.body.into_iter();
    let mut args = Vec::with_capacity(declared);
    for (position, input) in schema.inputs.iter().enumerate() {
        let value = if input.indexed { indexed.next() } else { body.next() };
        let Some(value) = value else {
            return Err(DecodeError::ArityMismatch { expected: declared, found });
        };
        let name =
            if input.name.is_empty() { format!("arg{position}") } else { input.name.clone() };
        args.push(EventArg { name, value: render(value) });
    }

    Ok(Event {
        chain_id: source.chain_id(),
        contract_address: source.contract_address(),
        event_type: source.event_name().to_owned(),
        block_number,
        block_hash,
        tx_hash,
        tx_index,
        log_index,
        args: EventArgs::new(args),
        observed_at: Utc::now(),
        display: source.display().clone(),
    })
}

#[allow(unreachable_patterns)]
fn render(value: DynSolValue) -> ArgValue {
    match value {
        DynSolValue::Bool(value) => ArgValue::Bool(value),
        DynSolValue::Int(value, _) => ArgValue::Number(value.to_string()),
        DynSolValue::Uint(value, _) => ArgValue::Number(value.to_string()),
        DynSolValue::Address(address) => ArgValue::Address(address.to_checksum(None)),
        DynSolValue::FixedBytes(word, size) => ArgValue::Bytes(hex::encode(&word[..size])),
        DynSolValue::Function(function) => ArgValue::Bytes(hex::encode(function)),
        DynSolValue::Bytes(bytes) => ArgValue::Bytes(hex::encode(bytes)),
        DynSolValue::String(text) => ArgValue::Text(text),
        DynSolValue::Array(values)
        | DynSolValue::FixedArray(values)
        | DynSolValue::Tuple(values) => {
            ArgValue::List(values.into_iter().map(render).collect())
        }
        other => ArgValue::Text(format!("{other:?}")),
    }
}
