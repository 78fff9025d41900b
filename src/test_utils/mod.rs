//! Scriptable collaborators for tests: a mock Source Client, recording and failing sinks, and
//! builders for `Transfer` logs.

pub mod macros;

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use alloy::{
    json_abi::Event as EventSchema,
    primitives::{Address, B256, U256, address, keccak256},
    rpc::types::Log,
    sol,
    sol_types::SolEvent,
    transports::TransportErrorKind,
};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Semaphore, watch};

use crate::{
    event::{ArgValue, Event, EventArg, EventArgs},
    sink::{Sink, SinkError, SinkKind},
    source::{Error, SourceClient},
    types::{ChainId, DisplayMetadata, SourceId, TrackedSource},
};

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);
}

pub const TOKEN: Address = address!("0x00000000000000000000000000000000000000aa");
pub const ALICE: Address = address!("0x1000000000000000000000000000000000000001");
pub const BOB: Address = address!("0x2000000000000000000000000000000000000002");

pub const TRANSFER_SIGNATURE: &str =
    "event Transfer(address indexed from, address indexed to, uint256 value)";
pub const APPROVAL_SIGNATURE: &str =
    "event Approval(address indexed owner, address indexed spender, uint256 value)";

#[allow(clippy::missing_panics_doc)]
#[must_use]
pub fn transfer_source(chain_id: ChainId, contract: Address) -> TrackedSource {
    let schema = EventSchema::parse(TRANSFER_SIGNATURE).expect("valid signature");
    TrackedSource::new(chain_id, contract, schema, DisplayMetadata::named("Token"))
}

#[allow(clippy::missing_panics_doc)]
#[must_use]
pub fn approval_source(chain_id: ChainId, contract: Address) -> TrackedSource {
    let schema = EventSchema::parse(APPROVAL_SIGNATURE).expect("valid signature");
    TrackedSource::new(chain_id, contract, schema, DisplayMetadata::named("Token"))
}

/// A `Transfer(ALICE, BOB, value)` log emitted by `contract` at `(block_number, log_index)`.
#[must_use]
pub fn transfer_log(contract: Address, block_number: u64, log_index: u64, value: u64) -> Log {
    let data = Transfer { from: ALICE, to: BOB, value: U256::from(value) }.encode_log_data();
    Log {
        inner: alloy::primitives::Log { address: contract, data },
        block_number: Some(block_number),
        block_hash: Some(keccak256(block_number.to_be_bytes())),
        transaction_hash: Some(tx_hash(block_number, log_index)),
        transaction_index: Some(0),
        log_index: Some(log_index),
        ..Default::default()
    }
}

/// A log of `contract` whose data does not decode as a `Transfer`.
#[must_use]
pub fn garbage_log(contract: Address, block_number: u64, log_index: u64) -> Log {
    let mut log = transfer_log(contract, block_number, log_index, 0);
    log.inner.data = alloy::primitives::LogData::new_unchecked(
        vec![Transfer::SIGNATURE_HASH],
        alloy::primitives::Bytes::from_static(&[0x01]),
    );
    log
}

fn tx_hash(block_number: u64, log_index: u64) -> B256 {
    let mut preimage = [0u8; 16];
    preimage[..8].copy_from_slice(&block_number.to_be_bytes());
    preimage[8..].copy_from_slice(&log_index.to_be_bytes());
    keccak256(preimage)
}

/// A decoded `Transfer` event of `TOKEN` on chain 1.
#[must_use]
pub fn sample_event(block_number: u64, log_index: u64) -> Event {
    Event {
        chain_id: 1,
        contract_address: TOKEN,
        event_type: "Transfer".into(),
        block_number,
        block_hash: keccak256(block_number.to_be_bytes()),
        tx_hash: tx_hash(block_number, log_index),
        tx_index: 0,
        log_index,
        args: EventArgs::new(vec![
            EventArg { name: "from".into(), value: ArgValue::Address(ALICE.to_checksum(None)) },
            EventArg { name: "to".into(), value: ArgValue::Address(BOB.to_checksum(None)) },
            EventArg { name: "value".into(), value: ArgValue::Number("42".into()) },
        ]),
        observed_at: Utc::now(),
        display: DisplayMetadata::named("Token"),
    }
}

#[derive(Debug, Default)]
struct MockState {
    heads: BTreeMap<ChainId, u64>,
    logs: BTreeMap<SourceId, Vec<Log>>,
    failing_heads: BTreeSet<ChainId>,
    failing_ranges: BTreeSet<(SourceId, u64, u64)>,
    fetches: Vec<(SourceId, u64, u64)>,
    gate: Option<Arc<Semaphore>>,
}

/// In-memory [`SourceClient`] with scriptable heads, logs and failures.
///
/// Logs are returned in insertion order, filtered to the requested range.
#[derive(Debug, Default)]
pub struct MockSourceClient {
    state: Mutex<MockState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockSourceClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_head(&self, chain_id: ChainId, height: u64) {
        self.state().heads.insert(chain_id, height);
    }

    pub fn push_log(&self, source: &SourceId, log: Log) {
        self.state().logs.entry(source.clone()).or_default().push(log);
    }

    /// The next `head_height` call for `chain_id` fails.
    pub fn fail_next_head(&self, chain_id: ChainId) {
        self.state().failing_heads.insert(chain_id);
    }

    /// The next fetch of exactly `[from, to]` for `source` fails.
    pub fn fail_range_once(&self, source: &SourceId, from: u64, to: u64) {
        self.state().failing_ranges.insert((source.clone(), from, to));
    }

    /// Every `get_logs` call so far, in call order.
    #[must_use]
    pub fn fetches(&self) -> Vec<(SourceId, u64, u64)> {
        self.state().fetches.clone()
    }

    /// Ranges fetched for `source`, in call order.
    #[must_use]
    pub fn ranges(&self, source: &SourceId) -> Vec<(u64, u64)> {
        self.state()
            .fetches
            .iter()
            .filter(|(id, _, _)| id == source)
            .map(|(_, from, to)| (*from, *to))
            .collect()
    }

    /// Highest number of `get_logs` calls that were in flight at the same time.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Makes every subsequent fetch wait for a permit from the returned gate.
    #[must_use]
    pub fn gate_fetches(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.state().gate = Some(Arc::clone(&gate));
        gate
    }
}

impl SourceClient for MockSourceClient {
    async fn head_height(&self, chain_id: ChainId) -> Result<u64, Error> {
        let mut state = self.state();
        if state.failing_heads.remove(&chain_id) {
            return Err(TransportErrorKind::custom_str("head unavailable").into());
        }
        state.heads.get(&chain_id).copied().ok_or(Error::UnknownChain(chain_id))
    }

    async fn get_logs(
        &self,
        source: &TrackedSource,
        from: u64,
        to: u64,
    ) -> Result<Vec<Log>, Error> {
        let id = source.identity().clone();
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let gate = {
            let mut state = self.state();
            state.fetches.push((id.clone(), from, to));
            state.gate.clone()
        };
        if let Some(gate) = gate
            && let Ok(permit) = gate.acquire().await
        {
            permit.forget();
        }

        let result = {
            let mut state = self.state();
            if state.failing_ranges.remove(&(id.clone(), from, to)) {
                Err(TransportErrorKind::custom_str("getLogs failed").into())
            } else {
                let logs = state.logs.get(&id).map(Vec::as_slice).unwrap_or_default();
                Ok(logs
                    .iter()
                    .filter(|log| {
                        log.block_number.is_some_and(|block| (from..=to).contains(&block))
                    })
                    .cloned()
                    .collect())
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Sink that keeps every event it was notified of.
#[derive(Debug)]
pub struct RecordingSink {
    name: String,
    kind: SinkKind,
    accept: bool,
    events: Mutex<Vec<Event>>,
    count: watch::Sender<usize>,
}

impl RecordingSink {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SinkKind::Channel,
            accept: true,
            events: Mutex::new(vec![]),
            count: watch::Sender::new(0),
        }
    }

    /// Declines every event through [`Sink::accepts`].
    #[must_use]
    pub fn rejecting_all(mut self) -> Self {
        self.accept = false;
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: SinkKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Waits until at least `count` events were recorded.
    pub async fn wait_for(&self, count: usize) {
        let mut receiver = self.count.subscribe();
        let _ = receiver.wait_for(|recorded| *recorded >= count).await;
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SinkKind {
        self.kind
    }

    fn accepts(&self, _event: &Event) -> bool {
        self.accept
    }

    async fn notify(&self, event: &Event) -> Result<(), SinkError> {
        let recorded = {
            let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
            events.push(event.clone());
            events.len()
        };
        self.count.send_replace(recorded);
        Ok(())
    }
}

/// Sink whose every delivery fails.
#[derive(Debug)]
pub struct FailingSink {
    name: String,
    attempts: AtomicUsize,
}

impl FailingSink {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), attempts: AtomicUsize::new(0) }
    }

    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for FailingSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SinkKind {
        SinkKind::Webhook
    }

    async fn notify(&self, _event: &Event) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::Rejected(format!("{} is down", self.name)))
    }
}

/// Sink that panics on every delivery.
#[derive(Debug)]
pub struct PanickingSink {
    name: String,
}

impl PanickingSink {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Sink for PanickingSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SinkKind {
        SinkKind::Channel
    }

    async fn notify(&self, _event: &Event) -> Result<(), SinkError> {
        panic!("{} exploded", self.name);
    }
}
