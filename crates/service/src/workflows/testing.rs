//! In-memory collaborators for workflow tests

use super::{RunnerSettings, TaskRunner};
use crate::config::Network;
use crate::contract::{
    ContractCall, ContractError, DepositData, SnappedBalance, StrategyReader, StrategyValidator,
    ValidatorData,
};
use crate::executor::{
    BackendError, FeeEstimate, GasParams, TransactionExecutor, TxBackend, TxReceipt,
};
use alloy::primitives::{Address, Log, LogData, B256};
use proof_gen::{
    BeaconBlockView, BeaconClientError, BeaconSource, BlockId, Hash256, PendingDepositRecord,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

pub const SNAP_DELAY: u64 = 430;

const GWEI: u128 = 1_000_000_000;

pub fn runner(
    reader: FakeReader,
    beacon: FakeBeacon,
    backend: FakeBackend,
) -> TaskRunner<FakeReader, FakeBeacon, FakeBackend> {
    TaskRunner::new(
        RunnerSettings {
            strategy: Address::with_last_byte(0x51),
            snap_delay_secs: SNAP_DELAY,
        },
        reader,
        beacon,
        TransactionExecutor::new(backend, Network::Hoodi, Some(100)),
    )
}

/// Strategy deposit record with the given root
pub fn record(deposit_root: Hash256) -> PendingDepositRecord {
    PendingDepositRecord {
        deposit_root,
        pub_key_hash: [0x77; 32],
        amount_gwei: 1_000_000_000,
        slot: 100,
    }
}

#[derive(Debug, Default)]
pub struct FakeReader {
    pub snapped: SnappedBalance,
    pub verified: Vec<StrategyValidator>,
    pub pending: Vec<PendingDepositRecord>,
    pub deposits: HashMap<Hash256, DepositData>,
    pub validators: HashMap<Hash256, ValidatorData>,
}

impl StrategyReader for FakeReader {
    async fn snapped_balance(&self) -> Result<SnappedBalance, ContractError> {
        Ok(self.snapped)
    }

    async fn verified_validators(&self) -> Result<Vec<StrategyValidator>, ContractError> {
        Ok(self.verified.clone())
    }

    async fn pending_deposits(&self) -> Result<Vec<PendingDepositRecord>, ContractError> {
        Ok(self.pending.clone())
    }

    async fn deposit(&self, deposit_root: Hash256) -> Result<DepositData, ContractError> {
        self.deposits
            .get(&deposit_root)
            .copied()
            .ok_or_else(|| ContractError::new("deposits", "unknown deposit"))
    }

    async fn validator(&self, pub_key_hash: Hash256) -> Result<ValidatorData, ContractError> {
        self.validators
            .get(&pub_key_hash)
            .copied()
            .ok_or_else(|| ContractError::new("validator", "unknown validator"))
    }
}

/// Serves prebuilt blocks by root, with one of them as head
#[derive(Debug, Default)]
pub struct FakeBeacon {
    blocks: HashMap<Hash256, BeaconBlockView>,
    head: Option<BeaconBlockView>,
    fetches: AtomicUsize,
}

impl FakeBeacon {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(block: BeaconBlockView) -> Self {
        let mut beacon = Self::default();
        beacon.blocks.insert(block.root(), block.clone());
        beacon.head = Some(block);
        beacon
    }

    pub fn with_head(mut self, head: BeaconBlockView) -> Self {
        self.blocks.insert(head.root(), head.clone());
        self.head = Some(head);
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl BeaconSource for FakeBeacon {
    async fn fetch_block(&self, block_id: BlockId) -> Result<BeaconBlockView, BeaconClientError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let block = match block_id {
            BlockId::Head | BlockId::Finalized => self.head.clone(),
            BlockId::Root(root) => self.blocks.get(&root).cloned(),
            BlockId::Slot(slot) => self.blocks.values().find(|b| b.slot() == slot).cloned(),
        };
        block.ok_or_else(|| BeaconClientError::NotFound {
            resource: "block",
            id: block_id.to_string(),
        })
    }
}

/// Records submissions instead of sending them.
///
/// Estimates 100k gas (see [`FakeBackend::set_estimate`]) at 15 gwei; suggests 20 gwei max fee and 1 gwei
/// priority fee; receipts use 90k gas.
#[derive(Debug)]
pub struct FakeBackend {
    fees: FeeEstimate,
    estimate: AtomicU64,
    estimates: AtomicUsize,
    estimate_error: Mutex<Option<String>>,
    fail_receipts: AtomicBool,
    sent: Mutex<Vec<(ContractCall, GasParams)>>,
    events: Mutex<HashMap<&'static str, Vec<LogData>>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::with_fees(FeeEstimate {
            max_fee_per_gas: 20 * GWEI,
            max_priority_fee_per_gas: GWEI,
        })
    }
}

impl FakeBackend {
    pub fn with_fees(fees: FeeEstimate) -> Self {
        Self {
            fees,
            estimate: AtomicU64::new(100_000),
            estimates: AtomicUsize::new(0),
            estimate_error: Mutex::new(None),
            fail_receipts: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            events: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_estimate(&self, gas: u64) {
        self.estimate.store(gas, Ordering::SeqCst);
    }

    pub fn revert_estimates(&self, reason: &str) {
        *self.estimate_error.lock().unwrap() = Some(reason.to_string());
    }

    pub fn fail_receipts(&self) {
        self.fail_receipts.store(true, Ordering::SeqCst);
    }

    /// Add `event` to the receipt of every `method` call
    pub fn emit(&self, method: &'static str, event: LogData) {
        self.events
            .lock()
            .unwrap()
            .entry(method)
            .or_default()
            .push(event);
    }

    pub fn estimates(&self) -> usize {
        self.estimates.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(ContractCall, GasParams)> {
        self.sent.lock().unwrap().clone()
    }
}

fn tx_hash(nonce: usize) -> B256 {
    B256::left_padding_from(&(nonce as u64 + 1).to_be_bytes())
}

impl TxBackend for FakeBackend {
    async fn estimate_gas(&self, _call: &ContractCall) -> Result<u64, BackendError> {
        self.estimates.fetch_add(1, Ordering::SeqCst);
        match self.estimate_error.lock().unwrap().clone() {
            Some(reason) => Err(BackendError::Rpc(reason)),
            None => Ok(self.estimate.load(Ordering::SeqCst)),
        }
    }

    async fn gas_price(&self) -> Result<u128, BackendError> {
        Ok(15 * GWEI)
    }

    async fn fee_estimate(&self) -> Result<FeeEstimate, BackendError> {
        Ok(self.fees)
    }

    async fn send(&self, call: &ContractCall, gas: GasParams) -> Result<B256, BackendError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((call.clone(), gas));
        Ok(tx_hash(sent.len() - 1))
    }

    async fn wait_for_receipt(&self, hash: B256) -> Result<TxReceipt, BackendError> {
        let sent = self.sent.lock().unwrap();
        let (call, _) = sent
            .iter()
            .enumerate()
            .find(|(nonce, _)| tx_hash(*nonce) == hash)
            .map(|(_, entry)| entry)
            .ok_or_else(|| BackendError::Rpc(format!("unknown transaction {hash}")))?;

        let logs = self
            .events
            .lock()
            .unwrap()
            .get(call.method)
            .into_iter()
            .flatten()
            .map(|data| Log {
                address: call.to,
                data: data.clone(),
            })
            .collect();

        Ok(TxReceipt {
            tx_hash: hash,
            success: !self.fail_receipts.load(Ordering::SeqCst),
            block_number: Some(1),
            gas_used: 90_000,
            effective_gas_price: 15 * GWEI,
            logs,
        })
    }
}
