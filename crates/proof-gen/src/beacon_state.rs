//! Beacon State SSZ Types
//!
//! Electra and Fulu `BeaconState` containers, generic over the preset's list
//! limits so the same definitions serve mainnet decoding and the small-limit
//! test states used for in-memory proof cross-checks.
//!
//! Both forks have a state tree of depth 6 (37 and 38 fields respectively) and
//! keep `validators`, `balances` and `pending_deposits` at the same positions.

use crate::types::{preset, ForkName, Hash256, TreeDepths};
use ssz_rs::prelude::*;

/// Checkpoint for fork choice
#[derive(Debug, Clone, Default, PartialEq, Eq, SimpleSerialize)]
pub struct Checkpoint {
    pub epoch: u64,
    pub root: [u8; 32],
}

/// Eth1 deposit data
#[derive(Debug, Clone, Default, PartialEq, Eq, SimpleSerialize)]
pub struct Eth1Data {
    pub deposit_root: [u8; 32],
    pub deposit_count: u64,
    pub block_hash: [u8; 32],
}

/// Fork data
#[derive(Debug, Clone, Default, PartialEq, Eq, SimpleSerialize)]
pub struct Fork {
    pub previous_version: [u8; 4],
    pub current_version: [u8; 4],
    pub epoch: u64,
}

/// Beacon block header.
///
/// Shares field layout and hash tree root with `BeaconBlock` (the body is
/// replaced by its root), so it stands in for the block as the proof root.
#[derive(Debug, Clone, Default, PartialEq, Eq, SimpleSerialize)]
pub struct BeaconBlockHeader {
    pub slot: u64,
    pub proposer_index: u64,
    pub parent_root: [u8; 32],
    pub state_root: [u8; 32],
    pub body_root: [u8; 32],
}

/// Validator record
#[derive(Debug, Clone, Default, PartialEq, Eq, SimpleSerialize)]
pub struct Validator {
    pub pubkey: Vector<u8, 48>,
    pub withdrawal_credentials: [u8; 32],
    pub effective_balance: u64,
    pub slashed: bool,
    pub activation_eligibility_epoch: u64,
    pub activation_epoch: u64,
    pub exit_epoch: u64,
    pub withdrawable_epoch: u64,
}

/// Pending deposit entry (Electra)
#[derive(Debug, Clone, Default, PartialEq, Eq, SimpleSerialize)]
pub struct PendingDeposit {
    pub pubkey: Vector<u8, 48>,
    pub withdrawal_credentials: [u8; 32],
    pub amount: u64,
    pub signature: Vector<u8, 96>,
    pub slot: u64,
}

/// Pending partial withdrawal (Electra)
#[derive(Debug, Clone, Default, PartialEq, Eq, SimpleSerialize)]
pub struct PendingPartialWithdrawal {
    pub validator_index: u64,
    pub amount: u64,
    pub withdrawable_epoch: u64,
}

/// Pending consolidation entry (Electra)
#[derive(Debug, Clone, Default, PartialEq, Eq, SimpleSerialize)]
pub struct PendingConsolidation {
    pub source_index: u64,
    pub target_index: u64,
}

/// Historical summary
#[derive(Debug, Clone, Default, PartialEq, Eq, SimpleSerialize)]
pub struct HistoricalSummary {
    pub block_summary_root: [u8; 32],
    pub state_summary_root: [u8; 32],
}

/// Sync committee (Altair+)
#[derive(Debug, Clone, Default, PartialEq, Eq, SimpleSerialize)]
pub struct SyncCommittee<const SYNC_COMMITTEE_SIZE: usize> {
    pub pubkeys: Vector<Vector<u8, 48>, SYNC_COMMITTEE_SIZE>,
    pub aggregate_pubkey: Vector<u8, 48>,
}

/// Execution payload header (Deneb layout, unchanged through Fulu)
#[derive(Debug, Clone, Default, PartialEq, Eq, SimpleSerialize)]
pub struct ExecutionPayloadHeader {
    pub parent_hash: [u8; 32],
    pub fee_recipient: [u8; 20],
    pub state_root: [u8; 32],
    pub receipts_root: [u8; 32],
    pub logs_bloom: Vector<u8, 256>,
    pub prev_randao: [u8; 32],
    pub block_number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra_data: List<u8, 32>,
    pub base_fee_per_gas: U256,
    pub block_hash: [u8; 32],
    pub transactions_root: [u8; 32],
    pub withdrawals_root: [u8; 32],
    pub blob_gas_used: u64,
    pub excess_blob_gas: u64,
}

/// Electra `BeaconState` (37 fields)
#[derive(Debug, Clone, Default, PartialEq, Eq, SimpleSerialize)]
pub struct ElectraBeaconState<
    const SLOTS_PER_HISTORICAL_ROOT: usize,
    const HISTORICAL_ROOTS_LIMIT: usize,
    const ETH1_DATA_VOTES_BOUND: usize,
    const VALIDATOR_REGISTRY_LIMIT: usize,
    const EPOCHS_PER_HISTORICAL_VECTOR: usize,
    const EPOCHS_PER_SLASHINGS_VECTOR: usize,
    const SYNC_COMMITTEE_SIZE: usize,
    const PENDING_DEPOSITS_LIMIT: usize,
    const PENDING_PARTIAL_WITHDRAWALS_LIMIT: usize,
    const PENDING_CONSOLIDATIONS_LIMIT: usize,
> {
    pub genesis_time: u64,
    pub genesis_validators_root: [u8; 32],
    pub slot: u64,
    pub fork: Fork,
    pub latest_block_header: BeaconBlockHeader,
    pub block_roots: Vector<[u8; 32], SLOTS_PER_HISTORICAL_ROOT>,
    pub state_roots: Vector<[u8; 32], SLOTS_PER_HISTORICAL_ROOT>,
    pub historical_roots: List<[u8; 32], HISTORICAL_ROOTS_LIMIT>,
    pub eth1_data: Eth1Data,
    pub eth1_data_votes: List<Eth1Data, ETH1_DATA_VOTES_BOUND>,
    pub eth1_deposit_index: u64,
    // Field 11
    pub validators: List<Validator, VALIDATOR_REGISTRY_LIMIT>,
    // Field 12
    pub balances: List<u64, VALIDATOR_REGISTRY_LIMIT>,
    pub randao_mixes: Vector<[u8; 32], EPOCHS_PER_HISTORICAL_VECTOR>,
    pub slashings: Vector<u64, EPOCHS_PER_SLASHINGS_VECTOR>,
    pub previous_epoch_participation: List<u8, VALIDATOR_REGISTRY_LIMIT>,
    pub current_epoch_participation: List<u8, VALIDATOR_REGISTRY_LIMIT>,
    pub justification_bits: Bitvector<4>,
    pub previous_justified_checkpoint: Checkpoint,
    pub current_justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
    pub inactivity_scores: List<u64, VALIDATOR_REGISTRY_LIMIT>,
    pub current_sync_committee: SyncCommittee<SYNC_COMMITTEE_SIZE>,
    pub next_sync_committee: SyncCommittee<SYNC_COMMITTEE_SIZE>,
    pub latest_execution_payload_header: ExecutionPayloadHeader,
    pub next_withdrawal_index: u64,
    pub next_withdrawal_validator_index: u64,
    pub historical_summaries: List<HistoricalSummary, HISTORICAL_ROOTS_LIMIT>,
    pub deposit_requests_start_index: u64,
    pub deposit_balance_to_consume: u64,
    pub exit_balance_to_consume: u64,
    pub earliest_exit_epoch: u64,
    pub consolidation_balance_to_consume: u64,
    pub earliest_consolidation_epoch: u64,
    // Field 34
    pub pending_deposits: List<PendingDeposit, PENDING_DEPOSITS_LIMIT>,
    pub pending_partial_withdrawals:
        List<PendingPartialWithdrawal, PENDING_PARTIAL_WITHDRAWALS_LIMIT>,
    pub pending_consolidations: List<PendingConsolidation, PENDING_CONSOLIDATIONS_LIMIT>,
}

/// Fulu `BeaconState` (Electra plus `proposer_lookahead`, 38 fields)
#[derive(Debug, Clone, Default, PartialEq, Eq, SimpleSerialize)]
pub struct FuluBeaconState<
    const SLOTS_PER_HISTORICAL_ROOT: usize,
    const HISTORICAL_ROOTS_LIMIT: usize,
    const ETH1_DATA_VOTES_BOUND: usize,
    const VALIDATOR_REGISTRY_LIMIT: usize,
    const EPOCHS_PER_HISTORICAL_VECTOR: usize,
    const EPOCHS_PER_SLASHINGS_VECTOR: usize,
    const SYNC_COMMITTEE_SIZE: usize,
    const PENDING_DEPOSITS_LIMIT: usize,
    const PENDING_PARTIAL_WITHDRAWALS_LIMIT: usize,
    const PENDING_CONSOLIDATIONS_LIMIT: usize,
    const PROPOSER_LOOKAHEAD_LENGTH: usize,
> {
    pub genesis_time: u64,
    pub genesis_validators_root: [u8; 32],
    pub slot: u64,
    pub fork: Fork,
    pub latest_block_header: BeaconBlockHeader,
    pub block_roots: Vector<[u8; 32], SLOTS_PER_HISTORICAL_ROOT>,
    pub state_roots: Vector<[u8; 32], SLOTS_PER_HISTORICAL_ROOT>,
    pub historical_roots: List<[u8; 32], HISTORICAL_ROOTS_LIMIT>,
    pub eth1_data: Eth1Data,
    pub eth1_data_votes: List<Eth1Data, ETH1_DATA_VOTES_BOUND>,
    pub eth1_deposit_index: u64,
    pub validators: List<Validator, VALIDATOR_REGISTRY_LIMIT>,
    pub balances: List<u64, VALIDATOR_REGISTRY_LIMIT>,
    pub randao_mixes: Vector<[u8; 32], EPOCHS_PER_HISTORICAL_VECTOR>,
    pub slashings: Vector<u64, EPOCHS_PER_SLASHINGS_VECTOR>,
    pub previous_epoch_participation: List<u8, VALIDATOR_REGISTRY_LIMIT>,
    pub current_epoch_participation: List<u8, VALIDATOR_REGISTRY_LIMIT>,
    pub justification_bits: Bitvector<4>,
    pub previous_justified_checkpoint: Checkpoint,
    pub current_justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
    pub inactivity_scores: List<u64, VALIDATOR_REGISTRY_LIMIT>,
    pub current_sync_committee: SyncCommittee<SYNC_COMMITTEE_SIZE>,
    pub next_sync_committee: SyncCommittee<SYNC_COMMITTEE_SIZE>,
    pub latest_execution_payload_header: ExecutionPayloadHeader,
    pub next_withdrawal_index: u64,
    pub next_withdrawal_validator_index: u64,
    pub historical_summaries: List<HistoricalSummary, HISTORICAL_ROOTS_LIMIT>,
    pub deposit_requests_start_index: u64,
    pub deposit_balance_to_consume: u64,
    pub exit_balance_to_consume: u64,
    pub earliest_exit_epoch: u64,
    pub consolidation_balance_to_consume: u64,
    pub earliest_consolidation_epoch: u64,
    pub pending_deposits: List<PendingDeposit, PENDING_DEPOSITS_LIMIT>,
    pub pending_partial_withdrawals:
        List<PendingPartialWithdrawal, PENDING_PARTIAL_WITHDRAWALS_LIMIT>,
    pub pending_consolidations: List<PendingConsolidation, PENDING_CONSOLIDATIONS_LIMIT>,
    // Field 37
    pub proposer_lookahead: Vector<u64, PROPOSER_LOOKAHEAD_LENGTH>,
}

/// Mainnet-limit state types, as served by `/eth/v2/debug/beacon/states`
pub mod mainnet {
    use super::preset::{
        EPOCHS_PER_HISTORICAL_VECTOR, EPOCHS_PER_SLASHINGS_VECTOR, ETH1_DATA_VOTES_BOUND,
        HISTORICAL_ROOTS_LIMIT, PENDING_CONSOLIDATIONS_LIMIT, PENDING_DEPOSITS_LIMIT,
        PENDING_PARTIAL_WITHDRAWALS_LIMIT, PROPOSER_LOOKAHEAD_LENGTH,
        SLOTS_PER_HISTORICAL_ROOT, SYNC_COMMITTEE_SIZE, VALIDATOR_REGISTRY_LIMIT,
    };

    pub type ElectraBeaconState = super::ElectraBeaconState<
        SLOTS_PER_HISTORICAL_ROOT,
        HISTORICAL_ROOTS_LIMIT,
        ETH1_DATA_VOTES_BOUND,
        VALIDATOR_REGISTRY_LIMIT,
        EPOCHS_PER_HISTORICAL_VECTOR,
        EPOCHS_PER_SLASHINGS_VECTOR,
        SYNC_COMMITTEE_SIZE,
        PENDING_DEPOSITS_LIMIT,
        PENDING_PARTIAL_WITHDRAWALS_LIMIT,
        PENDING_CONSOLIDATIONS_LIMIT,
    >;

    pub type FuluBeaconState = super::FuluBeaconState<
        SLOTS_PER_HISTORICAL_ROOT,
        HISTORICAL_ROOTS_LIMIT,
        ETH1_DATA_VOTES_BOUND,
        VALIDATOR_REGISTRY_LIMIT,
        EPOCHS_PER_HISTORICAL_VECTOR,
        EPOCHS_PER_SLASHINGS_VECTOR,
        SYNC_COMMITTEE_SIZE,
        PENDING_DEPOSITS_LIMIT,
        PENDING_PARTIAL_WITHDRAWALS_LIMIT,
        PENDING_CONSOLIDATIONS_LIMIT,
        PROPOSER_LOOKAHEAD_LENGTH,
    >;
}

// ============================================================================
// Test Constants - Small limits for in-memory proof generation
// ============================================================================

/// Validator limit for test state: 2^10 = 1024 (balances data tree depth 8)
pub const TEST_VALIDATOR_LIMIT: usize = 1024;

/// Pending deposits limit for test state: 2^6 = 64
pub const TEST_PENDING_DEPOSITS_LIMIT: usize = 64;

/// Electra state with small limits.
///
/// The top-level layout matches mainnet (37 fields, depth 6) so gindices from
/// the block root keep their shape; only the list data trees are shallower:
/// validators depth 10 (vs 40), balances depth 8 (vs 38), pending deposits
/// depth 6 (vs 27).
pub type TestBeaconState =
    ElectraBeaconState<64, 1024, 32, TEST_VALIDATOR_LIMIT, 64, 64, 32, TEST_PENDING_DEPOSITS_LIMIT, 16, 8>;

/// Fulu state with the same small limits as [`TestBeaconState`]
pub type TestFuluBeaconState =
    FuluBeaconState<64, 1024, 32, TEST_VALIDATOR_LIMIT, 64, 64, 32, TEST_PENDING_DEPOSITS_LIMIT, 16, 8, 16>;

/// Uniform access to the parts of a beacon state the proof tree needs.
pub trait BeaconStateFields {
    /// Fork the container layout belongs to
    const FORK: ForkName;
    /// List data-tree depths implied by the type's limits
    const DEPTHS: TreeDepths;

    fn slot(&self) -> u64;
    fn validators(&self) -> &[Validator];
    fn balances(&self) -> &[u64];
    fn pending_deposits(&self) -> &[PendingDeposit];

    /// Hash tree roots of every top-level field in declaration order.
    ///
    /// `validators`, `balances` and `pending_deposits` are `None`: the state
    /// view builds navigable subtrees for them instead of opaque roots.
    fn opaque_field_roots(&self) -> Result<Vec<Option<Hash256>>, MerkleizationError>;
}

fn field_root<T: HashTreeRoot>(value: &T) -> Result<Option<Hash256>, MerkleizationError> {
    Ok(Some(value.hash_tree_root()?.into()))
}

impl<
        const SLOTS_PER_HISTORICAL_ROOT: usize,
        const HISTORICAL_ROOTS_LIMIT: usize,
        const ETH1_DATA_VOTES_BOUND: usize,
        const VALIDATOR_REGISTRY_LIMIT: usize,
        const EPOCHS_PER_HISTORICAL_VECTOR: usize,
        const EPOCHS_PER_SLASHINGS_VECTOR: usize,
        const SYNC_COMMITTEE_SIZE: usize,
        const PENDING_DEPOSITS_LIMIT: usize,
        const PENDING_PARTIAL_WITHDRAWALS_LIMIT: usize,
        const PENDING_CONSOLIDATIONS_LIMIT: usize,
    > BeaconStateFields
    for ElectraBeaconState<
        SLOTS_PER_HISTORICAL_ROOT,
        HISTORICAL_ROOTS_LIMIT,
        ETH1_DATA_VOTES_BOUND,
        VALIDATOR_REGISTRY_LIMIT,
        EPOCHS_PER_HISTORICAL_VECTOR,
        EPOCHS_PER_SLASHINGS_VECTOR,
        SYNC_COMMITTEE_SIZE,
        PENDING_DEPOSITS_LIMIT,
        PENDING_PARTIAL_WITHDRAWALS_LIMIT,
        PENDING_CONSOLIDATIONS_LIMIT,
    >
{
    const FORK: ForkName = ForkName::Electra;
    const DEPTHS: TreeDepths =
        TreeDepths::from_limits(VALIDATOR_REGISTRY_LIMIT, PENDING_DEPOSITS_LIMIT);

    fn slot(&self) -> u64 {
        self.slot
    }

    fn validators(&self) -> &[Validator] {
        &self.validators
    }

    fn balances(&self) -> &[u64] {
        &self.balances
    }

    fn pending_deposits(&self) -> &[PendingDeposit] {
        &self.pending_deposits
    }

    fn opaque_field_roots(&self) -> Result<Vec<Option<Hash256>>, MerkleizationError> {
        Ok(vec![
            field_root(&self.genesis_time)?,
            field_root(&self.genesis_validators_root)?,
            field_root(&self.slot)?,
            field_root(&self.fork)?,
            field_root(&self.latest_block_header)?,
            field_root(&self.block_roots)?,
            field_root(&self.state_roots)?,
            field_root(&self.historical_roots)?,
            field_root(&self.eth1_data)?,
            field_root(&self.eth1_data_votes)?,
            field_root(&self.eth1_deposit_index)?,
            None,
            None,
            field_root(&self.randao_mixes)?,
            field_root(&self.slashings)?,
            field_root(&self.previous_epoch_participation)?,
            field_root(&self.current_epoch_participation)?,
            field_root(&self.justification_bits)?,
            field_root(&self.previous_justified_checkpoint)?,
            field_root(&self.current_justified_checkpoint)?,
            field_root(&self.finalized_checkpoint)?,
            field_root(&self.inactivity_scores)?,
            field_root(&self.current_sync_committee)?,
            field_root(&self.next_sync_committee)?,
            field_root(&self.latest_execution_payload_header)?,
            field_root(&self.next_withdrawal_index)?,
            field_root(&self.next_withdrawal_validator_index)?,
            field_root(&self.historical_summaries)?,
            field_root(&self.deposit_requests_start_index)?,
            field_root(&self.deposit_balance_to_consume)?,
            field_root(&self.exit_balance_to_consume)?,
            field_root(&self.earliest_exit_epoch)?,
            field_root(&self.consolidation_balance_to_consume)?,
            field_root(&self.earliest_consolidation_epoch)?,
            None,
            field_root(&self.pending_partial_withdrawals)?,
            field_root(&self.pending_consolidations)?,
        ])
    }
}

impl<
        const SLOTS_PER_HISTORICAL_ROOT: usize,
        const HISTORICAL_ROOTS_LIMIT: usize,
        const ETH1_DATA_VOTES_BOUND: usize,
        const VALIDATOR_REGISTRY_LIMIT: usize,
        const EPOCHS_PER_HISTORICAL_VECTOR: usize,
        const EPOCHS_PER_SLASHINGS_VECTOR: usize,
        const SYNC_COMMITTEE_SIZE: usize,
        const PENDING_DEPOSITS_LIMIT: usize,
        const PENDING_PARTIAL_WITHDRAWALS_LIMIT: usize,
        const PENDING_CONSOLIDATIONS_LIMIT: usize,
        const PROPOSER_LOOKAHEAD_LENGTH: usize,
    > BeaconStateFields
    for FuluBeaconState<
        SLOTS_PER_HISTORICAL_ROOT,
        HISTORICAL_ROOTS_LIMIT,
        ETH1_DATA_VOTES_BOUND,
        VALIDATOR_REGISTRY_LIMIT,
        EPOCHS_PER_HISTORICAL_VECTOR,
        EPOCHS_PER_SLASHINGS_VECTOR,
        SYNC_COMMITTEE_SIZE,
        PENDING_DEPOSITS_LIMIT,
        PENDING_PARTIAL_WITHDRAWALS_LIMIT,
        PENDING_CONSOLIDATIONS_LIMIT,
        PROPOSER_LOOKAHEAD_LENGTH,
    >
{
    const FORK: ForkName = ForkName::Fulu;
    const DEPTHS: TreeDepths =
        TreeDepths::from_limits(VALIDATOR_REGISTRY_LIMIT, PENDING_DEPOSITS_LIMIT);

    fn slot(&self) -> u64 {
        self.slot
    }

    fn validators(&self) -> &[Validator] {
        &self.validators
    }

    fn balances(&self) -> &[u64] {
        &self.balances
    }

    fn pending_deposits(&self) -> &[PendingDeposit] {
        &self.pending_deposits
    }

    fn opaque_field_roots(&self) -> Result<Vec<Option<Hash256>>, MerkleizationError> {
        Ok(vec![
            field_root(&self.genesis_time)?,
            field_root(&self.genesis_validators_root)?,
            field_root(&self.slot)?,
            field_root(&self.fork)?,
            field_root(&self.latest_block_header)?,
            field_root(&self.block_roots)?,
            field_root(&self.state_roots)?,
            field_root(&self.historical_roots)?,
            field_root(&self.eth1_data)?,
            field_root(&self.eth1_data_votes)?,
            field_root(&self.eth1_deposit_index)?,
            None,
            None,
            field_root(&self.randao_mixes)?,
            field_root(&self.slashings)?,
            field_root(&self.previous_epoch_participation)?,
            field_root(&self.current_epoch_participation)?,
            field_root(&self.justification_bits)?,
            field_root(&self.previous_justified_checkpoint)?,
            field_root(&self.current_justified_checkpoint)?,
            field_root(&self.finalized_checkpoint)?,
            field_root(&self.inactivity_scores)?,
            field_root(&self.current_sync_committee)?,
            field_root(&self.next_sync_committee)?,
            field_root(&self.latest_execution_payload_header)?,
            field_root(&self.next_withdrawal_index)?,
            field_root(&self.next_withdrawal_validator_index)?,
            field_root(&self.historical_summaries)?,
            field_root(&self.deposit_requests_start_index)?,
            field_root(&self.deposit_balance_to_consume)?,
            field_root(&self.exit_balance_to_consume)?,
            field_root(&self.earliest_exit_epoch)?,
            field_root(&self.consolidation_balance_to_consume)?,
            field_root(&self.earliest_consolidation_epoch)?,
            None,
            field_root(&self.pending_partial_withdrawals)?,
            field_root(&self.pending_consolidations)?,
            field_root(&self.proposer_lookahead)?,
        ])
    }
}
