//! Synthetic beacon blocks over the small-limit [`TestBeaconState`], used for
//! JSON fixture generation and for exercising proof consumers without a
//! beacon node.

use crate::beacon_state::{BeaconBlockHeader, PendingDeposit, TestBeaconState, Validator};
use crate::proof::ProofError;
use crate::types::{preset, Hash256, FAR_FUTURE_EPOCH};
use crate::view::{pending_deposit_root, BeaconBlockView, BeaconStateView};
use ssz_rs::prelude::*;

/// Epochs between exit and withdrawability
const MIN_VALIDATOR_WITHDRAWABILITY_DELAY: u64 = 256;

/// Builder for a deterministic test state and the header committing to it
#[derive(Debug, Clone)]
pub struct SyntheticState {
    state: TestBeaconState,
    parent_root: Hash256,
    body_root: Hash256,
}

impl SyntheticState {
    #[must_use]
    pub fn new(slot: u64) -> Self {
        let mut state = TestBeaconState::default();
        state.slot = slot;
        state.genesis_time = 1_606_824_023;
        Self {
            state,
            parent_root: [0x11; 32],
            body_root: [0x22; 32],
        }
    }

    #[must_use]
    pub fn state(&self) -> &TestBeaconState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut TestBeaconState {
        &mut self.state
    }

    #[must_use]
    pub fn slot(&self) -> u64 {
        self.state.slot
    }

    /// Deterministic public key for validator `index`
    #[must_use]
    pub fn pubkey(index: u64) -> Vector<u8, 48> {
        let mut pubkey = Vector::<u8, 48>::default();
        pubkey[..8].copy_from_slice(&(index + 1).to_le_bytes());
        pubkey[8..].fill(0xab);
        pubkey
    }

    /// Append a validator with `balance`; `exiting` validators get a finite
    /// withdrawable epoch, all others `FAR_FUTURE_EPOCH`. Returns its index.
    pub fn add_validator(&mut self, balance: u64, exiting: bool) -> u64 {
        let index = self.state.validators.len() as u64;
        let epoch = self.state.slot / preset::SLOTS_PER_EPOCH;
        let mut withdrawal_credentials = [0u8; 32];
        withdrawal_credentials[0] = 0x02;
        withdrawal_credentials[12..].fill(0x5a);

        let (exit_epoch, withdrawable_epoch) = if exiting {
            (epoch, epoch + MIN_VALIDATOR_WITHDRAWABILITY_DELAY)
        } else {
            (FAR_FUTURE_EPOCH, FAR_FUTURE_EPOCH)
        };

        self.state.validators.push(Validator {
            pubkey: Self::pubkey(index),
            withdrawal_credentials,
            effective_balance: balance.min(2_048_000_000_000) / 1_000_000_000 * 1_000_000_000,
            slashed: false,
            activation_eligibility_epoch: 0,
            activation_epoch: 0,
            exit_epoch,
            withdrawable_epoch,
        });
        self.state.balances.push(balance);
        index
    }

    /// The beacon deposit a strategy deposit of `amount` to `validator_index`
    /// at `slot` would enqueue
    #[must_use]
    pub fn pending_deposit(validator_index: u64, amount: u64, slot: u64) -> PendingDeposit {
        let mut withdrawal_credentials = [0u8; 32];
        withdrawal_credentials[0] = 0x02;
        withdrawal_credentials[12..].fill(0x5a);

        let mut signature = Vector::<u8, 96>::default();
        signature[..8].copy_from_slice(&slot.to_le_bytes());
        signature[8..16].copy_from_slice(&amount.to_le_bytes());
        signature[16..].fill(0xcd);

        PendingDeposit {
            pubkey: Self::pubkey(validator_index),
            withdrawal_credentials,
            amount,
            signature,
            slot,
        }
    }

    /// Enqueue a pending deposit and return its content hash
    pub fn add_pending_deposit(
        &mut self,
        validator_index: u64,
        amount: u64,
        slot: u64,
    ) -> Hash256 {
        let deposit = Self::pending_deposit(validator_index, amount, slot);
        let root = pending_deposit_root(&deposit).unwrap_or_default();
        self.state.pending_deposits.push(deposit);
        root
    }

    /// Header committing to the current state
    pub fn header(&self) -> Result<BeaconBlockHeader, ProofError> {
        let state_root: Hash256 = self
            .state
            .hash_tree_root()
            .map_err(|e| ProofError::Merkleization(e.to_string()))?
            .into();
        let validators = self.state.validators.len().max(1) as u64;

        Ok(BeaconBlockHeader {
            slot: self.state.slot,
            proposer_index: self.state.slot % validators,
            parent_root: self.parent_root,
            state_root,
            body_root: self.body_root,
        })
    }

    /// Build the block view over the current state
    pub fn build(&self) -> Result<BeaconBlockView, ProofError> {
        let state = BeaconStateView::from_state(&self.state)?;
        BeaconBlockView::new(self.header()?, state)
    }
}
