//! Merkle proof generation for the staking strategy's balance and deposit
//! verification.
//!
//! Five proof shapes are produced against a beacon block tree:
//! 1. `pending_deposits[0].slot` (or the empty first node when the queue is empty)
//! 2. `pending_deposits[k]` relative to the pending deposits list root
//! 3. `validators[i].withdrawable_epoch`
//! 4. `validators[i].pubkey` (diagnostics)
//! 5. The balances list root, and a balance chunk relative to it

use crate::gindex::{GeneralizedIndex, GindexCalculator, GindexError};
use crate::tree::{hash_pair, MerkleTree, TreeError};
use crate::types::{hex_bytes, hex_bytes32, to_hex, Hash256};
use crate::view::BeaconBlockView;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during proof generation.
#[derive(Error, Debug)]
pub enum ProofError {
    #[error(transparent)]
    Gindex(#[from] GindexError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("Validator index {index} out of bounds ({len} validators)")]
    ValidatorNotFound { index: u64, len: usize },

    #[error("SSZ merkleization failed: {0}")]
    Merkleization(String),

    #[error("State root mismatch: header commits to {expected}, state hashes to {computed}")]
    StateRootMismatch { expected: String, computed: String },

    #[error("Proof has {actual} bytes, expected {expected} for generalized index {gindex}")]
    WitnessLength {
        gindex: GeneralizedIndex,
        expected: usize,
        actual: usize,
    },

    #[error("Proof recomputes root {computed}, expected {expected}")]
    RootMismatch { expected: String, computed: String },
}

/// Self-contained evidence that `leaf` sits at `generalized_index` under `root`.
///
/// `proof` is the concatenation of the sibling hashes, leaf-first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofBundle {
    #[serde(with = "hex_bytes")]
    pub proof: Vec<u8>,
    pub generalized_index: GeneralizedIndex,
    #[serde(with = "hex_bytes32")]
    pub root: Hash256,
    #[serde(with = "hex_bytes32")]
    pub leaf: Hash256,
}

impl ProofBundle {
    #[must_use]
    pub fn from_witnesses(
        witnesses: &[Hash256],
        generalized_index: GeneralizedIndex,
        root: Hash256,
        leaf: Hash256,
    ) -> Self {
        Self {
            proof: witnesses.concat(),
            generalized_index,
            root,
            leaf,
        }
    }

    /// Sibling hashes, leaf-first
    #[must_use]
    pub fn witnesses(&self) -> Vec<Hash256> {
        self.proof
            .chunks_exact(32)
            .filter_map(|chunk| chunk.try_into().ok())
            .collect()
    }

    /// Recompute the root from `leaf` and the witnesses along the index.
    pub fn verify(&self) -> Result<(), ProofError> {
        let depth = self.generalized_index.depth() as usize;
        if self.proof.len() != depth * 32 {
            return Err(ProofError::WitnessLength {
                gindex: self.generalized_index,
                expected: depth * 32,
                actual: self.proof.len(),
            });
        }

        let index = self.generalized_index.value();
        let computed = self
            .witnesses()
            .iter()
            .enumerate()
            .fold(self.leaf, |node, (level, sibling)| {
                if (index >> level) & 1 == 1 {
                    hash_pair(sibling, &node)
                } else {
                    hash_pair(&node, sibling)
                }
            });

        if computed != self.root {
            return Err(ProofError::RootMismatch {
                expected: to_hex(&self.root),
                computed: to_hex(&computed),
            });
        }
        Ok(())
    }
}

/// Slot of the first deposit in the beacon pending deposit queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirstPendingDepositProof {
    pub bundle: ProofBundle,
    /// `1` when the queue is empty
    pub slot: u64,
    pub is_empty: bool,
}

/// A pending deposit proved against the pending deposits list root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDepositProof {
    pub bundle: ProofBundle,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawableEpochProof {
    pub bundle: ProofBundle,
    pub validator_index: u64,
    pub withdrawable_epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubKeyProof {
    pub bundle: ProofBundle,
    pub validator_index: u64,
    #[serde(with = "hex_bytes")]
    pub pubkey: Vec<u8>,
}

/// A balance chunk proved against the balances list root.
///
/// The chunk packs four balances; `balance` is the one at `validator_index % 4`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceProof {
    pub bundle: ProofBundle,
    pub validator_index: u64,
    pub balance: u64,
}

/// Single-branch proof of whatever node `gindex` points at in `tree`
pub fn generate_proof(tree: &MerkleTree, gindex: GeneralizedIndex) -> Result<ProofBundle, ProofError> {
    Ok(tree.prove(gindex)?)
}

/// Proof generator over one fetched beacon block
#[derive(Debug, Clone, Copy)]
pub struct ProofGenerator<'a> {
    block: &'a BeaconBlockView,
    gindices: GindexCalculator,
}

impl<'a> ProofGenerator<'a> {
    #[must_use]
    pub fn new(block: &'a BeaconBlockView) -> Self {
        Self {
            block,
            gindices: block.calculator(),
        }
    }

    /// Proof of `pending_deposits[0].slot`, or of the (zero) first element
    /// node with slot `1` when the queue is empty.
    pub fn first_pending_deposit_slot(&self) -> Result<FirstPendingDepositProof, ProofError> {
        let deposits = self.block.state().pending_deposits();

        let (gindex, slot, is_empty) =
            match self.gindices.first_pending_deposit_slot(deposits.len() as u64) {
                Ok(gindex) => (gindex, deposits[0].slot, false),
                Err(GindexError::EmptyContainer { .. }) => {
                    (self.gindices.first_pending_deposit_node()?, 1, true)
                }
                Err(e) => return Err(e.into()),
            };

        let bundle = generate_proof(self.block.tree(), gindex)?;
        debug!(
            slot,
            is_empty,
            gindex = %gindex,
            "Generated first pending deposit proof"
        );

        Ok(FirstPendingDepositProof {
            bundle,
            slot,
            is_empty,
        })
    }

    /// Proof of the pending deposits list root against the block root
    pub fn pending_deposits_container(&self) -> Result<ProofBundle, ProofError> {
        generate_proof(self.block.tree(), self.gindices.pending_deposits_container()?)
    }

    /// Proof of `pending_deposits[index]` against the pending deposits list root
    pub fn pending_deposit(&self, index: u32) -> Result<PendingDepositProof, ProofError> {
        let container = self
            .block
            .tree()
            .subtree(self.gindices.pending_deposits_container()?)?;
        let len = self.block.state().pending_deposits().len() as u64;
        let gindex = self
            .gindices
            .pending_deposit_in_container(u64::from(index), len)?;

        Ok(PendingDepositProof {
            bundle: generate_proof(&container, gindex)?,
            index,
        })
    }

    /// Proof of `validators[index].withdrawable_epoch`
    pub fn validator_withdrawable_epoch(
        &self,
        index: u64,
    ) -> Result<WithdrawableEpochProof, ProofError> {
        let validators = self.block.state().validators();
        let validator = validator_at(validators, index)?;
        let gindex = self
            .gindices
            .validator_withdrawable_epoch(index, validators.len() as u64)?;

        Ok(WithdrawableEpochProof {
            bundle: generate_proof(self.block.tree(), gindex)?,
            validator_index: index,
            withdrawable_epoch: validator.withdrawable_epoch,
        })
    }

    /// Proof of `validators[index].pubkey`
    pub fn validator_pubkey(&self, index: u64) -> Result<PubKeyProof, ProofError> {
        let validators = self.block.state().validators();
        let validator = validator_at(validators, index)?;
        let gindex = self
            .gindices
            .validator_pubkey(index, validators.len() as u64)?;

        Ok(PubKeyProof {
            bundle: generate_proof(self.block.tree(), gindex)?,
            validator_index: index,
            pubkey: validator.pubkey.to_vec(),
        })
    }

    /// Proof of the balances list root against the block root
    pub fn balances_container(&self) -> Result<ProofBundle, ProofError> {
        generate_proof(self.block.tree(), self.gindices.balances_container()?)
    }

    /// Proof of the balance chunk holding `balances[index]` against the
    /// balances list root
    pub fn validator_balance(&self, index: u64) -> Result<BalanceProof, ProofError> {
        let balances = self.block.state().balances();
        let container = self
            .block
            .tree()
            .subtree(self.gindices.balances_container()?)?;
        let gindex = self
            .gindices
            .balance_in_container(index, balances.len() as u64)?;
        let balance = usize::try_from(index)
            .ok()
            .and_then(|i| balances.get(i))
            .copied()
            .unwrap_or_default();

        Ok(BalanceProof {
            bundle: generate_proof(&container, gindex)?,
            validator_index: index,
            balance,
        })
    }
}

fn validator_at(
    validators: &[crate::beacon_state::Validator],
    index: u64,
) -> Result<&crate::beacon_state::Validator, ProofError> {
    usize::try_from(index)
        .ok()
        .and_then(|i| validators.get(i))
        .ok_or(ProofError::ValidatorNotFound {
            index,
            len: validators.len(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon_state::PendingDeposit;
    use crate::synthetic::SyntheticState;
    use crate::types::FAR_FUTURE_EPOCH;
    use ssz_rs::prelude::*;

    fn populated() -> SyntheticState {
        let mut state = SyntheticState::new(7_000);
        for i in 0..10 {
            state.add_validator(32_000_000_000 + i, i == 3);
        }
        for i in 0..5 {
            state.add_pending_deposit(i % 10, 1_000_000_000 * (i + 1), 6_900 + i);
        }
        state
    }

    #[test]
    fn test_first_pending_deposit_slot() {
        let block = populated().build().unwrap();
        let proof = ProofGenerator::new(&block).first_pending_deposit_slot().unwrap();

        assert!(!proof.is_empty);
        assert_eq!(proof.slot, 6_900);
        assert_eq!(proof.bundle.root, block.root());
        assert_eq!(proof.bundle.leaf[..8], 6_900_u64.to_le_bytes());
        proof.bundle.verify().unwrap();
    }

    #[test]
    fn test_first_pending_deposit_slot_when_queue_empty() {
        let mut state = SyntheticState::new(7_000);
        state.add_validator(32_000_000_000, false);
        let block = state.build().unwrap();

        let proof = ProofGenerator::new(&block).first_pending_deposit_slot().unwrap();
        assert!(proof.is_empty);
        assert_eq!(proof.slot, 1);
        assert_eq!(proof.bundle.leaf, [0u8; 32]);
        assert_eq!(
            proof.bundle.generalized_index,
            block.calculator().first_pending_deposit_node().unwrap()
        );
        proof.bundle.verify().unwrap();
    }

    #[test]
    fn test_pending_deposit_relative_to_container() {
        let block = populated().build().unwrap();
        let generator = ProofGenerator::new(&block);
        let container = generator.pending_deposits_container().unwrap();
        container.verify().unwrap();

        let proof = generator.pending_deposit(2).unwrap();
        // Rooted at the container, not the block
        assert_eq!(proof.bundle.root, container.leaf);
        assert_eq!(proof.bundle.leaf, block.state().pending_deposit_roots()[2]);
        // 1 (data root) + 6 (test list depth)
        assert_eq!(proof.bundle.generalized_index.depth(), 7);
        proof.bundle.verify().unwrap();

        let reference: Hash256 = block.state().pending_deposits()[2]
            .hash_tree_root()
            .unwrap()
            .into();
        assert_eq!(proof.bundle.leaf, reference);
    }

    #[test]
    fn test_pending_deposit_out_of_bounds() {
        let block = populated().build().unwrap();
        let err = ProofGenerator::new(&block).pending_deposit(5).unwrap_err();
        assert!(matches!(
            err,
            ProofError::Gindex(GindexError::IndexOutOfBounds { index: 5, len: 5, .. })
        ));
    }

    #[test]
    fn test_withdrawable_epoch_far_future() {
        let block = populated().build().unwrap();
        let generator = ProofGenerator::new(&block);

        let exiting = generator.validator_withdrawable_epoch(3).unwrap();
        assert_ne!(exiting.withdrawable_epoch, FAR_FUTURE_EPOCH);

        let active = generator.validator_withdrawable_epoch(4).unwrap();
        assert_eq!(active.withdrawable_epoch, FAR_FUTURE_EPOCH);
        assert_eq!(active.bundle.leaf[..8], u64::MAX.to_le_bytes());
        active.bundle.verify().unwrap();
    }

    #[test]
    fn test_validator_not_found() {
        let block = populated().build().unwrap();
        let err = ProofGenerator::new(&block)
            .validator_withdrawable_epoch(10)
            .unwrap_err();
        assert!(matches!(err, ProofError::ValidatorNotFound { index: 10, len: 10 }));
    }

    #[test]
    fn test_pubkey_proof() {
        let block = populated().build().unwrap();
        let proof = ProofGenerator::new(&block).validator_pubkey(7).unwrap();
        let validator = &block.state().validators()[7];
        assert_eq!(proof.pubkey, validator.pubkey.to_vec());

        let expected_leaf: Hash256 = validator.pubkey.hash_tree_root().unwrap().into();
        assert_eq!(proof.bundle.leaf, expected_leaf);
        proof.bundle.verify().unwrap();
    }

    #[test]
    fn test_balance_proof_packing() {
        let block = populated().build().unwrap();
        let generator = ProofGenerator::new(&block);
        let container = generator.balances_container().unwrap();
        container.verify().unwrap();

        let proof = generator.validator_balance(6).unwrap();
        assert_eq!(proof.balance, 32_000_000_006);
        assert_eq!(proof.bundle.root, container.leaf);
        // balances[6] is the third value of chunk 1
        assert_eq!(proof.bundle.leaf[16..24], 32_000_000_006_u64.to_le_bytes());
        assert_eq!(proof.bundle.leaf[..8], 32_000_000_004_u64.to_le_bytes());
        proof.bundle.verify().unwrap();
    }

    #[test]
    fn test_proofs_are_idempotent() {
        let block = populated().build().unwrap();
        let generator = ProofGenerator::new(&block);
        assert_eq!(
            generator.validator_withdrawable_epoch(2).unwrap(),
            generator.validator_withdrawable_epoch(2).unwrap()
        );
        let rebuilt = populated().build().unwrap();
        assert_eq!(
            generator.first_pending_deposit_slot().unwrap(),
            ProofGenerator::new(&rebuilt).first_pending_deposit_slot().unwrap()
        );
    }

    #[test]
    fn test_block_rooted_proofs_match_ssz_rs() {
        let synthetic = populated();
        let block = synthetic.build().unwrap();
        let generator = ProofGenerator::new(&block);

        // Cross-check against ssz_rs below the state root; the last three
        // witnesses belong to the header level
        let block_proof = generator.validator_withdrawable_epoch(5).unwrap().bundle;
        let witnesses = block_proof.witnesses();
        let in_state = &witnesses[..witnesses.len() - 3];

        let path: &[PathElement] = &["validators".into(), 5.into(), "withdrawable_epoch".into()];
        let (reference, witness) = synthetic.state().prove(path).unwrap();
        reference.verify(witness).unwrap();

        let reference_branch: Vec<Hash256> =
            reference.branch.into_iter().map(Into::into).collect();
        assert_eq!(in_state, reference_branch.as_slice());
        let reference_leaf: Hash256 = reference.leaf.into();
        assert_eq!(block_proof.leaf, reference_leaf);
    }

    #[test]
    fn test_bundle_json_roundtrip() {
        let block = populated().build().unwrap();
        let bundle = ProofGenerator::new(&block).balances_container().unwrap();

        let json = serde_json::to_string(&bundle).unwrap();
        assert!(json.contains("generalizedIndex"));
        let decoded: ProofBundle = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, bundle);
    }

    #[test]
    fn test_tampered_proof_fails() {
        let block = populated().build().unwrap();
        let mut bundle = ProofGenerator::new(&block).balances_container().unwrap();
        bundle.proof[0] ^= 1;
        assert!(matches!(bundle.verify(), Err(ProofError::RootMismatch { .. })));

        bundle.proof.pop();
        assert!(matches!(bundle.verify(), Err(ProofError::WitnessLength { .. })));
    }

    #[test]
    fn test_pending_deposit_root_is_content_hash() {
        let deposit = PendingDeposit {
            amount: 5,
            slot: 10,
            ..PendingDeposit::default()
        };
        let expected: Hash256 = deposit.hash_tree_root().unwrap().into();
        assert_eq!(crate::view::pending_deposit_root(&deposit).unwrap(), expected);
    }
}
