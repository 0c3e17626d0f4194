//! Beacon Block and State Views
//!
//! Typed, immutable views over a fetched block header and its decoded state,
//! carrying the navigable Merkle tree that proofs are extracted from.
//!
//! Top-level state fields are folded into opaque roots through `ssz_rs`. The
//! `validators`, `balances` and `pending_deposits` lists are rebuilt as dense
//! subtrees so proofs can descend into individual elements without allocating
//! a tree sized to the list limit.

use crate::beacon_state::{BeaconBlockHeader, BeaconStateFields, PendingDeposit, Validator};
use crate::gindex::{Container, GeneralizedIndex, GindexCalculator, GindexError, PathStep};
use crate::proof::ProofError;
use crate::tree::{pack_u64s, ElementExpander, MerkleTree, Node, TreeError};
use crate::types::{to_hex, ForkName, Hash256, TreeDepths};
use ssz_rs::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

fn u64_chunk(value: u64) -> Node {
    let mut chunk = [0u8; 32];
    chunk[..8].copy_from_slice(&value.to_le_bytes());
    Node::Leaf(chunk)
}

// Fixed-length byte vector: 32-byte chunks, zero padded
fn bytes_node(bytes: &[u8]) -> Result<Node, TreeError> {
    let chunks: Vec<Node> = bytes
        .chunks(32)
        .map(|part| {
            let mut chunk = [0u8; 32];
            chunk[..part.len()].copy_from_slice(part);
            Node::Leaf(chunk)
        })
        .collect();
    Node::container(chunks)
}

/// Field subtree of a validator record
pub fn validator_node(validator: &Validator) -> Result<Node, TreeError> {
    Node::container(vec![
        bytes_node(&validator.pubkey)?,
        Node::Leaf(validator.withdrawal_credentials),
        u64_chunk(validator.effective_balance),
        u64_chunk(u64::from(validator.slashed)),
        u64_chunk(validator.activation_eligibility_epoch),
        u64_chunk(validator.activation_epoch),
        u64_chunk(validator.exit_epoch),
        u64_chunk(validator.withdrawable_epoch),
    ])
}

/// Field subtree of a beacon chain pending deposit
pub fn pending_deposit_node(deposit: &PendingDeposit) -> Result<Node, TreeError> {
    Node::container(vec![
        bytes_node(&deposit.pubkey)?,
        Node::Leaf(deposit.withdrawal_credentials),
        u64_chunk(deposit.amount),
        bytes_node(&deposit.signature)?,
        u64_chunk(deposit.slot),
    ])
}

/// Content hash of a pending deposit, as recorded by the strategy contract
pub fn pending_deposit_root(deposit: &PendingDeposit) -> Result<Hash256, TreeError> {
    Ok(pending_deposit_node(deposit)?.root())
}

fn merkleization(e: &MerkleizationError) -> ProofError {
    ProofError::Merkleization(e.to_string())
}

/// Typed view of a beacon state
#[derive(Debug, Clone)]
pub struct BeaconStateView {
    fork: ForkName,
    slot: u64,
    depths: TreeDepths,
    validators: Arc<[Validator]>,
    balances: Vec<u64>,
    pending_deposits: Arc<[PendingDeposit]>,
    pending_deposit_roots: Vec<Hash256>,
    node: Node,
}

impl BeaconStateView {
    /// Hash every field of `state` and build its navigable tree
    pub fn from_state<S: BeaconStateFields>(state: &S) -> Result<Self, ProofError> {
        let depths = S::DEPTHS;
        let validators: Arc<[Validator]> = state.validators().to_vec().into();
        let pending_deposits: Arc<[PendingDeposit]> = state.pending_deposits().to_vec().into();
        let balances = state.balances().to_vec();

        let validator_roots = validators
            .iter()
            .map(|v| Ok(v.hash_tree_root().map_err(|e| merkleization(&e))?.into()))
            .collect::<Result<Vec<Hash256>, ProofError>>()?;
        let pending_deposit_roots = pending_deposits
            .iter()
            .map(|d| Ok(d.hash_tree_root().map_err(|e| merkleization(&e))?.into()))
            .collect::<Result<Vec<Hash256>, ProofError>>()?;

        let expand_validator: ElementExpander = {
            let validators = Arc::clone(&validators);
            Arc::new(move |i| {
                let validator = validators.get(usize::try_from(i).ok()?)?;
                validator_node(validator).ok()
            })
        };
        let expand_deposit: ElementExpander = {
            let deposits = Arc::clone(&pending_deposits);
            Arc::new(move |i| {
                let deposit = deposits.get(usize::try_from(i).ok()?)?;
                pending_deposit_node(deposit).ok()
            })
        };

        let validators_node = Node::mix_in_length(
            Node::dense(validator_roots, depths.validators, Some(expand_validator))?,
            validators.len() as u64,
        );
        let balances_node = Node::mix_in_length(
            Node::dense(pack_u64s(&balances), depths.balances, None)?,
            balances.len() as u64,
        );
        let pending_deposits_node = Node::mix_in_length(
            Node::dense(
                pending_deposit_roots.clone(),
                depths.pending_deposits,
                Some(expand_deposit),
            )?,
            pending_deposits.len() as u64,
        );

        // Opaque roots leave gaps for the three lists, in field order
        let mut lists = [validators_node, balances_node, pending_deposits_node].into_iter();
        let fields = state
            .opaque_field_roots()
            .map_err(|e| merkleization(&e))?
            .into_iter()
            .map(|root| match root {
                Some(root) => Some(Node::Leaf(root)),
                None => lists.next(),
            })
            .collect::<Option<Vec<Node>>>()
            .ok_or_else(|| ProofError::Merkleization("state field layout mismatch".into()))?;

        if fields.len() != S::FORK.state_field_count() {
            return Err(ProofError::Merkleization(format!(
                "expected {} state fields, got {}",
                S::FORK.state_field_count(),
                fields.len()
            )));
        }

        let node = Node::container(fields)?;
        debug!(
            fork = %S::FORK,
            slot = state.slot(),
            validators = validators.len(),
            pending_deposits = pending_deposits.len(),
            state_root = %to_hex(&node.root()),
            "Built beacon state tree"
        );

        Ok(Self {
            fork: S::FORK,
            slot: state.slot(),
            depths,
            validators,
            balances,
            pending_deposits,
            pending_deposit_roots,
            node,
        })
    }

    #[must_use]
    pub fn fork(&self) -> ForkName {
        self.fork
    }

    #[must_use]
    pub fn slot(&self) -> u64 {
        self.slot
    }

    #[must_use]
    pub fn depths(&self) -> &TreeDepths {
        &self.depths
    }

    #[must_use]
    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    /// Balances, packed four per chunk in the tree
    #[must_use]
    pub fn balances(&self) -> &[u64] {
        &self.balances
    }

    #[must_use]
    pub fn pending_deposits(&self) -> &[PendingDeposit] {
        &self.pending_deposits
    }

    /// Content hashes of `pending_deposits`, index-aligned
    #[must_use]
    pub fn pending_deposit_roots(&self) -> &[Hash256] {
        &self.pending_deposit_roots
    }

    /// Content hash → queue position
    #[must_use]
    pub fn pending_deposit_index(&self) -> HashMap<Hash256, u32> {
        self.pending_deposit_roots
            .iter()
            .enumerate()
            .filter_map(|(i, root)| Some((*root, u32::try_from(i).ok()?)))
            .collect()
    }

    /// State root
    #[must_use]
    pub fn root(&self) -> Hash256 {
        self.node.root()
    }
}

/// Typed view of a beacon block, represented by its header.
///
/// The header and the block share a hash tree root, so the header serves as
/// the proof root for anything under `state_root`.
#[derive(Debug, Clone)]
pub struct BeaconBlockView {
    header: BeaconBlockHeader,
    state: BeaconStateView,
    tree: MerkleTree,
}

impl BeaconBlockView {
    /// Attach `state` to `header`, checking the state root the header commits to
    pub fn new(header: BeaconBlockHeader, state: BeaconStateView) -> Result<Self, ProofError> {
        let computed = state.root();
        if computed != header.state_root {
            return Err(ProofError::StateRootMismatch {
                expected: to_hex(&header.state_root),
                computed: to_hex(&computed),
            });
        }

        let root = Node::container(vec![
            u64_chunk(header.slot),
            u64_chunk(header.proposer_index),
            Node::Leaf(header.parent_root),
            state.node.clone(),
            Node::Leaf(header.body_root),
        ])?;

        Ok(Self {
            header,
            state,
            tree: MerkleTree::new(root),
        })
    }

    #[must_use]
    pub fn slot(&self) -> u64 {
        self.header.slot
    }

    #[must_use]
    pub fn header(&self) -> &BeaconBlockHeader {
        &self.header
    }

    #[must_use]
    pub fn state(&self) -> &BeaconStateView {
        &self.state
    }

    #[must_use]
    pub fn tree(&self) -> &MerkleTree {
        &self.tree
    }

    /// Block root
    #[must_use]
    pub fn root(&self) -> Hash256 {
        self.tree.root()
    }

    #[must_use]
    pub fn calculator(&self) -> GindexCalculator {
        GindexCalculator::new(self.state.fork, self.state.depths)
    }

    /// Resolve a field path from the block root, e.g.
    /// `[Field("state_root"), Field("balances")]`
    pub fn gindex(&self, path: &[PathStep]) -> Result<GeneralizedIndex, GindexError> {
        self.calculator()
            .index_for(Container::BeaconBlock(self.state.fork), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon_state::TestFuluBeaconState;
    use crate::synthetic::SyntheticState;

    fn sample_validator() -> Validator {
        Validator {
            pubkey: Vector::try_from((0..48).collect::<Vec<u8>>()).unwrap(),
            withdrawal_credentials: [1u8; 32],
            effective_balance: 32_000_000_000,
            slashed: true,
            activation_eligibility_epoch: 1,
            activation_epoch: 2,
            exit_epoch: 3,
            withdrawable_epoch: 4,
        }
    }

    #[test]
    fn test_validator_node_matches_ssz_rs() {
        let validator = sample_validator();
        let expected: Hash256 = validator.hash_tree_root().unwrap().into();
        assert_eq!(validator_node(&validator).unwrap().root(), expected);
    }

    #[test]
    fn test_pending_deposit_node_matches_ssz_rs() {
        let deposit = PendingDeposit {
            pubkey: Vector::try_from(vec![3u8; 48]).unwrap(),
            withdrawal_credentials: [4u8; 32],
            amount: 1_000_000_000,
            signature: Vector::try_from((0..96).collect::<Vec<u8>>()).unwrap(),
            slot: 77,
        };
        let expected: Hash256 = deposit.hash_tree_root().unwrap().into();
        assert_eq!(pending_deposit_root(&deposit).unwrap(), expected);
    }

    #[test]
    fn test_state_root_matches_ssz_rs() {
        let mut synthetic = SyntheticState::new(100);
        synthetic.add_validator(32_000_000_000, false);
        synthetic.add_validator(31_000_000_000, true);
        synthetic.add_pending_deposit(0, 1_000_000_000, 90);

        let view = BeaconStateView::from_state(synthetic.state()).unwrap();
        let expected: Hash256 = synthetic.state().hash_tree_root().unwrap().into();
        assert_eq!(view.root(), expected);
        assert_eq!(view.slot(), 100);
        assert_eq!(view.fork(), ForkName::Electra);
    }

    #[test]
    fn test_fulu_state_root_matches_ssz_rs() {
        let mut state = TestFuluBeaconState::default();
        state.slot = 42;
        state.validators.push(sample_validator());
        state.balances.push(32_000_000_000);

        let view = BeaconStateView::from_state(&state).unwrap();
        let expected: Hash256 = state.hash_tree_root().unwrap().into();
        assert_eq!(view.root(), expected);
        assert_eq!(view.fork(), ForkName::Fulu);
    }

    #[test]
    fn test_block_root_matches_header() {
        let block = SyntheticState::new(5).build().unwrap();
        let expected: Hash256 = block.header().hash_tree_root().unwrap().into();
        assert_eq!(block.root(), expected);
        assert_eq!(block.slot(), 5);
    }

    #[test]
    fn test_state_root_mismatch() {
        let synthetic = SyntheticState::new(5);
        let view = BeaconStateView::from_state(synthetic.state()).unwrap();
        let header = BeaconBlockHeader {
            slot: 5,
            state_root: [0xee; 32],
            ..BeaconBlockHeader::default()
        };
        assert!(matches!(
            BeaconBlockView::new(header, view),
            Err(ProofError::StateRootMismatch { .. })
        ));
    }

    #[test]
    fn test_gindex_resolution_from_block() {
        let block = SyntheticState::new(5).build().unwrap();
        assert_eq!(
            block.gindex(&[PathStep::Field("state_root")]).unwrap().value(),
            11
        );
        let state_root = block
            .tree()
            .node(block.gindex(&[PathStep::Field("state_root")]).unwrap())
            .unwrap();
        assert_eq!(state_root.root(), block.header().state_root);
    }

    #[test]
    fn test_pending_deposit_index() {
        let mut synthetic = SyntheticState::new(100);
        synthetic.add_validator(32_000_000_000, false);
        synthetic.add_pending_deposit(0, 1, 90);
        synthetic.add_pending_deposit(0, 2, 91);
        let block = synthetic.build().unwrap();

        let index = block.state().pending_deposit_index();
        assert_eq!(index.len(), 2);
        assert_eq!(index[&block.state().pending_deposit_roots()[1]], 1);
    }
}
