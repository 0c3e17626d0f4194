//! Generalized Index Computation
//!
//! Computes generalized indices (gindices) for SSZ Merkle proofs through the
//! beacon block → state → list element → field paths the strategy contract
//! verifies against. Results must match the contract's gindex constants.

use crate::types::{ForkName, TreeDepths};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors from gindex computation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GindexError {
    #[error("{list} list is empty; prove the container root instead")]
    EmptyContainer { list: ListKind },

    #[error("index {index} out of bounds for {list} list of length {len}")]
    IndexOutOfBounds { list: ListKind, index: u64, len: u64 },

    #[error("index {index} exceeds the {list} list capacity of 2^{depth}")]
    BeyondCapacity { list: ListKind, index: u64, depth: u32 },

    #[error("unknown field `{field}` in {container}")]
    UnknownField { container: Container, field: String },

    #[error("path step {step} cannot be applied at {at}")]
    InvalidPath { step: String, at: String },

    #[error("generalized index does not fit in 64 bits")]
    Overflow,

    #[error("generalized index 0 is not a tree node")]
    Zero,
}

/// A path from a Merkle tree root to a node: root = 1, left child = 2i,
/// right child = 2i + 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeneralizedIndex(u64);

impl GeneralizedIndex {
    pub const ROOT: Self = Self(1);

    pub fn new(value: u64) -> Result<Self, GindexError> {
        if value == 0 {
            return Err(GindexError::Zero);
        }
        Ok(Self(value))
    }

    /// Node `index` at `depth` below the root: `2^depth + index`
    pub fn at_depth(depth: u32, index: u64) -> Result<Self, GindexError> {
        let base = 1_u64.checked_shl(depth).ok_or(GindexError::Overflow)?;
        if index >= base {
            return Err(GindexError::Overflow);
        }
        Ok(Self(base | index))
    }

    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Number of edges from the root, which is also the witness count
    #[must_use]
    pub const fn depth(self) -> u32 {
        63 - self.0.leading_zeros()
    }

    /// Append `child`, a gindex relative to the node `self` points at.
    ///
    /// Outer path first, inner path second:
    /// `result = (self << depth(child)) | (child ^ 2^depth(child))`.
    pub fn concat(self, child: Self) -> Result<Self, GindexError> {
        let depth = child.depth();
        if self.depth() + depth > 63 {
            return Err(GindexError::Overflow);
        }
        Ok(Self((self.0 << depth) | (child.0 ^ (1_u64 << depth))))
    }

    /// Fold a root-to-leaf sequence of relative gindices into one
    pub fn concat_all(gindices: &[Self]) -> Result<Self, GindexError> {
        gindices
            .iter()
            .try_fold(Self::ROOT, |acc, &child| acc.concat(child))
    }

    /// Direction bits from the root down: `false` = left, `true` = right
    pub fn path_bits(self) -> impl Iterator<Item = bool> {
        let value = self.0;
        (0..self.depth()).rev().map(move |shift| (value >> shift) & 1 == 1)
    }
}

impl fmt::Display for GeneralizedIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<GeneralizedIndex> for u64 {
    fn from(gindex: GeneralizedIndex) -> Self {
        gindex.0
    }
}

/// SSZ list fields of the beacon state the proofs descend into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    Validators,
    Balances,
    PendingDeposits,
}

impl ListKind {
    /// Data-tree depth under the list root's left child
    #[must_use]
    pub const fn depth(self, depths: &TreeDepths) -> u32 {
        match self {
            Self::Validators => depths.validators,
            Self::Balances => depths.balances,
            Self::PendingDeposits => depths.pending_deposits,
        }
    }

    /// Data-tree leaf holding element `index`; balances pack four per chunk
    #[must_use]
    pub const fn leaf_index(self, index: u64) -> u64 {
        match self {
            Self::Balances => index / 4,
            Self::Validators | Self::PendingDeposits => index,
        }
    }

    const fn element(self) -> Shape {
        match self {
            Self::Validators => Shape::Container(Container::Validator),
            Self::Balances => Shape::Leaf,
            Self::PendingDeposits => Shape::Container(Container::PendingDeposit),
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validators => f.write_str("validators"),
            Self::Balances => f.write_str("balances"),
            Self::PendingDeposits => f.write_str("pending_deposits"),
        }
    }
}

/// Fixed-layout SSZ containers that paths can start from or pass through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Container {
    /// `BeaconBlock` / `BeaconBlockHeader` (same top-level layout)
    BeaconBlock(ForkName),
    BeaconState(ForkName),
    Validator,
    PendingDeposit,
}

const BLOCK_FIELDS: [&str; 5] = [
    "slot",
    "proposer_index",
    "parent_root",
    "state_root",
    "body",
];

// Fulu layout; Electra is the first 37 entries
const STATE_FIELDS: [&str; 38] = [
    "genesis_time",
    "genesis_validators_root",
    "slot",
    "fork",
    "latest_block_header",
    "block_roots",
    "state_roots",
    "historical_roots",
    "eth1_data",
    "eth1_data_votes",
    "eth1_deposit_index",
    "validators",
    "balances",
    "randao_mixes",
    "slashings",
    "previous_epoch_participation",
    "current_epoch_participation",
    "justification_bits",
    "previous_justified_checkpoint",
    "current_justified_checkpoint",
    "finalized_checkpoint",
    "inactivity_scores",
    "current_sync_committee",
    "next_sync_committee",
    "latest_execution_payload_header",
    "next_withdrawal_index",
    "next_withdrawal_validator_index",
    "historical_summaries",
    "deposit_requests_start_index",
    "deposit_balance_to_consume",
    "exit_balance_to_consume",
    "earliest_exit_epoch",
    "consolidation_balance_to_consume",
    "earliest_consolidation_epoch",
    "pending_deposits",
    "pending_partial_withdrawals",
    "pending_consolidations",
    "proposer_lookahead",
];

const VALIDATOR_FIELDS: [&str; 8] = [
    "pubkey",
    "withdrawal_credentials",
    "effective_balance",
    "slashed",
    "activation_eligibility_epoch",
    "activation_epoch",
    "exit_epoch",
    "withdrawable_epoch",
];

const PENDING_DEPOSIT_FIELDS: [&str; 5] = [
    "pubkey",
    "withdrawal_credentials",
    "amount",
    "signature",
    "slot",
];

impl Container {
    /// Field names in declaration order
    #[must_use]
    pub fn field_names(self) -> &'static [&'static str] {
        match self {
            Self::BeaconBlock(_) => &BLOCK_FIELDS,
            Self::BeaconState(fork) => &STATE_FIELDS[..fork.state_field_count()],
            Self::Validator => &VALIDATOR_FIELDS,
            Self::PendingDeposit => &PENDING_DEPOSIT_FIELDS,
        }
    }

    /// Tree depth: `ceil(log2(field_count))`
    #[must_use]
    pub fn depth(self) -> u32 {
        self.field_names().len().next_power_of_two().trailing_zeros()
    }

    /// Position of `field` within the container
    pub fn field_position(self, field: &str) -> Result<u64, GindexError> {
        self.field_names()
            .iter()
            .position(|&name| name == field)
            .map(|pos| pos as u64)
            .ok_or_else(|| GindexError::UnknownField {
                container: self,
                field: field.to_string(),
            })
    }

    /// Gindex of `field` relative to the container root: `2^depth + position`
    pub fn field_gindex(self, field: &str) -> Result<GeneralizedIndex, GindexError> {
        GeneralizedIndex::at_depth(self.depth(), self.field_position(field)?)
    }

    fn field_shape(self, field: &str) -> Shape {
        match (self, field) {
            (Self::BeaconBlock(fork), "state_root") => Shape::Container(Self::BeaconState(fork)),
            (Self::BeaconState(_), "validators") => Shape::List(ListKind::Validators),
            (Self::BeaconState(_), "balances") => Shape::List(ListKind::Balances),
            (Self::BeaconState(_), "pending_deposits") => Shape::List(ListKind::PendingDeposits),
            _ => Shape::Leaf,
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeaconBlock(fork) => write!(f, "BeaconBlock({fork})"),
            Self::BeaconState(fork) => write!(f, "BeaconState({fork})"),
            Self::Validator => f.write_str("Validator"),
            Self::PendingDeposit => f.write_str("PendingDeposit"),
        }
    }
}

/// One step of a field path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStep {
    /// Named field of a container
    Field(&'static str),
    /// Element of a list (descends through the list's data root)
    Element(u64),
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => write!(f, ".{name}"),
            Self::Element(index) => write!(f, "[{index}]"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Shape {
    Container(Container),
    List(ListKind),
    Leaf,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container(container) => write!(f, "{container}"),
            Self::List(list) => write!(f, "{list} list"),
            Self::Leaf => f.write_str("a leaf"),
        }
    }
}

// `data_root` of a list is the left child of the list root; the right child is
// the length mix-in.
const LIST_DATA_ROOT: GeneralizedIndex = GeneralizedIndex(2);

/// Calculator for generalized indices in the beacon block tree
#[derive(Debug, Clone, Copy)]
pub struct GindexCalculator {
    fork: ForkName,
    depths: TreeDepths,
}

impl GindexCalculator {
    #[must_use]
    pub const fn new(fork: ForkName, depths: TreeDepths) -> Self {
        Self { fork, depths }
    }

    #[must_use]
    pub const fn depths(&self) -> &TreeDepths {
        &self.depths
    }

    /// Resolve `path` starting at `root` into a single gindex.
    ///
    /// Does not check list lengths; see [`Self::list_element`] for that.
    pub fn index_for(
        &self,
        root: Container,
        path: &[PathStep],
    ) -> Result<GeneralizedIndex, GindexError> {
        let mut gindex = GeneralizedIndex::ROOT;
        let mut shape = Shape::Container(root);

        for step in path {
            match (shape, *step) {
                (Shape::Container(container), PathStep::Field(name)) => {
                    gindex = gindex.concat(container.field_gindex(name)?)?;
                    shape = container.field_shape(name);
                }
                (Shape::List(list), PathStep::Element(index)) => {
                    gindex = gindex.concat(self.element_in_list(list, index)?)?;
                    shape = list.element();
                }
                (at, step) => {
                    return Err(GindexError::InvalidPath {
                        step: step.to_string(),
                        at: at.to_string(),
                    })
                }
            }
        }

        Ok(gindex)
    }

    /// Gindex of element `index` relative to the list root, checked against
    /// the list's current length.
    pub fn list_element(
        &self,
        list: ListKind,
        index: u64,
        len: u64,
    ) -> Result<GeneralizedIndex, GindexError> {
        if len == 0 {
            return Err(GindexError::EmptyContainer { list });
        }
        if index >= len {
            return Err(GindexError::IndexOutOfBounds { list, index, len });
        }
        self.element_in_list(list, index)
    }

    // toGindex(depth + 1, leaf) == concat(2, 2^depth + leaf)
    fn element_in_list(&self, list: ListKind, index: u64) -> Result<GeneralizedIndex, GindexError> {
        let depth = list.depth(&self.depths);
        let leaf = list.leaf_index(index);
        if depth < 64 && leaf >> depth != 0 {
            return Err(GindexError::BeyondCapacity { list, index, depth });
        }
        LIST_DATA_ROOT.concat(GeneralizedIndex::at_depth(depth, leaf)?)
    }

    fn block(&self) -> Container {
        Container::BeaconBlock(self.fork)
    }

    /// `block.state_root` (gindex 11)
    pub fn state_root(&self) -> Result<GeneralizedIndex, GindexError> {
        self.index_for(self.block(), &[PathStep::Field("state_root")])
    }

    /// `block.state.pending_deposits` list root
    pub fn pending_deposits_container(&self) -> Result<GeneralizedIndex, GindexError> {
        self.index_for(
            self.block(),
            &[PathStep::Field("state_root"), PathStep::Field("pending_deposits")],
        )
    }

    /// `pending_deposits[k]` relative to the pending deposits list root
    pub fn pending_deposit_in_container(
        &self,
        index: u64,
        len: u64,
    ) -> Result<GeneralizedIndex, GindexError> {
        self.list_element(ListKind::PendingDeposits, index, len)
    }

    /// `block.state.pending_deposits[0].slot`.
    ///
    /// An empty queue has no first deposit: `EmptyContainer` tells the caller
    /// to prove [`Self::first_pending_deposit_node`] instead.
    pub fn first_pending_deposit_slot(&self, len: u64) -> Result<GeneralizedIndex, GindexError> {
        self.list_element(ListKind::PendingDeposits, 0, len)?;
        self.index_for(
            self.block(),
            &[
                PathStep::Field("state_root"),
                PathStep::Field("pending_deposits"),
                PathStep::Element(0),
                PathStep::Field("slot"),
            ],
        )
    }

    /// `block.state.pending_deposits[0]` data-tree node, which is a zero
    /// subtree when the queue is empty
    pub fn first_pending_deposit_node(&self) -> Result<GeneralizedIndex, GindexError> {
        self.index_for(
            self.block(),
            &[
                PathStep::Field("state_root"),
                PathStep::Field("pending_deposits"),
                PathStep::Element(0),
            ],
        )
    }

    fn validator_field(
        &self,
        field: &'static str,
        index: u64,
        len: u64,
    ) -> Result<GeneralizedIndex, GindexError> {
        self.list_element(ListKind::Validators, index, len)?;
        self.index_for(
            self.block(),
            &[
                PathStep::Field("state_root"),
                PathStep::Field("validators"),
                PathStep::Element(index),
                PathStep::Field(field),
            ],
        )
    }

    /// `block.state.validators[i].withdrawable_epoch`
    pub fn validator_withdrawable_epoch(
        &self,
        index: u64,
        len: u64,
    ) -> Result<GeneralizedIndex, GindexError> {
        self.validator_field("withdrawable_epoch", index, len)
    }

    /// `block.state.validators[i].pubkey`
    pub fn validator_pubkey(&self, index: u64, len: u64) -> Result<GeneralizedIndex, GindexError> {
        self.validator_field("pubkey", index, len)
    }

    /// `block.state.balances` list root
    pub fn balances_container(&self) -> Result<GeneralizedIndex, GindexError> {
        self.index_for(
            self.block(),
            &[PathStep::Field("state_root"), PathStep::Field("balances")],
        )
    }

    /// Balance chunk holding validator `i`, relative to the balances list root
    pub fn balance_in_container(&self, index: u64, len: u64) -> Result<GeneralizedIndex, GindexError> {
        self.list_element(ListKind::Balances, index, len)
    }
}
