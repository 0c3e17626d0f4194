//! # Proof Generation Library
//!
//! Beacon chain Merkle proofs for the staking strategy's balance and deposit
//! verification:
//! - `pending_deposits[0].slot` and individual pending deposits
//! - `validators[i].withdrawable_epoch` and `validators[i].pubkey`
//! - the balances list and individual balance chunks
//!
//! plus reconciliation of the strategy's recorded deposits against the beacon
//! pending deposit queue.

pub mod beacon_client;
pub mod beacon_state;
pub mod gindex;
pub mod proof;
pub mod reconcile;
pub mod synthetic;
pub mod tree;
pub mod types;
pub mod view;

pub use beacon_client::{BeaconClient, BeaconClientError, BeaconSource, BlockId};
pub use gindex::{GeneralizedIndex, GindexCalculator, GindexError};
pub use proof::{
    BalanceProof, FirstPendingDepositProof, PendingDepositProof, ProofBundle, ProofError,
    ProofGenerator, PubKeyProof, WithdrawableEpochProof,
};
pub use reconcile::{DepositReconciler, ReconcileError, Reconciliation};
pub use tree::{MerkleTree, TreeError};
pub use types::*;
pub use view::{BeaconBlockView, BeaconStateView};
