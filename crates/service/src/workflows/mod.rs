//! Verification workflows
//!
//! Each workflow reads the strategy's preconditions, builds whatever proofs
//! it needs against a beacon block and runs the resulting call through the
//! [`TransactionExecutor`].

mod snap;
mod verify_balances;
mod verify_deposit;

#[cfg(test)]
pub(crate) mod testing;

pub use snap::SnapOutcome;
pub use verify_balances::VerifyBalancesOutcome;
pub use verify_deposit::{DepositOutcome, DepositResult, VerifyDepositOutcome};

use crate::contract::{ContractError, StrategyReader};
use crate::executor::{ExecutorError, TransactionExecutor, TxBackend};
use alloy::primitives::{Address, B256};
use proof_gen::{
    to_hex, BeaconBlockView, BeaconClientError, BeaconSource, BlockId, Hash256, ProofError,
    ProofGenerator, PubKeyProof, ReconcileError,
};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Beacon(#[from] BeaconClientError),

    #[error(transparent)]
    Proof(#[from] ProofError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("Pending deposit {deposit_root} {reason}")]
    ReconciliationInconsistency { deposit_root: String, reason: String },

    #[error("Contract precondition not met: {0}")]
    ContractPreconditionViolation(String),

    #[error("Beacon block {fetched} does not match snapped block root {expected}")]
    SnapshotMismatch { expected: String, fetched: String },

    #[error("No balance snapshot has been taken")]
    MissingSnapshot,
}

impl TaskError {
    pub(crate) fn inconsistency(deposit_root: &Hash256, reason: impl Into<String>) -> Self {
        Self::ReconciliationInconsistency {
            deposit_root: to_hex(deposit_root),
            reason: reason.into(),
        }
    }
}

/// Settings the workflows need beyond their collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerSettings {
    pub strategy: Address,
    pub snap_delay_secs: u64,
}

/// Runs the workflows against a contract reader, a beacon source and an
/// executor
pub struct TaskRunner<R, S, T> {
    settings: RunnerSettings,
    reader: R,
    beacon: S,
    executor: TransactionExecutor<T>,
}

impl<R, S, T> TaskRunner<R, S, T>
where
    R: StrategyReader,
    S: BeaconSource,
    T: TxBackend,
{
    pub fn new(
        settings: RunnerSettings,
        reader: R,
        beacon: S,
        executor: TransactionExecutor<T>,
    ) -> Self {
        Self {
            settings,
            reader,
            beacon,
            executor,
        }
    }

    pub fn executor(&self) -> &TransactionExecutor<T> {
        &self.executor
    }

    /// Fetch the beacon block a snapshot refers to and check it is the one
    /// the contract recorded
    async fn fetch_snapped_block(
        &self,
        block_root: Hash256,
    ) -> Result<BeaconBlockView, TaskError> {
        let block = self.beacon.fetch_block(BlockId::Root(block_root)).await?;
        if block.root() != block_root {
            return Err(TaskError::SnapshotMismatch {
                expected: to_hex(&block_root),
                fetched: to_hex(&block.root()),
            });
        }
        info!(
            slot = block.slot(),
            block_root = %B256::from(block_root),
            "Fetched snapped beacon block"
        );
        Ok(block)
    }
}

/// Public key proof of a validator, for diagnostics
pub async fn validator_pubkey_proof<S: BeaconSource>(
    beacon: &S,
    block_id: BlockId,
    validator_index: u64,
) -> Result<PubKeyProof, TaskError> {
    let block = beacon.fetch_block(block_id).await?;
    let proof = ProofGenerator::new(&block).validator_pubkey(validator_index)?;
    info!(
        slot = block.slot(),
        validator_index,
        pubkey = %to_hex(&proof.pubkey),
        gindex = %proof.bundle.generalized_index,
        "Generated validator public key proof"
    );
    Ok(proof)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::testing::FakeBeacon;
    use proof_gen::synthetic::SyntheticState;

    #[tokio::test]
    async fn test_validator_pubkey_proof() {
        let mut synthetic = SyntheticState::new(64);
        synthetic.add_validator(32_000_000_000, false);
        synthetic.add_validator(32_000_000_000, false);
        let beacon = FakeBeacon::new(synthetic.build().unwrap());

        let proof = validator_pubkey_proof(&beacon, BlockId::Head, 1).await.unwrap();
        assert_eq!(proof.validator_index, 1);
        assert_eq!(proof.pubkey, SyntheticState::pubkey(1).to_vec());
        proof.bundle.verify().unwrap();

        assert!(matches!(
            validator_pubkey_proof(&beacon, BlockId::Head, 2).await,
            Err(TaskError::Proof(ProofError::ValidatorNotFound { index: 2, .. }))
        ));
    }
}
