//! Balance verification workflow
//!
//! Proves the strategy's pending deposits and verified validator balances
//! against the beacon block of the last snapshot.

use super::{TaskError, TaskRunner};
use crate::contract::{
    proof_bytes, ContractCall, StakingStrategy, StrategyReader, StrategyValidator,
};
use crate::executor::{find_event, TxBackend};
use alloy::primitives::{utils::format_ether, Bytes, B256, U256};
use proof_gen::{
    BeaconBlockView, BeaconSource, DepositReconciler, PendingDepositRecord, ProofGenerator,
};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyBalancesOutcome {
    /// The strategy has never snapped its balances
    NoSnapshot,
    DryRun { slot: u64 },
    Submitted { tx_hash: B256, slot: u64 },
}

impl<R, S, T> TaskRunner<R, S, T>
where
    R: StrategyReader,
    S: BeaconSource,
    T: TxBackend,
{
    #[instrument(skip(self))]
    pub async fn verify_balances(&self, dry_run: bool) -> Result<VerifyBalancesOutcome, TaskError> {
        let snapped = self.reader.snapped_balance().await?;
        if !snapped.exists() {
            info!("No balances have been snapped, nothing to verify");
            return Ok(VerifyBalancesOutcome::NoSnapshot);
        }
        info!(
            block_root = %B256::from(snapped.block_root),
            timestamp = snapped.timestamp,
            eth_balance = %format_ether(U256::from(snapped.eth_balance)),
            "Verifying snapped balances"
        );

        let block = self.fetch_snapped_block(snapped.block_root).await?;
        let deposits = self.reader.pending_deposits().await?;
        let validators = self.reader.verified_validators().await?;

        let generator = ProofGenerator::new(&block);
        let pending_deposit_proofs = pending_deposit_proofs(&block, &generator, &deposits)?;
        let balance_proofs = balance_proofs(&generator, &validators)?;

        let call = ContractCall::verify_balances(
            self.settings.strategy,
            balance_proofs,
            pending_deposit_proofs,
        );
        let Some(report) = self.executor.execute(&call, dry_run).await? else {
            return Ok(VerifyBalancesOutcome::DryRun { slot: block.slot() });
        };

        match find_event::<StakingStrategy::BalancesVerified>(&report.receipt, call.to) {
            Some(verified) => info!(
                timestamp = verified.timestamp,
                total_deposits = %format_ether(verified.totalDepositsWei),
                total_validator_balance = %format_ether(verified.totalValidatorBalance),
                eth_balance = %format_ether(verified.ethBalance),
                "Balances verified"
            ),
            None => warn!(tx_hash = %report.tx_hash, "BalancesVerified event not found in receipt"),
        }

        Ok(VerifyBalancesOutcome::Submitted {
            tx_hash: report.tx_hash,
            slot: block.slot(),
        })
    }
}

/// Pending deposits container proof plus one proof per strategy deposit.
///
/// Every strategy deposit must still be in the block's pending queue.
fn pending_deposit_proofs(
    block: &BeaconBlockView,
    generator: &ProofGenerator<'_>,
    deposits: &[PendingDepositRecord],
) -> Result<StakingStrategy::PendingDepositProofs, TaskError> {
    let reconciliation =
        DepositReconciler::reconcile(deposits, block.state().pending_deposit_roots())?;
    if let Some(missing) = reconciliation.processed.first() {
        return Err(TaskError::inconsistency(
            &missing.deposit_root,
            format!(
                "is not in the beacon pending deposit queue at slot {}",
                block.slot()
            ),
        ));
    }

    let container = generator.pending_deposits_container()?;
    let mut indexes = Vec::with_capacity(reconciliation.matched.len());
    let mut proofs = Vec::with_capacity(reconciliation.matched.len());
    for (deposit, index) in &reconciliation.matched {
        let proof = generator.pending_deposit(*index)?;
        debug!(
            deposit_root = %B256::from(deposit.deposit_root),
            index,
            "Proved pending deposit"
        );
        indexes.push(*index);
        proofs.push(proof_bytes(&proof.bundle));
    }
    info!(
        deposits = indexes.len(),
        queue = block.state().pending_deposits().len(),
        "Built pending deposit proofs"
    );

    Ok(StakingStrategy::PendingDepositProofs {
        pendingDepositContainerRoot: container.leaf.into(),
        pendingDepositContainerProof: proof_bytes(&container),
        pendingDepositIndexes: indexes,
        pendingDepositProofs: proofs,
    })
}

/// Balances container proof plus one balance proof per verified validator,
/// or an empty set when the strategy has no verified validators.
fn balance_proofs(
    generator: &ProofGenerator<'_>,
    validators: &[StrategyValidator],
) -> Result<StakingStrategy::BalanceProofs, TaskError> {
    if validators.is_empty() {
        info!("No verified validators, skipping balance proofs");
        return Ok(StakingStrategy::BalanceProofs {
            balancesContainerRoot: B256::ZERO,
            balancesContainerProof: Bytes::new(),
            validatorBalanceLeaves: Vec::new(),
            validatorBalanceProofs: Vec::new(),
        });
    }

    let container = generator.balances_container()?;
    let mut leaves = Vec::with_capacity(validators.len());
    let mut proofs = Vec::with_capacity(validators.len());
    for validator in validators {
        let proof = generator.validator_balance(validator.index)?;
        debug!(
            validator_index = validator.index,
            state = ?validator.state,
            balance = proof.balance,
            "Proved validator balance"
        );
        leaves.push(B256::from(proof.bundle.leaf));
        proofs.push(proof_bytes(&proof.bundle));
    }
    info!(validators = leaves.len(), "Built validator balance proofs");

    Ok(StakingStrategy::BalanceProofs {
        balancesContainerRoot: container.leaf.into(),
        balancesContainerProof: proof_bytes(&container),
        validatorBalanceLeaves: leaves,
        validatorBalanceProofs: proofs,
    })
}
