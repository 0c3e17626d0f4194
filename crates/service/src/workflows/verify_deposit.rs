//! Deposit verification workflow
//!
//! Finds strategy deposits the beacon chain has processed, snaps balances so
//! the proof block postdates the processing, then verifies each deposit on
//! its own.

use super::snap::SnapOutcome;
use super::{TaskError, TaskRunner};
use crate::contract::{
    ContractCall, DepositStatus, StakingStrategy, StrategyReader, ValidatorState,
};
use crate::executor::{find_event, TxBackend};
use alloy::primitives::{utils::format_ether, B256};
use proof_gen::{
    to_hex, BeaconBlockView, BeaconSource, BlockId, DepositReconciler, Hash256,
    PendingDepositRecord, ProofGenerator,
};
use std::collections::HashMap;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug)]
pub enum DepositOutcome {
    Verified { tx_hash: B256 },
    DryRun,
    Failed(TaskError),
}

#[derive(Debug)]
pub struct DepositResult {
    pub deposit_root: Hash256,
    pub outcome: DepositOutcome,
}

impl DepositResult {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, DepositOutcome::Failed(_))
    }
}

#[derive(Debug)]
pub enum VerifyDepositOutcome {
    /// The strategy has no pending deposits
    NoPendingDeposits,
    /// Every strategy deposit is still queued on the beacon chain
    NothingProcessed,
    Processed {
        snap: SnapOutcome,
        /// Slot of the block the proofs were built against
        slot: u64,
        results: Vec<DepositResult>,
    },
}

impl VerifyDepositOutcome {
    pub fn failures(&self) -> impl Iterator<Item = &DepositResult> {
        let results: &[DepositResult] = match self {
            Self::Processed { results, .. } => results,
            _ => &[],
        };
        results.iter().filter(|r| r.is_failure())
    }
}

/// Proof context shared by every deposit in one run
struct ProofBlock<'a> {
    block: &'a BeaconBlockView,
    generator: ProofGenerator<'a>,
    queue: HashMap<Hash256, u32>,
}

impl<R, S, T> TaskRunner<R, S, T>
where
    R: StrategyReader,
    S: BeaconSource,
    T: TxBackend,
{
    #[instrument(skip(self))]
    pub async fn verify_deposit(
        &self,
        now: u64,
        dry_run: bool,
    ) -> Result<VerifyDepositOutcome, TaskError> {
        let deposits = self.reader.pending_deposits().await?;
        if deposits.is_empty() {
            info!("No pending deposits on the strategy");
            return Ok(VerifyDepositOutcome::NoPendingDeposits);
        }

        let head = self.beacon.fetch_block(BlockId::Head).await?;
        let reconciliation =
            DepositReconciler::reconcile(&deposits, head.state().pending_deposit_roots())?;
        for (deposit, index) in &reconciliation.matched {
            debug!(
                deposit_root = %B256::from(deposit.deposit_root),
                index,
                "Deposit still in the beacon queue"
            );
        }
        if reconciliation.processed.is_empty() {
            info!(
                deposits = deposits.len(),
                slot = head.slot(),
                "No strategy deposits have been processed yet"
            );
            return Ok(VerifyDepositOutcome::NothingProcessed);
        }
        info!(
            processed = reconciliation.processed.len(),
            slot = head.slot(),
            "Strategy deposits processed by the beacon chain"
        );
        drop(head);

        // The proof block must postdate the processing of every deposit
        let snap = self.snap_balances(now, dry_run).await?;
        if let SnapOutcome::Skipped { last_snapshot, .. } = snap {
            warn!(last_snapshot, "Using the existing snapshot for deposit proofs");
        }
        let snapped = self.reader.snapped_balance().await?;
        if !snapped.exists() {
            return Err(TaskError::MissingSnapshot);
        }
        let block = self.fetch_snapped_block(snapped.block_root).await?;
        let proof_block = ProofBlock {
            block: &block,
            generator: ProofGenerator::new(&block),
            queue: block.state().pending_deposit_index(),
        };

        let mut results = Vec::with_capacity(reconciliation.processed.len());
        for deposit in &reconciliation.processed {
            let outcome = match self.verify_one(deposit, &proof_block, dry_run).await {
                Ok(Some(tx_hash)) => DepositOutcome::Verified { tx_hash },
                Ok(None) => DepositOutcome::DryRun,
                Err(e) => {
                    error!(
                        deposit_root = %B256::from(deposit.deposit_root),
                        error = %e,
                        "Failed to verify deposit"
                    );
                    DepositOutcome::Failed(e)
                }
            };
            results.push(DepositResult {
                deposit_root: deposit.deposit_root,
                outcome,
            });
        }

        Ok(VerifyDepositOutcome::Processed {
            snap,
            slot: block.slot(),
            results,
        })
    }

    #[instrument(skip_all, fields(deposit_root = %B256::from(deposit.deposit_root)))]
    async fn verify_one(
        &self,
        deposit: &PendingDepositRecord,
        proof_block: &ProofBlock<'_>,
        dry_run: bool,
    ) -> Result<Option<B256>, TaskError> {
        let data = self.reader.deposit(deposit.deposit_root).await?;
        let validator = self.reader.validator(data.pub_key_hash).await?;
        info!(
            slot = data.slot,
            amount_gwei = %data.amount_gwei,
            status = ?data.status,
            deposit_index = data.deposit_index,
            validator_index = validator.index,
            validator_state = ?validator.state,
            "Read strategy deposit"
        );

        if validator.state != ValidatorState::Verified {
            return Err(TaskError::ContractPreconditionViolation(format!(
                "validator {} is {:?}, expected Verified",
                to_hex(&data.pub_key_hash),
                validator.state
            )));
        }
        if data.status != DepositStatus::Pending {
            return Err(TaskError::ContractPreconditionViolation(format!(
                "deposit {} is {:?}, expected Pending",
                to_hex(&deposit.deposit_root),
                data.status
            )));
        }

        let block = proof_block.block;
        if let Some(index) = proof_block.queue.get(&deposit.deposit_root) {
            return Err(TaskError::inconsistency(
                &deposit.deposit_root,
                format!(
                    "is still at beacon queue position {index} at slot {}",
                    block.slot()
                ),
            ));
        }

        let first_pending = proof_block.generator.first_pending_deposit_slot()?;
        let withdrawable = proof_block
            .generator
            .validator_withdrawable_epoch(validator.index)?;
        debug!(
            first_pending_slot = first_pending.slot,
            queue_empty = first_pending.is_empty,
            withdrawable_epoch = withdrawable.withdrawable_epoch,
            "Built deposit proofs"
        );

        let call = ContractCall::verify_deposit(
            self.settings.strategy,
            deposit.deposit_root,
            block.slot(),
            &first_pending,
            &withdrawable,
        );
        let Some(report) = self.executor.execute(&call, dry_run).await? else {
            return Ok(None);
        };

        match find_event::<StakingStrategy::DepositVerified>(&report.receipt, call.to) {
            Some(verified) => info!(
                amount = %format_ether(verified.amountWei),
                "Deposit verified"
            ),
            None => warn!(tx_hash = %report.tx_hash, "DepositVerified event not found in receipt"),
        }
        Ok(Some(report.tx_hash))
    }
}
