//! Transaction Executor
//!
//! Wraps a strategy contract call: estimate, price, submit, confirm and
//! decode the expected event.

use crate::config::Network;
use crate::contract::ContractCall;
use crate::signer::{SignerError, TxSigner, TxSubmission};
use alloy::{
    network::{ReceiptResponse, TransactionBuilder},
    primitives::{
        utils::{format_ether, format_units, UnitsError},
        Address, Log, B256, U256,
    },
    providers::{DynProvider, PendingTransactionBuilder, Provider},
    rpc::types::TransactionRequest,
    sol_types::SolEvent,
};
use std::future::Future;
use thiserror::Error;
use tracing::{info, instrument, warn};

const GWEI: u128 = 1_000_000_000;

/// Signer balance below which a warning is logged (0.001 ETH)
const LOW_BALANCE_WEI: u128 = 1_000_000_000_000_000;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error("No signer configured")]
    NoSigner,
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Gas estimation for {method} reverted: {reason}")]
    EstimationRevert { method: &'static str, reason: String },

    #[error("Buffered gas price {total_gwei} gwei exceeds maximum {max_gwei} gwei")]
    GasPriceExceeded { total_gwei: String, max_gwei: u64 },

    #[error("Transaction {tx_hash} for {method} failed")]
    TransactionFailure { method: &'static str, tx_hash: B256 },

    #[error(transparent)]
    Units(#[from] UnitsError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Gas settings attached to a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasParams {
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// Network EIP-1559 fee suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// The parts of a receipt the workflows look at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    pub effective_gas_price: u128,
    pub logs: Vec<Log>,
}

/// Result of a submitted and confirmed call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub tx_hash: B256,
    pub receipt: TxReceipt,
    pub gas_estimate: u64,
    pub gas_price: u128,
    pub gas_cost: U256,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

/// Chain access the executor needs
pub trait TxBackend: Send + Sync {
    fn estimate_gas(
        &self,
        call: &ContractCall,
    ) -> impl Future<Output = Result<u64, BackendError>> + Send;

    fn gas_price(&self) -> impl Future<Output = Result<u128, BackendError>> + Send;

    fn fee_estimate(&self) -> impl Future<Output = Result<FeeEstimate, BackendError>> + Send;

    fn send(
        &self,
        call: &ContractCall,
        gas: GasParams,
    ) -> impl Future<Output = Result<B256, BackendError>> + Send;

    /// Wait for one confirmation
    fn wait_for_receipt(
        &self,
        tx_hash: B256,
    ) -> impl Future<Output = Result<TxReceipt, BackendError>> + Send;
}

/// [`TxBackend`] over a JSON-RPC provider and an optional signer
pub struct AlloyBackend {
    provider: DynProvider,
    signer: Option<TxSigner>,
    from: Option<Address>,
}

impl AlloyBackend {
    /// Resolves the signer's address up front so estimates run as the sender
    pub async fn new(provider: DynProvider, signer: Option<TxSigner>) -> Result<Self, BackendError> {
        let from = match &signer {
            Some(signer) => Some(signer.address().await?),
            None => None,
        };
        Ok(Self {
            provider,
            signer,
            from,
        })
    }

    #[must_use]
    pub fn sender(&self) -> Option<Address> {
        self.from
    }

    /// Log the sender's balance, warning when it runs low
    pub async fn check_sender_balance(&self) -> Result<(), BackendError> {
        let Some(from) = self.from else {
            return Ok(());
        };
        let balance = self
            .provider
            .get_balance(from)
            .await
            .map_err(|e| BackendError::Rpc(e.to_string()))?;

        info!(address = %from, balance = %format_ether(balance), "Signer balance (ETH)");
        if balance < U256::from(LOW_BALANCE_WEI) {
            warn!(address = %from, "Signer balance is below 0.001 ETH");
        }
        Ok(())
    }

    fn request(&self, call: &ContractCall) -> TransactionRequest {
        let request = TransactionRequest::default()
            .with_to(call.to)
            .with_input(call.data.clone());
        match self.from {
            Some(from) => request.with_from(from),
            None => request,
        }
    }
}

impl TxBackend for AlloyBackend {
    async fn estimate_gas(&self, call: &ContractCall) -> Result<u64, BackendError> {
        self.provider
            .estimate_gas(self.request(call))
            .await
            .map_err(|e| BackendError::Rpc(e.to_string()))
    }

    async fn gas_price(&self) -> Result<u128, BackendError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| BackendError::Rpc(e.to_string()))
    }

    async fn fee_estimate(&self) -> Result<FeeEstimate, BackendError> {
        let fees = self
            .provider
            .estimate_eip1559_fees()
            .await
            .map_err(|e| BackendError::Rpc(e.to_string()))?;
        Ok(FeeEstimate {
            max_fee_per_gas: fees.max_fee_per_gas,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
        })
    }

    async fn send(&self, call: &ContractCall, gas: GasParams) -> Result<B256, BackendError> {
        let signer = self.signer.as_ref().ok_or(BackendError::NoSigner)?;
        let submission = TxSubmission {
            to: call.to,
            data: call.data.clone(),
            gas,
        };
        Ok(signer.send(&submission).await?)
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TxReceipt, BackendError> {
        let receipt = PendingTransactionBuilder::new(self.provider.root().clone(), tx_hash)
            .with_required_confirmations(1)
            .get_receipt()
            .await
            .map_err(|e| BackendError::Rpc(e.to_string()))?;

        Ok(TxReceipt {
            tx_hash,
            success: receipt.status(),
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
            effective_gas_price: receipt.effective_gas_price,
            logs: receipt
                .inner
                .logs()
                .iter()
                .map(|log| log.inner.clone())
                .collect(),
        })
    }
}

/// Runs contract calls with a buffered gas limit and capped fees
pub struct TransactionExecutor<T> {
    backend: T,
    network: Network,
    max_gas_price_gwei: Option<u64>,
}

impl<T: TxBackend> TransactionExecutor<T> {
    pub fn new(backend: T, network: Network, max_gas_price_gwei: Option<u64>) -> Self {
        if max_gas_price_gwei.is_none() {
            warn!("MAX_GAS_PRICE_GWEI is not set, gas price will not be capped");
        }
        Self {
            backend,
            network,
            max_gas_price_gwei,
        }
    }

    pub fn backend(&self) -> &T {
        &self.backend
    }

    /// Execute `call`, or only estimate it when `dry_run` is set.
    ///
    /// Returns `None` for a dry run. Nothing is retried.
    #[instrument(skip(self, call), fields(method = call.method))]
    pub async fn execute(
        &self,
        call: &ContractCall,
        dry_run: bool,
    ) -> Result<Option<ExecutionReport>, ExecutorError> {
        let gas_estimate = self.backend.estimate_gas(call).await.map_err(|e| {
            ExecutorError::EstimationRevert {
                method: call.method,
                reason: e.to_string(),
            }
        })?;
        let gas_price = self.backend.gas_price().await?;
        let estimated_cost = U256::from(gas_estimate) * U256::from(gas_price);

        if dry_run {
            let gas_price_gwei = format_units(U256::from(gas_price), "gwei")?;
            info!(
                gas_estimate,
                %gas_price_gwei,
                estimated_cost = %format_ether(estimated_cost),
                "Dry run, {} not sent",
                call.method
            );
            return Ok(None);
        }

        let gas = self.gas_params(gas_estimate).await?;
        let max_fee_gwei = format_units(U256::from(gas.max_fee_per_gas), "gwei")?;
        let max_priority_fee_gwei = format_units(U256::from(gas.max_priority_fee_per_gas), "gwei")?;
        info!(
            gas_estimate,
            gas_limit = gas.gas_limit,
            %max_fee_gwei,
            %max_priority_fee_gwei,
            "Sending {}",
            call.method
        );

        let tx_hash = self.backend.send(call, gas).await?;
        info!(tx = %self.network.tx_url(tx_hash), "Transaction sent, waiting for confirmation");

        let receipt = self.backend.wait_for_receipt(tx_hash).await?;
        if !receipt.success {
            return Err(ExecutorError::TransactionFailure {
                method: call.method,
                tx_hash,
            });
        }

        let gas_cost = U256::from(receipt.gas_used) * U256::from(receipt.effective_gas_price);
        info!(
            tx_hash = %tx_hash,
            block = receipt.block_number,
            gas_used = receipt.gas_used,
            gas_cost = %format_ether(gas_cost),
            "Transaction confirmed"
        );

        Ok(Some(ExecutionReport {
            tx_hash,
            receipt,
            gas_estimate,
            gas_price,
            gas_cost,
            gas_limit: gas.gas_limit,
            max_fee_per_gas: gas.max_fee_per_gas,
            max_priority_fee_per_gas: gas.max_priority_fee_per_gas,
        }))
    }

    /// Gas limit +20%, max fee +20%, priority fee +10%, then the ceiling check
    async fn gas_params(&self, gas_estimate: u64) -> Result<GasParams, ExecutorError> {
        let fees = self.backend.fee_estimate().await?;
        let max_fee_per_gas = fees.max_fee_per_gas.saturating_mul(12) / 10;
        let max_priority_fee_per_gas = fees.max_priority_fee_per_gas.saturating_mul(11) / 10;

        if let Some(max_gwei) = self.max_gas_price_gwei {
            let total = max_fee_per_gas.saturating_add(max_priority_fee_per_gas);
            if total > u128::from(max_gwei) * GWEI {
                return Err(ExecutorError::GasPriceExceeded {
                    total_gwei: format_units(U256::from(total), "gwei")?,
                    max_gwei,
                });
            }
        }

        Ok(GasParams {
            gas_limit: gas_estimate.saturating_add(gas_estimate / 5),
            max_fee_per_gas,
            max_priority_fee_per_gas,
        })
    }
}

/// First log in `receipt` emitted by `emitter` that decodes as `E`
pub fn find_event<E: SolEvent>(receipt: &TxReceipt, emitter: Address) -> Option<E> {
    receipt
        .logs
        .iter()
        .filter(|log| log.address == emitter)
        .filter(|log| log.topics().first() == Some(&E::SIGNATURE_HASH))
        .find_map(|log| E::decode_log(log).ok())
        .map(|log| log.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::StakingStrategy;
    use crate::workflows::testing::FakeBackend;
    use alloy::primitives::LogData;

    fn executor(max_gwei: Option<u64>) -> TransactionExecutor<FakeBackend> {
        TransactionExecutor::new(FakeBackend::default(), Network::Mainnet, max_gwei)
    }

    fn call() -> ContractCall {
        ContractCall::snap_balances(Address::with_last_byte(1))
    }

    #[tokio::test]
    async fn test_buffers_and_submits() {
        let executor = executor(Some(100));
        let report = executor
            .execute(&call(), false)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.gas_estimate, 100_000);
        assert_eq!(report.gas_limit, 120_000);
        assert_eq!(report.max_fee_per_gas, 24 * GWEI);
        assert_eq!(report.max_priority_fee_per_gas, 11 * GWEI / 10);
        assert_eq!(report.gas_cost, U256::from(90_000u64) * U256::from(15 * GWEI));

        let sent = executor.backend().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.gas_limit, 120_000);
    }

    #[tokio::test]
    async fn test_gas_limit_is_buffered_estimate() {
        let executor = executor(None);
        executor.backend().set_estimate(333_333);
        let report = executor.execute(&call(), false).await.unwrap().unwrap();

        assert_eq!(report.gas_estimate, 333_333);
        assert_eq!(report.gas_limit, 399_999);
        assert_eq!(executor.backend().sent()[0].1.gas_limit, 399_999);
    }

    #[tokio::test]
    async fn test_dry_run_estimates_without_sending() {
        let executor = executor(Some(1));
        let report = executor
            .execute(&call(), true)
            .await
            .unwrap();

        assert!(report.is_none());
        assert_eq!(executor.backend().estimates(), 1);
        assert!(executor.backend().sent().is_empty());
    }

    #[tokio::test]
    async fn test_gas_ceiling() {
        // 32.5 gwei * 1.2 + 10 gwei * 1.1 = 50 gwei
        let backend = FakeBackend::with_fees(FeeEstimate {
            max_fee_per_gas: 32_500_000_000,
            max_priority_fee_per_gas: 10 * GWEI,
        });
        let executor = TransactionExecutor::new(backend, Network::Mainnet, Some(49));

        let err = executor
            .execute(&call(), false)
            .await
            .unwrap_err();
        match err {
            ExecutorError::GasPriceExceeded {
                total_gwei,
                max_gwei,
            } => {
                assert_eq!(total_gwei, "50.000000000");
                assert_eq!(max_gwei, 49);
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(executor.backend().sent().is_empty());

        // Exactly at the ceiling is allowed
        let backend = FakeBackend::with_fees(FeeEstimate {
            max_fee_per_gas: 32_500_000_000,
            max_priority_fee_per_gas: 10 * GWEI,
        });
        let executor = TransactionExecutor::new(backend, Network::Mainnet, Some(50));
        assert!(executor
            .execute(&call(), false)
            .await
            .is_ok());
        assert_eq!(executor.backend().sent().len(), 1);
    }

    #[tokio::test]
    async fn test_estimation_revert_stops_everything() {
        let backend = FakeBackend::default();
        backend.revert_estimates("execution reverted: Snap too soon");
        let executor = TransactionExecutor::new(backend, Network::Mainnet, None);

        let err = executor
            .execute(&call(), true)
            .await
            .unwrap_err();
        match err {
            ExecutorError::EstimationRevert { method, reason } => {
                assert_eq!(method, "snapBalances");
                assert!(reason.contains("Snap too soon"));
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(executor.backend().sent().is_empty());
    }

    #[tokio::test]
    async fn test_failed_receipt() {
        let backend = FakeBackend::default();
        backend.fail_receipts();
        let executor = TransactionExecutor::new(backend, Network::Mainnet, None);

        let err = executor
            .execute(&call(), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutorError::TransactionFailure {
                method: "snapBalances",
                ..
            }
        ));
    }

    #[test]
    fn test_find_event() {
        let event = StakingStrategy::BalancesSnapped {
            blockRoot: B256::repeat_byte(3),
            ethBalance: U256::from(7u64),
        };
        let other = Log {
            address: Address::with_last_byte(9),
            data: LogData::new_unchecked(vec![B256::repeat_byte(1)], vec![].into()),
        };
        let receipt = TxReceipt {
            tx_hash: B256::ZERO,
            success: true,
            block_number: Some(1),
            gas_used: 1,
            effective_gas_price: 1,
            logs: vec![
                other,
                Log {
                    address: Address::with_last_byte(1),
                    data: event.encode_log_data(),
                },
            ],
        };

        let strategy = Address::with_last_byte(1);
        let found = find_event::<StakingStrategy::BalancesSnapped>(&receipt, strategy).unwrap();
        assert_eq!(found.blockRoot, B256::repeat_byte(3));
        assert_eq!(found.ethBalance, U256::from(7u64));
        assert!(find_event::<StakingStrategy::DepositVerified>(&receipt, strategy).is_none());
    }

    #[test]
    fn test_find_event_ignores_other_emitters() {
        let event = StakingStrategy::BalancesSnapped {
            blockRoot: B256::repeat_byte(3),
            ethBalance: U256::from(7u64),
        };
        let receipt = TxReceipt {
            tx_hash: B256::ZERO,
            success: true,
            block_number: Some(1),
            gas_used: 1,
            effective_gas_price: 1,
            logs: vec![Log {
                address: Address::with_last_byte(9),
                data: event.encode_log_data(),
            }],
        };

        let strategy = Address::with_last_byte(1);
        assert!(find_event::<StakingStrategy::BalancesSnapped>(&receipt, strategy).is_none());
        assert!(
            find_event::<StakingStrategy::BalancesSnapped>(&receipt, Address::with_last_byte(9))
                .is_some()
        );
    }
}
