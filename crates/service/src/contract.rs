//! Staking strategy contract bindings
//!
//! Typed calls and events for the strategy proxy and its view contract, the
//! domain records read from them, and the [`StrategyReader`] seam the
//! workflows read contract state through.

use crate::config::StrategyAddresses;
use alloy::{
    primitives::{Address, Bytes, FixedBytes, U256},
    providers::DynProvider,
    sol,
    sol_types::SolCall,
};
use proof_gen::{
    FirstPendingDepositProof, Hash256, PendingDepositRecord, ProofBundle, WithdrawableEpochProof,
};
use std::future::Future;
use thiserror::Error;
use tracing::{debug, instrument};

// Generate contract bindings from ABI
sol! {
    #[sol(rpc)]
    contract StakingStrategy {
        struct BalanceProofs {
            bytes32 balancesContainerRoot;
            bytes balancesContainerProof;
            bytes32[] validatorBalanceLeaves;
            bytes[] validatorBalanceProofs;
        }

        struct PendingDepositProofs {
            bytes32 pendingDepositContainerRoot;
            bytes pendingDepositContainerProof;
            uint32[] pendingDepositIndexes;
            bytes[] pendingDepositProofs;
        }

        struct FirstPendingDeposit {
            uint64 slot;
            bytes proof;
        }

        struct StrategyValidatorData {
            uint64 withdrawableEpoch;
            bytes withdrawableEpochProof;
        }

        event BalancesSnapped(bytes32 indexed blockRoot, uint256 ethBalance);
        event BalancesVerified(
            uint64 indexed timestamp,
            uint256 totalDepositsWei,
            uint256 totalValidatorBalance,
            uint256 ethBalance
        );
        event DepositVerified(bytes32 indexed depositRoot, uint256 amountWei);

        function snapBalances() external;

        function snappedBalance()
            external
            view
            returns (bytes32 blockRoot, uint64 timestamp, uint128 ethBalance);

        function verifyBalances(
            BalanceProofs calldata balanceProofs,
            PendingDepositProofs calldata pendingDepositProofsData
        ) external;

        function deposits(bytes32 depositRoot)
            external
            view
            returns (
                uint64 slot,
                uint256 amountGwei,
                bytes32 pubKeyHash,
                uint8 status,
                uint32 depositIndex
            );

        function validator(bytes32 pubKeyHash) external view returns (uint8 state, uint40 index);

        function verifyDeposit(
            bytes32 pendingDepositRoot,
            uint64 depositProcessedSlot,
            FirstPendingDeposit calldata firstPendingDeposit,
            StrategyValidatorData calldata strategyValidatorData
        ) external;
    }
}

sol! {
    #[sol(rpc)]
    contract StakingStrategyView {
        struct VerifiedValidator {
            bytes32 pubKeyHash;
            uint64 index;
            uint8 state;
        }

        struct PendingDepositView {
            bytes32 pendingDepositRoot;
            bytes32 pubKeyHash;
            uint64 amountGwei;
            uint64 slot;
        }

        function getVerifiedValidators() external view returns (VerifiedValidator[] memory);
        function getPendingDeposits() external view returns (PendingDepositView[] memory);
    }
}

#[derive(Debug, Error)]
#[error("Contract call {method} failed: {reason}")]
pub struct ContractError {
    pub method: &'static str,
    pub reason: String,
}

impl ContractError {
    pub fn new(method: &'static str, reason: impl ToString) -> Self {
        Self {
            method,
            reason: reason.to_string(),
        }
    }
}

/// Last balance snapshot recorded by the strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnappedBalance {
    pub block_root: Hash256,
    /// Zero when no snapshot has been taken
    pub timestamp: u64,
    pub eth_balance: u128,
}

impl SnappedBalance {
    #[must_use]
    pub fn exists(&self) -> bool {
        self.timestamp != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyValidator {
    pub pub_key_hash: Hash256,
    pub index: u64,
    pub state: ValidatorState,
}

impl From<StakingStrategyView::VerifiedValidator> for StrategyValidator {
    fn from(v: StakingStrategyView::VerifiedValidator) -> Self {
        Self {
            pub_key_hash: v.pubKeyHash.0,
            index: v.index,
            state: v.state.into(),
        }
    }
}

/// Strategy-side validator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorState {
    Unset,
    Pending,
    Staked,
    Verified,
    Active,
    Exiting,
    Exited,
    Removed,
    Invalid,
    Unknown(u8),
}

impl From<u8> for ValidatorState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Unset,
            1 => Self::Pending,
            2 => Self::Staked,
            3 => Self::Verified,
            4 => Self::Active,
            5 => Self::Exiting,
            6 => Self::Exited,
            7 => Self::Removed,
            8 => Self::Invalid,
            other => Self::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositStatus {
    Unknown,
    Pending,
    Verified,
    Other(u8),
}

impl From<u8> for DepositStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Unknown,
            1 => Self::Pending,
            2 => Self::Verified,
            other => Self::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepositData {
    pub slot: u64,
    pub amount_gwei: U256,
    pub pub_key_hash: Hash256,
    pub status: DepositStatus,
    pub deposit_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatorData {
    pub state: ValidatorState,
    pub index: u64,
}

/// Read-only view of the strategy's bookkeeping
pub trait StrategyReader: Send + Sync {
    fn snapped_balance(&self) -> impl Future<Output = Result<SnappedBalance, ContractError>> + Send;

    fn verified_validators(
        &self,
    ) -> impl Future<Output = Result<Vec<StrategyValidator>, ContractError>> + Send;

    fn pending_deposits(
        &self,
    ) -> impl Future<Output = Result<Vec<PendingDepositRecord>, ContractError>> + Send;

    fn deposit(
        &self,
        deposit_root: Hash256,
    ) -> impl Future<Output = Result<DepositData, ContractError>> + Send;

    fn validator(
        &self,
        pub_key_hash: Hash256,
    ) -> impl Future<Output = Result<ValidatorData, ContractError>> + Send;
}

/// [`StrategyReader`] over a JSON-RPC provider
#[derive(Clone)]
pub struct AlloyStrategyReader {
    strategy: StakingStrategy::StakingStrategyInstance<DynProvider>,
    view: StakingStrategyView::StakingStrategyViewInstance<DynProvider>,
}

impl AlloyStrategyReader {
    #[must_use]
    pub fn new(addresses: StrategyAddresses, provider: DynProvider) -> Self {
        Self {
            strategy: StakingStrategy::new(addresses.strategy, provider.clone()),
            view: StakingStrategyView::new(addresses.view, provider),
        }
    }
}

impl StrategyReader for AlloyStrategyReader {
    #[instrument(skip(self))]
    async fn snapped_balance(&self) -> Result<SnappedBalance, ContractError> {
        let snapped = self
            .strategy
            .snappedBalance()
            .call()
            .await
            .map_err(|e| ContractError::new("snappedBalance", e))?;

        Ok(SnappedBalance {
            block_root: snapped.blockRoot.0,
            timestamp: snapped.timestamp,
            eth_balance: snapped.ethBalance,
        })
    }

    #[instrument(skip(self))]
    async fn verified_validators(&self) -> Result<Vec<StrategyValidator>, ContractError> {
        let validators = self
            .view
            .getVerifiedValidators()
            .call()
            .await
            .map_err(|e| ContractError::new("getVerifiedValidators", e))?;

        debug!(count = validators.len(), "Read verified validators");
        Ok(validators.into_iter().map(StrategyValidator::from).collect())
    }

    #[instrument(skip(self))]
    async fn pending_deposits(&self) -> Result<Vec<PendingDepositRecord>, ContractError> {
        let deposits = self
            .view
            .getPendingDeposits()
            .call()
            .await
            .map_err(|e| ContractError::new("getPendingDeposits", e))?;

        debug!(count = deposits.len(), "Read strategy pending deposits");
        Ok(deposits
            .into_iter()
            .map(|d| PendingDepositRecord {
                deposit_root: d.pendingDepositRoot.0,
                pub_key_hash: d.pubKeyHash.0,
                amount_gwei: d.amountGwei,
                slot: d.slot,
            })
            .collect())
    }

    #[instrument(skip(self, deposit_root), fields(deposit_root = %FixedBytes::from(deposit_root)))]
    async fn deposit(&self, deposit_root: Hash256) -> Result<DepositData, ContractError> {
        let deposit = self
            .strategy
            .deposits(deposit_root.into())
            .call()
            .await
            .map_err(|e| ContractError::new("deposits", e))?;

        Ok(DepositData {
            slot: deposit.slot,
            amount_gwei: deposit.amountGwei,
            pub_key_hash: deposit.pubKeyHash.0,
            status: deposit.status.into(),
            deposit_index: deposit.depositIndex,
        })
    }

    #[instrument(skip(self, pub_key_hash), fields(pub_key_hash = %FixedBytes::from(pub_key_hash)))]
    async fn validator(&self, pub_key_hash: Hash256) -> Result<ValidatorData, ContractError> {
        let validator = self
            .strategy
            .validator(pub_key_hash.into())
            .call()
            .await
            .map_err(|e| ContractError::new("validator", e))?;

        Ok(ValidatorData {
            state: validator.state.into(),
            index: validator.index.to::<u64>(),
        })
    }
}

/// Encoded call to one of the strategy's state-changing functions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub method: &'static str,
    pub to: Address,
    pub data: Bytes,
}

impl ContractCall {
    fn new<C: SolCall>(to: Address, call: &C) -> Self {
        Self {
            method: C::SIGNATURE
                .split_once('(')
                .map_or(C::SIGNATURE, |(name, _)| name),
            to,
            data: call.abi_encode().into(),
        }
    }

    #[must_use]
    pub fn snap_balances(strategy: Address) -> Self {
        Self::new(strategy, &StakingStrategy::snapBalancesCall {})
    }

    #[must_use]
    pub fn verify_balances(
        strategy: Address,
        balance_proofs: StakingStrategy::BalanceProofs,
        pending_deposit_proofs: StakingStrategy::PendingDepositProofs,
    ) -> Self {
        Self::new(
            strategy,
            &StakingStrategy::verifyBalancesCall {
                balanceProofs: balance_proofs,
                pendingDepositProofsData: pending_deposit_proofs,
            },
        )
    }

    #[must_use]
    pub fn verify_deposit(
        strategy: Address,
        pending_deposit_root: Hash256,
        deposit_processed_slot: u64,
        first_pending_deposit: &FirstPendingDepositProof,
        withdrawable_epoch: &WithdrawableEpochProof,
    ) -> Self {
        Self::new(
            strategy,
            &StakingStrategy::verifyDepositCall {
                pendingDepositRoot: pending_deposit_root.into(),
                depositProcessedSlot: deposit_processed_slot,
                firstPendingDeposit: StakingStrategy::FirstPendingDeposit {
                    slot: first_pending_deposit.slot,
                    proof: proof_bytes(&first_pending_deposit.bundle),
                },
                strategyValidatorData: StakingStrategy::StrategyValidatorData {
                    withdrawableEpoch: withdrawable_epoch.withdrawable_epoch,
                    withdrawableEpochProof: proof_bytes(&withdrawable_epoch.bundle),
                },
            },
        )
    }
}

#[must_use]
pub fn proof_bytes(bundle: &ProofBundle) -> Bytes {
    Bytes::copy_from_slice(&bundle.proof)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proof_gen::GeneralizedIndex;

    #[test]
    fn test_state_decoding() {
        assert_eq!(ValidatorState::from(1), ValidatorState::Pending);
        assert_eq!(ValidatorState::from(3), ValidatorState::Verified);
        assert_eq!(ValidatorState::from(42), ValidatorState::Unknown(42));
        assert_eq!(DepositStatus::from(1), DepositStatus::Pending);
        assert_eq!(DepositStatus::from(2), DepositStatus::Verified);
        assert_eq!(DepositStatus::from(9), DepositStatus::Other(9));
    }

    #[test]
    fn test_verified_validator_decoding() {
        let validators = vec![StakingStrategyView::VerifiedValidator {
            pubKeyHash: FixedBytes::from([0xaa; 32]),
            index: 17,
            state: 3,
        }];
        let encoded = StakingStrategyView::getVerifiedValidatorsCall::abi_encode_returns(&validators);
        // offset, length, then three words per element
        assert_eq!(encoded.len(), 5 * 32);
        assert_eq!(encoded[5 * 32 - 1], 3);

        let decoded =
            StakingStrategyView::getVerifiedValidatorsCall::abi_decode_returns(&encoded).unwrap();
        let validator = StrategyValidator::from(decoded[0].clone());
        assert_eq!(validator.pub_key_hash, [0xaa; 32]);
        assert_eq!(validator.index, 17);
        assert_eq!(validator.state, ValidatorState::Verified);
    }

    #[test]
    fn test_snap_balances_call() {
        let call = ContractCall::snap_balances(Address::with_last_byte(1));
        assert_eq!(call.method, "snapBalances");
        assert_eq!(
            call.data.as_ref(),
            &StakingStrategy::snapBalancesCall::SELECTOR[..]
        );
    }

    #[test]
    fn test_verify_deposit_call_round_trips() {
        let bundle = ProofBundle {
            proof: vec![0x42; 64],
            generalized_index: GeneralizedIndex::new(6).unwrap(),
            root: [1; 32],
            leaf: [2; 32],
        };
        let first = FirstPendingDepositProof {
            bundle: bundle.clone(),
            slot: 1,
            is_empty: true,
        };
        let epoch = WithdrawableEpochProof {
            bundle,
            validator_index: 7,
            withdrawable_epoch: u64::MAX,
        };

        let call =
            ContractCall::verify_deposit(Address::with_last_byte(1), [9; 32], 123, &first, &epoch);
        assert_eq!(call.method, "verifyDeposit");

        let decoded = StakingStrategy::verifyDepositCall::abi_decode(&call.data).unwrap();
        assert_eq!(decoded.pendingDepositRoot, FixedBytes::from([9u8; 32]));
        assert_eq!(decoded.depositProcessedSlot, 123);
        assert_eq!(decoded.firstPendingDeposit.slot, 1);
        assert_eq!(decoded.firstPendingDeposit.proof.len(), 64);
        assert_eq!(decoded.strategyValidatorData.withdrawableEpoch, u64::MAX);
    }
}
