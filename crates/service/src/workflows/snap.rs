//! Balance snapshot workflow

use super::{TaskError, TaskRunner};
use crate::contract::{ContractCall, StakingStrategy, StrategyReader};
use crate::executor::{find_event, TxBackend};
use alloy::primitives::{utils::format_ether, B256};
use proof_gen::BeaconSource;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapOutcome {
    /// The last snapshot is younger than the snap delay
    Skipped { last_snapshot: u64, next_allowed: u64 },
    DryRun,
    Submitted {
        tx_hash: B256,
        /// From the `BalancesSnapped` event, when present
        block_root: Option<B256>,
    },
}

impl<R, S, T> TaskRunner<R, S, T>
where
    R: StrategyReader,
    S: BeaconSource,
    T: TxBackend,
{
    /// Snapshot the strategy's balances unless the last snapshot is less than
    /// the snap delay old at `now` (unix seconds).
    #[instrument(skip(self))]
    pub async fn snap_balances(&self, now: u64, dry_run: bool) -> Result<SnapOutcome, TaskError> {
        let snapped = self.reader.snapped_balance().await?;
        let next_allowed = snapped
            .timestamp
            .saturating_add(self.settings.snap_delay_secs);

        if snapped.exists() && now < next_allowed {
            info!(
                last_snapshot = snapped.timestamp,
                next_allowed,
                wait_secs = next_allowed - now,
                "Last snapshot too recent, skipping"
            );
            return Ok(SnapOutcome::Skipped {
                last_snapshot: snapped.timestamp,
                next_allowed,
            });
        }

        let call = ContractCall::snap_balances(self.settings.strategy);
        let Some(report) = self.executor.execute(&call, dry_run).await? else {
            return Ok(SnapOutcome::DryRun);
        };

        let event = find_event::<StakingStrategy::BalancesSnapped>(&report.receipt, call.to);
        match &event {
            Some(snapped) => info!(
                block_root = %snapped.blockRoot,
                eth_balance = %format_ether(snapped.ethBalance),
                "Balances snapped"
            ),
            None => warn!(tx_hash = %report.tx_hash, "BalancesSnapped event not found in receipt"),
        }

        Ok(SnapOutcome::Submitted {
            tx_hash: report.tx_hash,
            block_root: event.map(|e| e.blockRoot),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::SnappedBalance;
    use crate::workflows::testing::{runner, FakeBackend, FakeBeacon, FakeReader, SNAP_DELAY};
    use alloy::primitives::U256;
    use alloy::sol_types::SolEvent;

    const T: u64 = 1_750_000_000;

    fn reader_snapped_at(timestamp: u64) -> FakeReader {
        FakeReader {
            snapped: SnappedBalance {
                block_root: [0x44; 32],
                timestamp,
                eth_balance: 1,
            },
            ..FakeReader::default()
        }
    }

    #[tokio::test]
    async fn test_skipped_just_before_delay() {
        let runner = runner(reader_snapped_at(T), FakeBeacon::empty(), FakeBackend::default());

        let outcome = runner.snap_balances(T + SNAP_DELAY - 1, false).await.unwrap();
        assert_eq!(
            outcome,
            SnapOutcome::Skipped {
                last_snapshot: T,
                next_allowed: T + SNAP_DELAY
            }
        );
        assert_eq!(runner.executor().backend().estimates(), 0);
        assert!(runner.executor().backend().sent().is_empty());
    }

    #[tokio::test]
    async fn test_submitted_at_delay() {
        let backend = FakeBackend::default();
        backend.emit(
            "snapBalances",
            StakingStrategy::BalancesSnapped {
                blockRoot: B256::repeat_byte(0x55),
                ethBalance: U256::from(64u64),
            }
            .encode_log_data(),
        );
        let runner = runner(reader_snapped_at(T), FakeBeacon::empty(), backend);

        let outcome = runner.snap_balances(T + SNAP_DELAY, false).await.unwrap();
        let SnapOutcome::Submitted { block_root, .. } = outcome else {
            panic!("expected submission, got {outcome:?}");
        };
        assert_eq!(block_root, Some(B256::repeat_byte(0x55)));

        let sent = runner.executor().backend().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.method, "snapBalances");
    }

    #[tokio::test]
    async fn test_first_snapshot_and_missing_event() {
        let runner = runner(reader_snapped_at(0), FakeBeacon::empty(), FakeBackend::default());

        let outcome = runner.snap_balances(SNAP_DELAY / 2, false).await.unwrap();
        assert!(matches!(
            outcome,
            SnapOutcome::Submitted {
                block_root: None,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_dry_run() {
        let runner = runner(reader_snapped_at(T), FakeBeacon::empty(), FakeBackend::default());

        let outcome = runner.snap_balances(T + 10 * SNAP_DELAY, true).await.unwrap();
        assert_eq!(outcome, SnapOutcome::DryRun);
        assert_eq!(runner.executor().backend().estimates(), 1);
        assert!(runner.executor().backend().sent().is_empty());
    }
}
