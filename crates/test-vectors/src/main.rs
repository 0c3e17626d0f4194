//! Test Vector Generator
//!
//! Builds synthetic beacon states and writes every proof shape the staking
//! strategy verifies as JSON fixtures for the Solidity tests.

use anyhow::{ensure, Result};
use clap::Parser;
use proof_gen::synthetic::SyntheticState;
use proof_gen::{
    to_hex, BalanceProof, BeaconBlockView, DepositReconciler, FirstPendingDepositProof,
    PendingDepositProof, PendingDepositRecord, ProofBundle, ProofGenerator, PubKeyProof,
    WithdrawableEpochProof,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const MAX_EFFECTIVE_BALANCE_GWEI: u64 = 32_000_000_000;

#[derive(Parser, Debug)]
#[command(name = "generate-test-vectors")]
#[command(about = "Generate beacon proof fixtures for the staking strategy Solidity tests")]
struct Args {
    /// Output directory for test vectors
    #[arg(short, long, default_value = "../../contracts/test-vectors")]
    output: PathBuf,

    /// Number of test validators to generate
    #[arg(long, default_value = "10")]
    num_validators: u64,

    /// Number of pending deposits left in the beacon queue
    #[arg(long, default_value = "3")]
    num_pending_deposits: u64,

    /// Slot of the synthetic state
    #[arg(long, default_value = "9000")]
    slot: u64,
}

/// Test vector file format
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TestVectorFile {
    slot: u64,
    block_root: String,
    /// Queue head of the populated state
    first_pending_deposit: FirstPendingDepositProof,
    /// Queue head proof when the queue is empty
    empty_queue: EmptyQueueVector,
    pending_deposits_container: ProofBundle,
    pending_deposits: Vec<PendingDepositProof>,
    balances_container: ProofBundle,
    balances: Vec<BalanceProof>,
    withdrawable_epochs: Vec<WithdrawableEpochProof>,
    pubkeys: Vec<PubKeyProof>,
    reconciliation: ReconciliationVector,
    /// Proofs that must be rejected
    invalid_proofs: Vec<InvalidProof>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmptyQueueVector {
    block_root: String,
    proof: FirstPendingDepositProof,
}

/// Strategy deposits split against the beacon queue
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReconciliationVector {
    contract_deposits: Vec<PendingDepositRecord>,
    matched: Vec<(String, u32)>,
    processed: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InvalidProof {
    description: String,
    bundle: ProofBundle,
}

fn build_block(args: &Args) -> Result<(BeaconBlockView, Vec<PendingDepositRecord>)> {
    let mut synthetic = SyntheticState::new(args.slot);
    for i in 0..args.num_validators {
        // every third validator is on its way out
        synthetic.add_validator(MAX_EFFECTIVE_BALANCE_GWEI + i * 1_000_000, i % 3 == 2);
    }

    let mut records = Vec::new();
    for i in 0..args.num_pending_deposits {
        let amount = 1_000_000_000 * (i + 1);
        let slot = args.slot.saturating_sub(100).saturating_add(i);
        let validator_index = i % args.num_validators.max(1);
        let deposit_root = synthetic.add_pending_deposit(validator_index, amount, slot);
        records.push(PendingDepositRecord {
            deposit_root,
            pub_key_hash: [0u8; 32],
            amount_gwei: amount,
            slot,
        });
    }

    // One deposit the strategy still tracks but the beacon chain already applied
    let processed = SyntheticState::pending_deposit(0, 7_000_000_000, args.slot.saturating_sub(500));
    records.push(PendingDepositRecord {
        deposit_root: proof_gen::view::pending_deposit_root(&processed)?,
        pub_key_hash: [0u8; 32],
        amount_gwei: 7_000_000_000,
        slot: args.slot.saturating_sub(500),
    });

    Ok((synthetic.build()?, records))
}

fn tampered(bundle: &ProofBundle, description: &str) -> InvalidProof {
    let mut bundle = bundle.clone();
    if let Some(byte) = bundle.proof.first_mut() {
        *byte ^= 0x01;
    }
    InvalidProof {
        description: description.to_string(),
        bundle,
    }
}

fn generate(args: &Args) -> Result<TestVectorFile> {
    ensure!(args.num_validators > 0, "need at least one validator");

    let (block, records) = build_block(args)?;
    let generator = ProofGenerator::new(&block);

    let pending_deposits = (0..block.state().pending_deposits().len() as u32)
        .map(|i| generator.pending_deposit(i))
        .collect::<Result<Vec<_>, _>>()?;
    let balances = (0..args.num_validators)
        .map(|i| generator.validator_balance(i))
        .collect::<Result<Vec<_>, _>>()?;
    let withdrawable_epochs = (0..args.num_validators)
        .map(|i| generator.validator_withdrawable_epoch(i))
        .collect::<Result<Vec<_>, _>>()?;
    let pubkeys = (0..args.num_validators)
        .map(|i| generator.validator_pubkey(i))
        .collect::<Result<Vec<_>, _>>()?;

    let reconciliation =
        DepositReconciler::reconcile(&records, block.state().pending_deposit_roots())?;

    let empty_block = SyntheticState::new(args.slot).build()?;
    let empty_queue = EmptyQueueVector {
        block_root: to_hex(&empty_block.root()),
        proof: ProofGenerator::new(&empty_block).first_pending_deposit_slot()?,
    };

    let first_pending_deposit = generator.first_pending_deposit_slot()?;
    let mut invalid_proofs = vec![tampered(
        &first_pending_deposit.bundle,
        "first pending deposit proof with a flipped witness bit",
    )];
    if let Some(balance) = balances.first() {
        invalid_proofs.push(tampered(
            &balance.bundle,
            "balance proof with a flipped witness bit",
        ));
    }
    let mut wrong_leaf = withdrawable_epochs[0].bundle.clone();
    wrong_leaf.leaf[0] ^= 0xff;
    invalid_proofs.push(InvalidProof {
        description: "withdrawable epoch proof for a different epoch".to_string(),
        bundle: wrong_leaf,
    });

    for proof in &invalid_proofs {
        ensure!(
            proof.bundle.verify().is_err(),
            "invalid proof unexpectedly verifies: {}",
            proof.description
        );
    }

    Ok(TestVectorFile {
        slot: block.slot(),
        block_root: to_hex(&block.root()),
        first_pending_deposit,
        empty_queue,
        pending_deposits_container: generator.pending_deposits_container()?,
        pending_deposits,
        balances_container: generator.balances_container()?,
        balances,
        withdrawable_epochs,
        pubkeys,
        reconciliation: ReconciliationVector {
            contract_deposits: records,
            matched: reconciliation
                .matched
                .iter()
                .map(|(record, index)| (to_hex(&record.deposit_root), *index))
                .collect(),
            processed: reconciliation
                .processed
                .iter()
                .map(|record| to_hex(&record.deposit_root))
                .collect(),
        },
        invalid_proofs,
    })
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    tracing::info!(
        output = %args.output.display(),
        validators = args.num_validators,
        pending_deposits = args.num_pending_deposits,
        slot = args.slot,
        "Generating test vectors"
    );

    let vectors = generate(&args)?;

    std::fs::create_dir_all(&args.output)?;
    let output_path = args.output.join("test_vectors.json");
    let json = serde_json::to_string_pretty(&vectors)?;
    std::fs::write(&output_path, json)?;

    tracing::info!(
        path = %output_path.display(),
        block_root = %vectors.block_root,
        processed = vectors.reconciliation.processed.len(),
        "Wrote test vectors"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Args {
        Args {
            output: PathBuf::from("unused"),
            num_validators: 5,
            num_pending_deposits: 2,
            slot: 9000,
        }
    }

    #[test]
    fn test_generated_proofs_verify() {
        let vectors = generate(&args()).unwrap();

        assert_eq!(vectors.pending_deposits.len(), 2);
        assert_eq!(vectors.balances.len(), 5);
        assert!(!vectors.first_pending_deposit.is_empty);
        assert!(vectors.empty_queue.proof.is_empty);
        assert_eq!(vectors.empty_queue.proof.slot, 1);

        vectors.first_pending_deposit.bundle.verify().unwrap();
        vectors.empty_queue.proof.bundle.verify().unwrap();
        vectors.pending_deposits_container.verify().unwrap();
        vectors.balances_container.verify().unwrap();
        for proof in &vectors.pending_deposits {
            proof.bundle.verify().unwrap();
        }
        for proof in &vectors.balances {
            proof.bundle.verify().unwrap();
        }
        for proof in &vectors.withdrawable_epochs {
            proof.bundle.verify().unwrap();
        }
        for proof in &vectors.pubkeys {
            proof.bundle.verify().unwrap();
        }
    }

    #[test]
    fn test_reconciliation_vector() {
        let vectors = generate(&args()).unwrap();

        assert_eq!(vectors.reconciliation.contract_deposits.len(), 3);
        assert_eq!(vectors.reconciliation.matched.len(), 2);
        assert_eq!(vectors.reconciliation.matched[1].1, 1);
        assert_eq!(vectors.reconciliation.processed.len(), 1);
    }

    #[test]
    fn test_rejects_no_validators() {
        let args = Args {
            num_validators: 0,
            ..args()
        };
        assert!(generate(&args).is_err());
    }
}
