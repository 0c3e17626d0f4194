//! Staking Strategy Tasks
//!
//! Snapshots strategy balances and submits balance and deposit proofs built
//! from beacon chain state.

mod config;
mod contract;
mod executor;
mod signer;
mod workflows;

use alloy::providers::{Provider, ProviderBuilder};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::EnvArgs;
use contract::AlloyStrategyReader;
use executor::{AlloyBackend, TransactionExecutor};
use proof_gen::{BeaconClient, BlockId};
use signer::TxSigner;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workflows::{RunnerSettings, TaskRunner, VerifyDepositOutcome};

#[derive(Parser, Debug)]
#[command(name = "staking-tasks")]
#[command(about = "Balance and deposit verification tasks for the staking strategy")]
struct Cli {
    #[command(flatten)]
    env: EnvArgs,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Snapshot the strategy's balances
    SnapBalances {
        /// Estimate gas without sending
        #[arg(long)]
        dry_run: bool,
    },
    /// Prove validator balances and pending deposits against the last snapshot
    VerifyBalances {
        #[arg(long)]
        dry_run: bool,
    },
    /// Prove that the strategy's processed deposits have left the queue
    VerifyDeposit {
        #[arg(long)]
        dry_run: bool,
    },
    /// Print a validator public key proof
    ValidatorPubkey {
        #[arg(long)]
        validator_index: u64,

        /// head, finalized, a slot or a block root
        #[arg(long, default_value = "head")]
        block_id: BlockId,
    },
}

impl Command {
    fn dry_run(&self) -> bool {
        match self {
            Self::SnapBalances { dry_run }
            | Self::VerifyBalances { dry_run }
            | Self::VerifyDeposit { dry_run } => *dry_run,
            Self::ValidatorPubkey { .. } => true,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(filter)
            .init();
    }

    if let Command::ValidatorPubkey {
        validator_index,
        block_id,
    } = cli.command
    {
        let beacon = BeaconClient::new(cli.env.beacon_url()?);
        let proof = workflows::validator_pubkey_proof(&beacon, block_id, validator_index).await?;
        println!("{}", serde_json::to_string_pretty(&proof)?);
        return Ok(());
    }

    let dry_run = cli.command.dry_run();
    let rpc_url = cli.env.rpc_url()?;
    let provider = ProviderBuilder::new().connect_http(rpc_url).erased();
    let chain_id = provider
        .get_chain_id()
        .await
        .context("Failed to query chain id")?;
    let config = cli.env.resolve(chain_id, dry_run)?;
    let now = u64::try_from(chrono::Utc::now().timestamp()).context("Clock before 1970")?;

    tracing::info!(
        network = %config.network,
        chain_id = config.network.chain_id(),
        current_slot = ?config.network.slot_at(now),
        strategy = %config.addresses.strategy,
        beacon_url = %config.beacon_url,
        dry_run,
        "Starting task"
    );

    let signer = config
        .signer
        .as_ref()
        .map(|signer| TxSigner::connect(signer, config.rpc_url.clone()))
        .transpose()?;
    if let Some(signer) = &signer {
        tracing::info!(signer = signer.kind(), "Using transaction signer");
    }

    let backend = AlloyBackend::new(provider.clone(), signer).await?;
    if let Some(sender) = backend.sender() {
        tracing::info!(%sender, "Sending from");
    }
    if !dry_run {
        backend.check_sender_balance().await?;
    }

    let runner = TaskRunner::new(
        RunnerSettings {
            strategy: config.addresses.strategy,
            snap_delay_secs: config.snap_delay_secs,
        },
        AlloyStrategyReader::new(config.addresses, provider),
        BeaconClient::new(config.beacon_url.clone()),
        TransactionExecutor::new(backend, config.network, config.max_gas_price_gwei),
    );

    match cli.command {
        Command::SnapBalances { .. } => {
            let outcome = runner.snap_balances(now, dry_run).await?;
            tracing::info!(?outcome, "Snap balances finished");
        }
        Command::VerifyBalances { .. } => {
            let outcome = runner.verify_balances(dry_run).await?;
            tracing::info!(?outcome, "Verify balances finished");
        }
        Command::VerifyDeposit { .. } => {
            let outcome = runner.verify_deposit(now, dry_run).await?;
            report_deposits(&outcome)?;
        }
        Command::ValidatorPubkey { .. } => {}
    }

    Ok(())
}

fn report_deposits(outcome: &VerifyDepositOutcome) -> Result<()> {
    let VerifyDepositOutcome::Processed { slot, results, .. } = outcome else {
        tracing::info!(?outcome, "Verify deposit finished");
        return Ok(());
    };

    for result in results {
        let deposit_root = proof_gen::to_hex(&result.deposit_root);
        match &result.outcome {
            workflows::DepositOutcome::Failed(e) => {
                tracing::error!(%deposit_root, error = %e, "Deposit verification failed")
            }
            outcome => tracing::info!(%deposit_root, ?outcome, "Deposit handled"),
        }
    }

    let failures = outcome.failures().count();
    if failures > 0 {
        bail!("{failures} of {} deposits failed verification at slot {slot}", results.len());
    }
    Ok(())
}
