//! Task configuration
//!
//! Environment-sourced settings, validated once into a [`TaskConfig`] that is
//! handed to the workflows.

use alloy::primitives::{Address, B256};
use clap::Args;
use proof_gen::preset::SECONDS_PER_SLOT;
use thiserror::Error;

/// Default minimum age of the last snapshot before a new one is taken:
/// 35 slots of finality delay plus a 10 second buffer.
pub const DEFAULT_SNAP_DELAY_SECS: u64 = 35 * SECONDS_PER_SLOT + 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is a required environment variable")]
    Missing(&'static str),

    #[error("{var} is not a valid address: {value}")]
    InvalidAddress { var: &'static str, value: String },

    #[error("{var} is not a valid URL: {value}")]
    InvalidUrl { var: &'static str, value: String },

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid network with chain id {0}. Must be Mainnet or Hoodi")]
    UnsupportedChain(u64),

    #[error("Either TASK_EXECUTOR_PRIVATE_KEY or RELAYER_URL with RELAYER_API_KEY and RELAYER_API_SECRET is required")]
    NoSigner,
}

/// Execution networks the strategy is deployed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Hoodi,
}

impl Network {
    pub fn from_chain_id(chain_id: u64) -> Result<Self, ConfigError> {
        match chain_id {
            1 => Ok(Self::Mainnet),
            560_048 => Ok(Self::Hoodi),
            other => Err(ConfigError::UnsupportedChain(other)),
        }
    }

    #[must_use]
    pub fn chain_id(self) -> u64 {
        match self {
            Self::Mainnet => 1,
            Self::Hoodi => 560_048,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Hoodi => "hoodi",
        }
    }

    /// Beacon chain genesis time in seconds
    #[must_use]
    pub fn beacon_genesis_time(self) -> u64 {
        match self {
            // Tue Dec 01 2020 12:00:23 UTC
            Self::Mainnet => 1_606_824_023,
            // Mon Mar 17 2025 12:10:00 UTC
            Self::Hoodi => 1_742_213_400,
        }
    }

    /// Beacon slot whose start time is `timestamp`, if after genesis
    #[must_use]
    pub fn slot_at(self, timestamp: u64) -> Option<u64> {
        timestamp
            .checked_sub(self.beacon_genesis_time())
            .map(|elapsed| elapsed / SECONDS_PER_SLOT)
    }

    #[must_use]
    pub fn explorer_url(self) -> &'static str {
        match self {
            Self::Mainnet => "https://etherscan.io",
            Self::Hoodi => "https://hoodi.etherscan.io",
        }
    }

    #[must_use]
    pub fn tx_url(self, tx_hash: B256) -> String {
        format!("{}/tx/{tx_hash}", self.explorer_url())
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Strategy proxy and its read-only view contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyAddresses {
    pub strategy: Address,
    pub view: Address,
}

/// How transactions get signed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerConfig {
    LocalKey {
        private_key: String,
    },
    RelayService {
        url: String,
        api_key: String,
        api_secret: String,
    },
}

#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub network: Network,
    pub rpc_url: reqwest::Url,
    pub beacon_url: String,
    pub addresses: StrategyAddresses,
    /// Ceiling on buffered max fee plus priority fee, in gwei
    pub max_gas_price_gwei: Option<u64>,
    pub signer: Option<SignerConfig>,
    pub snap_delay_secs: u64,
}

/// Environment variables read by every task
#[derive(Args, Debug, Clone, Default)]
pub struct EnvArgs {
    /// Execution layer JSON-RPC URL
    #[arg(long, env = "PROVIDER_URL")]
    pub provider_url: Option<String>,

    /// Beacon node REST API URL
    #[arg(long, env = "BEACON_PROVIDER_URL")]
    pub beacon_provider_url: Option<String>,

    /// Mainnet staking strategy proxy
    #[arg(long, env = "STAKING_STRATEGY_PROXY")]
    pub strategy_proxy: Option<String>,

    /// Mainnet staking strategy view
    #[arg(long, env = "STAKING_STRATEGY_VIEW")]
    pub strategy_view: Option<String>,

    /// Hoodi staking strategy proxy
    #[arg(long, env = "STAKING_STRATEGY_HOODI_PROXY")]
    pub hoodi_strategy_proxy: Option<String>,

    /// Hoodi staking strategy view
    #[arg(long, env = "STAKING_STRATEGY_HOODI_VIEW")]
    pub hoodi_strategy_view: Option<String>,

    /// Max gas price in Gwei
    #[arg(long, env = "MAX_GAS_PRICE_GWEI")]
    pub max_gas_price_gwei: Option<u64>,

    /// Private key for transaction signing (hex, 0x prefix optional)
    #[arg(long, env = "TASK_EXECUTOR_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Transaction relayer URL
    #[arg(long, env = "RELAYER_URL")]
    pub relayer_url: Option<String>,

    #[arg(long, env = "RELAYER_API_KEY", hide_env_values = true)]
    pub relayer_api_key: Option<String>,

    #[arg(long, env = "RELAYER_API_SECRET", hide_env_values = true)]
    pub relayer_api_secret: Option<String>,

    /// Minimum seconds between balance snapshots
    #[arg(long, env = "SNAP_DELAY_SECS", default_value_t = DEFAULT_SNAP_DELAY_SECS)]
    pub snap_delay_secs: u64,
}

impl EnvArgs {
    /// Execution RPC URL, required before anything else can be resolved
    pub fn rpc_url(&self) -> Result<reqwest::Url, ConfigError> {
        let value = self
            .provider_url
            .as_deref()
            .ok_or(ConfigError::Missing("PROVIDER_URL"))?;
        value.parse().map_err(|_| ConfigError::InvalidUrl {
            var: "PROVIDER_URL",
            value: value.to_string(),
        })
    }

    pub fn beacon_url(&self) -> Result<String, ConfigError> {
        self.beacon_provider_url
            .clone()
            .ok_or(ConfigError::Missing("BEACON_PROVIDER_URL"))
    }

    /// Validate everything against the network reported by the RPC.
    ///
    /// A signer is only mandatory when transactions will be sent.
    pub fn resolve(&self, chain_id: u64, dry_run: bool) -> Result<TaskConfig, ConfigError> {
        let network = Network::from_chain_id(chain_id)?;
        let rpc_url = self.rpc_url()?;
        let beacon_url = self.beacon_url()?;

        let addresses = match network {
            Network::Mainnet => StrategyAddresses {
                strategy: parse_address("STAKING_STRATEGY_PROXY", self.strategy_proxy.as_deref())?,
                view: parse_address("STAKING_STRATEGY_VIEW", self.strategy_view.as_deref())?,
            },
            Network::Hoodi => StrategyAddresses {
                strategy: parse_address(
                    "STAKING_STRATEGY_HOODI_PROXY",
                    self.hoodi_strategy_proxy.as_deref(),
                )?,
                view: parse_address(
                    "STAKING_STRATEGY_HOODI_VIEW",
                    self.hoodi_strategy_view.as_deref(),
                )?,
            },
        };

        let signer = self.signer();
        if signer.is_none() && !dry_run {
            return Err(ConfigError::NoSigner);
        }

        Ok(TaskConfig {
            network,
            rpc_url,
            beacon_url,
            addresses,
            max_gas_price_gwei: self.max_gas_price_gwei,
            signer,
            snap_delay_secs: self.snap_delay_secs,
        })
    }

    /// Local key wins over the relayer when both are configured
    fn signer(&self) -> Option<SignerConfig> {
        if let Some(private_key) = non_empty(self.private_key.as_deref()) {
            return Some(SignerConfig::LocalKey {
                private_key: private_key.to_string(),
            });
        }
        match (
            non_empty(self.relayer_url.as_deref()),
            non_empty(self.relayer_api_key.as_deref()),
            non_empty(self.relayer_api_secret.as_deref()),
        ) {
            (Some(url), Some(api_key), Some(api_secret)) => Some(SignerConfig::RelayService {
                url: url.to_string(),
                api_key: api_key.to_string(),
                api_secret: api_secret.to_string(),
            }),
            _ => None,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_address(var: &'static str, value: Option<&str>) -> Result<Address, ConfigError> {
    let value = non_empty(value).ok_or(ConfigError::Missing(var))?;
    value.parse().map_err(|_| ConfigError::InvalidAddress {
        var,
        value: value.to_string(),
    })
}
