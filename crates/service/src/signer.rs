//! Transaction signers
//!
//! A transaction is either signed locally with the task executor's key or
//! handed unsigned to a relayer service that signs and broadcasts it.

use crate::config::{ConfigError, SignerConfig};
use crate::executor::GasParams;
use alloy::{
    network::{EthereumWallet, TransactionBuilder},
    primitives::{Address, Bytes, B256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Relayer rejected request with status {status}: {body}")]
    Relay { status: u16, body: String },

    #[error("Invalid relayer response: {0}")]
    InvalidResponse(String),

    #[error("RPC error: {0}")]
    Rpc(String),
}

/// Fields of the transaction the signer submits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxSubmission {
    pub to: Address,
    pub data: Bytes,
    pub gas: GasParams,
}

/// Signing capability, either a local key or a relayer
pub enum TxSigner {
    LocalKey {
        signer: PrivateKeySigner,
        provider: DynProvider,
    },
    RelayService(RelayClient),
}

impl TxSigner {
    /// Build the signer described by `config`, sending through `rpc_url`
    /// when signing locally.
    pub fn connect(config: &SignerConfig, rpc_url: reqwest::Url) -> Result<Self, ConfigError> {
        match config {
            SignerConfig::LocalKey { private_key } => {
                // Parse private key (handle with or without 0x prefix)
                let key = private_key.strip_prefix("0x").unwrap_or(private_key);
                let signer: PrivateKeySigner = key
                    .parse()
                    .map_err(|e: alloy::signers::local::LocalSignerError| {
                        ConfigError::InvalidPrivateKey(e.to_string())
                    })?;

                let wallet = EthereumWallet::from(signer.clone());
                let provider = ProviderBuilder::new()
                    .wallet(wallet)
                    .connect_http(rpc_url)
                    .erased();

                info!(address = %signer.address(), "Using local key signer");
                Ok(Self::LocalKey { signer, provider })
            }
            SignerConfig::RelayService {
                url,
                api_key,
                api_secret,
            } => {
                info!(url = %url, "Using relayer signer");
                Ok(Self::RelayService(RelayClient::new(
                    url.clone(),
                    api_key.clone(),
                    api_secret.clone(),
                )))
            }
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LocalKey { .. } => "local-key",
            Self::RelayService(_) => "relayer",
        }
    }

    /// Address transactions are sent from
    pub async fn address(&self) -> Result<Address, SignerError> {
        match self {
            Self::LocalKey { signer, .. } => Ok(signer.address()),
            Self::RelayService(relay) => relay.address().await,
        }
    }

    /// Sign and broadcast, returning the transaction hash
    pub async fn send(&self, submission: &TxSubmission) -> Result<B256, SignerError> {
        match self {
            Self::LocalKey { signer, provider } => {
                let tx = TransactionRequest::default()
                    .with_from(signer.address())
                    .with_to(submission.to)
                    .with_input(submission.data.clone())
                    .with_gas_limit(submission.gas.gas_limit)
                    .with_max_fee_per_gas(submission.gas.max_fee_per_gas)
                    .with_max_priority_fee_per_gas(submission.gas.max_priority_fee_per_gas);

                let pending = provider
                    .send_transaction(tx)
                    .await
                    .map_err(|e| SignerError::Rpc(e.to_string()))?;
                Ok(*pending.tx_hash())
            }
            Self::RelayService(relay) => relay.send(submission).await,
        }
    }
}

impl fmt::Debug for TxSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalKey { signer, .. } => f
                .debug_struct("LocalKey")
                .field("address", &signer.address())
                .finish_non_exhaustive(),
            Self::RelayService(relay) => f.debug_tuple("RelayService").field(relay).finish(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayRequest {
    to: String,
    data: String,
    gas_limit: String,
    max_fee_per_gas: String,
    max_priority_fee_per_gas: String,
    speed: &'static str,
}

#[derive(Debug, Deserialize)]
struct RelayTxResponse {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct RelayerResponse {
    address: String,
}

/// Client for a transaction relayer authenticated with an API key pair
#[derive(Clone)]
pub struct RelayClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl RelayClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: String, api_secret: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            api_secret,
        }
    }

    /// Address of the relayer's signing account
    #[instrument(skip(self))]
    pub async fn address(&self) -> Result<Address, SignerError> {
        let url = format!("{}/relayer", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .header("X-Api-Secret", &self.api_secret)
            .send()
            .await?;
        let body: RelayerResponse = check_status(response).await?.json().await?;

        body.address
            .parse()
            .map_err(|_| SignerError::InvalidResponse(format!("bad address {}", body.address)))
    }

    #[instrument(skip(self, submission), fields(to = %submission.to))]
    pub async fn send(&self, submission: &TxSubmission) -> Result<B256, SignerError> {
        let request = RelayRequest {
            to: submission.to.to_string(),
            data: submission.data.to_string(),
            gas_limit: submission.gas.gas_limit.to_string(),
            max_fee_per_gas: submission.gas.max_fee_per_gas.to_string(),
            max_priority_fee_per_gas: submission.gas.max_priority_fee_per_gas.to_string(),
            speed: "fast",
        };

        let url = format!("{}/txs", self.base_url);
        debug!(url = %url, "Sending transaction to relayer");
        let response = self
            .client
            .post(&url)
            .header("X-Api-Key", &self.api_key)
            .header("X-Api-Secret", &self.api_secret)
            .json(&request)
            .send()
            .await?;
        let body: RelayTxResponse = check_status(response).await?.json().await?;

        body.hash
            .parse()
            .map_err(|_| SignerError::InvalidResponse(format!("bad transaction hash {}", body.hash)))
    }
}

impl fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SignerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SignerError::Relay {
        status: status.as_u16(),
        body,
    })
}
