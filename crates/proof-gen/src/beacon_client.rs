//! Beacon API HTTP Client
//!
//! Fetches block headers and SSZ-encoded states from a beacon node and turns
//! them into [`BeaconBlockView`]s.

use crate::beacon_state::{mainnet, BeaconBlockHeader};
use crate::proof::ProofError;
use crate::types::{to_hex, ForkName, Hash256};
use crate::view::{BeaconBlockView, BeaconStateView};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, instrument};

/// Response header naming the fork of an SSZ state
const CONSENSUS_VERSION_HEADER: &str = "Eth-Consensus-Version";

/// Errors from beacon API operations
#[derive(Debug, Error)]
pub enum BeaconClientError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("{resource} not found for {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("Unsupported consensus version: {0}")]
    UnsupportedFork(String),

    #[error("SSZ decoding failed: {0}")]
    Decode(String),

    #[error(transparent)]
    Proof(#[from] ProofError),
}

/// Block identifier accepted by the beacon API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockId {
    Head,
    Finalized,
    Slot(u64),
    Root(Hash256),
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Head => f.write_str("head"),
            Self::Finalized => f.write_str("finalized"),
            Self::Slot(slot) => write!(f, "{slot}"),
            Self::Root(root) => f.write_str(&to_hex(root)),
        }
    }
}

impl FromStr for BlockId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "head" => Ok(Self::Head),
            "finalized" => Ok(Self::Finalized),
            _ if s.starts_with("0x") => parse_hex32(s)
                .map(Self::Root)
                .map_err(|e| e.to_string()),
            _ => s
                .parse()
                .map(Self::Slot)
                .map_err(|_| format!("invalid block id: {s}")),
        }
    }
}

/// Source of beacon blocks with their state trees
pub trait BeaconSource: Send + Sync {
    fn fetch_block(
        &self,
        block_id: BlockId,
    ) -> impl Future<Output = Result<BeaconBlockView, BeaconClientError>> + Send;
}

/// Client for interacting with the Beacon API
#[derive(Debug, Clone)]
pub struct BeaconClient {
    client: Client,
    base_url: String,
}

impl BeaconClient {
    /// Create a new beacon client
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the beacon node (e.g., `http://localhost:5052`)
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Fetch beacon state as SSZ bytes together with its fork
    ///
    /// # Arguments
    /// * `state_id` - State identifier (slot, state root, "head", "finalized", etc.)
    ///
    /// # Errors
    /// Returns error if the request fails, the state is not found or the fork
    /// header is missing
    #[instrument(skip(self))]
    pub async fn get_state_ssz(
        &self,
        state_id: &str,
    ) -> Result<(ForkName, Vec<u8>), BeaconClientError> {
        let url = format!("{}/eth/v2/debug/beacon/states/{state_id}", self.base_url);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/octet-stream")
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(BeaconClientError::NotFound {
                resource: "State",
                id: state_id.to_string(),
            });
        }

        if !response.status().is_success() {
            return Err(BeaconClientError::InvalidResponse(format!(
                "Unexpected status: {}",
                response.status()
            )));
        }

        let version = response
            .headers()
            .get(CONSENSUS_VERSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                BeaconClientError::InvalidResponse(format!("Missing {CONSENSUS_VERSION_HEADER} header"))
            })?;
        let fork = version
            .parse::<ForkName>()
            .map_err(|_| BeaconClientError::UnsupportedFork(version.to_string()))?;

        Ok((fork, response.bytes().await?.to_vec()))
    }

    /// Fetch beacon block header
    ///
    /// # Arguments
    /// * `block_id` - Block identifier (slot, block root, "head", "finalized")
    ///
    /// # Errors
    /// Returns error if the request fails or header is not found
    #[instrument(skip(self), fields(block_id = %block_id))]
    pub async fn get_header(&self, block_id: BlockId) -> Result<BeaconBlockHeader, BeaconClientError> {
        let url = format!("{}/eth/v1/beacon/headers/{block_id}", self.base_url);

        let response = self.client.get(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(BeaconClientError::NotFound {
                resource: "Header",
                id: block_id.to_string(),
            });
        }

        if !response.status().is_success() {
            return Err(BeaconClientError::InvalidResponse(format!(
                "Unexpected status: {}",
                response.status()
            )));
        }

        #[derive(Deserialize)]
        struct HeaderResponse {
            data: HeaderData,
        }

        #[derive(Deserialize)]
        struct HeaderData {
            header: HeaderMessage,
        }

        #[derive(Deserialize)]
        struct HeaderMessage {
            message: BeaconBlockHeaderJson,
        }

        #[derive(Deserialize)]
        struct BeaconBlockHeaderJson {
            slot: String,
            proposer_index: String,
            parent_root: String,
            state_root: String,
            body_root: String,
        }

        let header_resp: HeaderResponse = response.json().await?;
        let msg = header_resp.data.header.message;

        Ok(BeaconBlockHeader {
            slot: msg.slot.parse().map_err(|e| {
                BeaconClientError::InvalidResponse(format!("Invalid slot: {e}"))
            })?,
            proposer_index: msg.proposer_index.parse().map_err(|e| {
                BeaconClientError::InvalidResponse(format!("Invalid proposer_index: {e}"))
            })?,
            parent_root: parse_hex32(&msg.parent_root)?,
            state_root: parse_hex32(&msg.state_root)?,
            body_root: parse_hex32(&msg.body_root)?,
        })
    }
}

impl BeaconSource for BeaconClient {
    /// Header, then the state it commits to (requested by state root), then
    /// the tree, verified against the header's `state_root`.
    #[instrument(skip(self), fields(block_id = %block_id))]
    async fn fetch_block(&self, block_id: BlockId) -> Result<BeaconBlockView, BeaconClientError> {
        let header = self.get_header(block_id).await?;
        let (fork, bytes) = self.get_state_ssz(&to_hex(&header.state_root)).await?;
        let slot = header.slot;

        // Decoding and hashing a mainnet state is CPU bound
        let block = tokio::task::spawn_blocking(move || {
            let state = decode_state(fork, &bytes)?;
            Ok::<_, BeaconClientError>(BeaconBlockView::new(header, state)?)
        })
        .await
        .map_err(|e| BeaconClientError::Decode(e.to_string()))??;

        info!(
            slot,
            %fork,
            block_root = %to_hex(&block.root()),
            validators = block.state().validators().len(),
            pending_deposits = block.state().pending_deposits().len(),
            "Fetched beacon block"
        );
        Ok(block)
    }
}

/// Decode a mainnet-preset state of the given fork into a view
pub fn decode_state(fork: ForkName, bytes: &[u8]) -> Result<BeaconStateView, BeaconClientError> {
    let view = match fork {
        ForkName::Electra => {
            let state: mainnet::ElectraBeaconState = ssz_rs::deserialize(bytes)
                .map_err(|e| BeaconClientError::Decode(e.to_string()))?;
            BeaconStateView::from_state(&state)?
        }
        ForkName::Fulu => {
            let state: mainnet::FuluBeaconState = ssz_rs::deserialize(bytes)
                .map_err(|e| BeaconClientError::Decode(e.to_string()))?;
            BeaconStateView::from_state(&state)?
        }
    };
    Ok(view)
}

fn parse_hex32(s: &str) -> Result<[u8; 32], BeaconClientError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s)
        .map_err(|e| BeaconClientError::InvalidResponse(format!("Invalid hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| BeaconClientError::InvalidResponse("Expected 32 bytes".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssz_rs::prelude::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn header_json(slot: u64, state_root: &Hash256) -> serde_json::Value {
        serde_json::json!({
            "data": {
                "root": to_hex(&[0x33; 32]),
                "canonical": true,
                "header": {
                    "message": {
                        "slot": slot.to_string(),
                        "proposer_index": "7",
                        "parent_root": to_hex(&[0x11; 32]),
                        "state_root": to_hex(state_root),
                        "body_root": to_hex(&[0x22; 32]),
                    },
                    "signature": format!("0x{}", "00".repeat(96)),
                }
            }
        })
    }

    #[test]
    fn test_parse_root() {
        let root = format!("0x{}", "ab".repeat(31) + "cd");
        let parsed = parse_hex32(&root).unwrap();
        assert_eq!(parsed[..31], [0xab; 31]);
        assert_eq!(parsed[31], 0xcd);
        assert_eq!(parse_hex32(&root[2..]).unwrap(), parsed);

        assert!(matches!(
            parse_hex32("0xabcd"),
            Err(BeaconClientError::InvalidResponse(_))
        ));
        assert!(parse_hex32("0xzz").is_err());
    }

    #[test]
    fn test_block_id_parse_and_display() {
        assert_eq!("head".parse::<BlockId>().unwrap(), BlockId::Head);
        assert_eq!("finalized".parse::<BlockId>().unwrap(), BlockId::Finalized);
        assert_eq!("12345".parse::<BlockId>().unwrap(), BlockId::Slot(12345));
        let root = BlockId::Root([0xab; 32]);
        assert_eq!(root.to_string().parse::<BlockId>().unwrap(), root);
        assert!("latest".parse::<BlockId>().is_err());
    }

    #[tokio::test]
    async fn test_get_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/eth/v1/beacon/headers/head"))
            .respond_with(ResponseTemplate::new(200).set_body_json(header_json(99, &[0x44; 32])))
            .mount(&server)
            .await;

        let client = BeaconClient::new(server.uri());
        let header = client.get_header(BlockId::Head).await.unwrap();
        assert_eq!(header.slot, 99);
        assert_eq!(header.proposer_index, 7);
        assert_eq!(header.state_root, [0x44; 32]);
    }

    #[tokio::test]
    async fn test_get_header_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/eth/v1/beacon/headers/5"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = BeaconClient::new(server.uri());
        let err = client.get_header(BlockId::Slot(5)).await.unwrap_err();
        assert!(matches!(err, BeaconClientError::NotFound { resource: "Header", .. }));
    }

    #[tokio::test]
    async fn test_state_requires_fork_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/eth/v2/debug/beacon/states/head"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4]))
            .mount(&server)
            .await;

        let client = BeaconClient::new(server.uri());
        let err = client.get_state_ssz("head").await.unwrap_err();
        assert!(matches!(err, BeaconClientError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_state_rejects_unknown_fork() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/eth/v2/debug/beacon/states/head"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(CONSENSUS_VERSION_HEADER, "deneb")
                    .set_body_bytes(vec![0u8; 4]),
            )
            .mount(&server)
            .await;

        let client = BeaconClient::new(server.uri());
        let err = client.get_state_ssz("head").await.unwrap_err();
        assert!(matches!(err, BeaconClientError::UnsupportedFork(v) if v == "deneb"));
    }

    #[tokio::test]
    async fn test_fetch_block_end_to_end() {
        let mut state = mainnet::ElectraBeaconState::default();
        state.slot = 1_000;
        state.balances.push(32_000_000_000);
        let state_root: Hash256 = state.hash_tree_root().unwrap().into();
        let bytes = ssz_rs::serialize(&state).unwrap();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/eth/v1/beacon/headers/finalized"))
            .respond_with(ResponseTemplate::new(200).set_body_json(header_json(1_000, &state_root)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/eth/v2/debug/beacon/states/{}", to_hex(&state_root))))
            .and(header("Accept", "application/octet-stream"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(CONSENSUS_VERSION_HEADER, "electra")
                    .set_body_bytes(bytes),
            )
            .mount(&server)
            .await;

        let client = BeaconClient::new(server.uri());
        let block = client.fetch_block(BlockId::Finalized).await.unwrap();
        assert_eq!(block.slot(), 1_000);
        assert_eq!(block.state().fork(), ForkName::Electra);
        assert_eq!(block.state().root(), state_root);
        assert_eq!(block.state().balances(), &[32_000_000_000]);
    }

    #[tokio::test]
    async fn test_fetch_block_detects_wrong_state() {
        let state = mainnet::ElectraBeaconState::default();
        let bytes = ssz_rs::serialize(&state).unwrap();
        let claimed_root = [0x99; 32];

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/eth/v1/beacon/headers/head"))
            .respond_with(ResponseTemplate::new(200).set_body_json(header_json(1, &claimed_root)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/eth/v2/debug/beacon/states/{}", to_hex(&claimed_root))))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(CONSENSUS_VERSION_HEADER, "electra")
                    .set_body_bytes(bytes),
            )
            .mount(&server)
            .await;

        let client = BeaconClient::new(server.uri());
        let err = client.fetch_block(BlockId::Head).await.unwrap_err();
        assert!(matches!(
            err,
            BeaconClientError::Proof(ProofError::StateRootMismatch { .. })
        ));
    }
}
