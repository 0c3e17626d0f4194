//! Shared Types
//!
//! Hash aliases, preset tree depths, fork names and the strategy contract's
//! view of a pending deposit.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 32-byte SHA-256 node value
pub type Hash256 = [u8; 32];

/// Epoch value for "never" (validator not exiting / not withdrawable)
pub const FAR_FUTURE_EPOCH: u64 = u64::MAX;

/// Mainnet preset constants (Electra/Fulu)
pub mod preset {
    /// Maximum number of validators (2^40)
    pub const VALIDATOR_REGISTRY_LIMIT: usize = 1 << 40;
    /// Maximum pending deposits (2^27)
    pub const PENDING_DEPOSITS_LIMIT: usize = 1 << 27;
    /// Maximum pending partial withdrawals (2^27)
    pub const PENDING_PARTIAL_WITHDRAWALS_LIMIT: usize = 1 << 27;
    /// Maximum pending consolidations (2^18)
    pub const PENDING_CONSOLIDATIONS_LIMIT: usize = 1 << 18;
    /// Block/state roots history length
    pub const SLOTS_PER_HISTORICAL_ROOT: usize = 8192;
    /// Historical roots / summaries limit (2^24)
    pub const HISTORICAL_ROOTS_LIMIT: usize = 1 << 24;
    /// `EPOCHS_PER_ETH1_VOTING_PERIOD * SLOTS_PER_EPOCH`
    pub const ETH1_DATA_VOTES_BOUND: usize = 2048;
    /// RANDAO mixes vector length
    pub const EPOCHS_PER_HISTORICAL_VECTOR: usize = 65_536;
    /// Slashings vector length
    pub const EPOCHS_PER_SLASHINGS_VECTOR: usize = 8192;
    /// Sync committee size
    pub const SYNC_COMMITTEE_SIZE: usize = 512;
    /// `(MIN_SEED_LOOKAHEAD + 1) * SLOTS_PER_EPOCH` (Fulu)
    pub const PROPOSER_LOOKAHEAD_LENGTH: usize = 64;
    /// Slots per epoch
    pub const SLOTS_PER_EPOCH: u64 = 32;
    /// Seconds per slot
    pub const SECONDS_PER_SLOT: u64 = 12;
}

/// Depths of the list data trees that proofs descend into.
///
/// A list of limit `N` composite elements has a data tree of depth `log2(N)`.
/// Balances are packed four `u64` values per chunk, so their data tree depth is
/// `log2(N / 4)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeDepths {
    pub validators: u32,
    pub balances: u32,
    pub pending_deposits: u32,
}

impl TreeDepths {
    /// Mainnet depths: 2^40 validators, 2^38 balance chunks, 2^27 pending deposits
    pub const MAINNET: Self = Self::from_limits(
        preset::VALIDATOR_REGISTRY_LIMIT,
        preset::PENDING_DEPOSITS_LIMIT,
    );

    /// Derive depths from the (power of two) list limits of a state type.
    #[must_use]
    pub const fn from_limits(validator_limit: usize, pending_deposits_limit: usize) -> Self {
        let validators = validator_limit.trailing_zeros();
        Self {
            validators,
            balances: validators.saturating_sub(2),
            pending_deposits: pending_deposits_limit.trailing_zeros(),
        }
    }
}

/// Consensus fork of a fetched beacon state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForkName {
    Electra,
    Fulu,
}

impl ForkName {
    /// Number of top-level fields in this fork's `BeaconState`
    #[must_use]
    pub const fn state_field_count(self) -> usize {
        match self {
            Self::Electra => 37,
            Self::Fulu => 38,
        }
    }
}

impl fmt::Display for ForkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Electra => f.write_str("electra"),
            Self::Fulu => f.write_str("fulu"),
        }
    }
}

impl FromStr for ForkName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "electra" => Ok(Self::Electra),
            "fulu" => Ok(Self::Fulu),
            other => Err(format!("unsupported consensus version: {other}")),
        }
    }
}

/// A deposit the strategy contract has recorded and not yet verified.
///
/// `deposit_root` is the hash tree root of the beacon chain `PendingDeposit`
/// the contract expects to see in the deposit queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingDepositRecord {
    #[serde(with = "hex_bytes32")]
    pub deposit_root: Hash256,
    #[serde(with = "hex_bytes32")]
    pub pub_key_hash: Hash256,
    pub amount_gwei: u64,
    pub slot: u64,
}

/// Format a 32-byte value as `0x`-prefixed hex
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

// Hex encoding helpers for serde
pub mod hex_bytes32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::to_hex(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

/// Hex encoding for arbitrary byte strings (proof bytes)
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::to_hex(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mainnet_depths() {
        assert_eq!(
            TreeDepths::MAINNET,
            TreeDepths {
                validators: 40,
                balances: 38,
                pending_deposits: 27,
            }
        );
    }

    #[test]
    fn test_depths_from_small_limits() {
        let depths = TreeDepths::from_limits(1024, 64);
        assert_eq!(depths.validators, 10);
        assert_eq!(depths.balances, 8);
        assert_eq!(depths.pending_deposits, 6);
    }

    #[test]
    fn test_fork_name_parse() {
        assert_eq!("electra".parse::<ForkName>().unwrap(), ForkName::Electra);
        assert_eq!("Fulu".parse::<ForkName>().unwrap(), ForkName::Fulu);
        assert!("deneb".parse::<ForkName>().is_err());
    }

    #[test]
    fn test_pending_deposit_record_json_roundtrip() {
        let record = PendingDepositRecord {
            deposit_root: [0xaa; 32],
            pub_key_hash: [0xbb; 32],
            amount_gwei: 32_000_000_000,
            slot: 1234,
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains(&format!("0x{}", "aa".repeat(32))));
        let decoded: PendingDepositRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, record);
    }
}
