//! Chain identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric chain identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl ChainId {
    /// Ethereum mainnet.
    pub const MAINNET: Self = Self(1);

    /// Goerli testnet.
    pub const GOERLI: Self = Self(5);

    /// Conservative block time used for a registry before anything better is known.
    ///
    /// Proof-of-work era Ethereum chains produce a block roughly every 15 seconds;
    /// everything else is assumed to be faster.
    pub fn default_block_time_secs(&self) -> u16 {
        match *self {
            Self::MAINNET | Self::GOERLI => 15,
            _ => 5,
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChainId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
