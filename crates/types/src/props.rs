//! Node capability bitset.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::ops::BitOr;

/// Capability flags a node advertises, plus an 8-bit minimum block height.
///
/// Layout:
/// - bits 0..32: capability flags
/// - bits 32..40: minimum block height the node signs at
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct NodeProps(pub u64);

impl NodeProps {
    /// Empty set.
    pub const NONE: Self = Self(0);
    /// Delivers proofs.
    pub const PROOF: Self = Self(0x1);
    /// Serves multiple chains from one endpoint.
    pub const MULTICHAIN: Self = Self(0x2);
    /// Archive node.
    pub const ARCHIVE: Self = Self(0x4);
    /// Reachable over http.
    pub const HTTP: Self = Self(0x8);
    /// Supports binary encoding.
    pub const BINARY: Self = Self(0x10);
    /// Onion endpoint.
    pub const ONION: Self = Self(0x20);
    /// Signs block hashes on request.
    pub const SIGNER: Self = Self(0x40);
    /// Provides data.
    pub const DATA: Self = Self(0x80);
    /// Provides stats.
    pub const STATS: Self = Self(0x100);

    const FLAG_MASK: u64 = 0xFFFF_FFFF;

    /// Raw bits.
    pub fn bits(&self) -> u64 {
        self.0
    }

    /// True if every flag in `other` is set here. Ignores the block height byte.
    pub fn contains(&self, other: Self) -> bool {
        let wanted = other.0 & Self::FLAG_MASK;
        self.0 & wanted == wanted
    }

    /// Minimum block height encoded in bits 32..40.
    pub fn min_block_height(&self) -> u8 {
        ((self.0 >> 32) & 0xFF) as u8
    }

    /// Replace the minimum block height byte.
    pub fn with_min_block_height(self, height: u8) -> Self {
        Self((self.0 & !(0xFF << 32)) | ((height as u64) << 32))
    }

    /// Check whether a node advertising `self` satisfies the `required` filter.
    ///
    /// All required flags must be present. When the filter carries a minimum
    /// block height, the node's own value must not exceed it.
    pub fn satisfies(&self, required: Self) -> bool {
        if !self.contains(required) {
            return false;
        }
        match required.min_block_height() {
            0 => true,
            limit => self.min_block_height() <= limit,
        }
    }
}

impl BitOr for NodeProps {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for NodeProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeProps({:#x})", self.0)
    }
}

impl<'de> Deserialize<'de> for NodeProps {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        crate::serde_helpers::u64_or_hex(deserializer).map(Self)
    }
}
