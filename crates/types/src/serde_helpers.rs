//! Deserializers for JSON-RPC style numbers.
//!
//! Nodes report quantities either as plain JSON numbers or as `0x`-prefixed
//! hex strings. These helpers accept both.

use serde::de::{self, Deserializer, Visitor};
use std::fmt;

/// Parse a `u64` from either a decimal string or a `0x`-prefixed hex string.
pub fn parse_u64(s: &str) -> Option<u64> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some("") => Some(0),
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

struct U64OrHex;

impl<'de> Visitor<'de> for U64OrHex {
    type Value = u64;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an unsigned integer or a 0x-prefixed hex string")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
        u64::try_from(v).map_err(|_| E::custom(format!("negative quantity {v}")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
        parse_u64(v).ok_or_else(|| E::custom(format!("invalid quantity {v:?}")))
    }
}

/// `#[serde(deserialize_with = "u64_or_hex")]`
pub fn u64_or_hex<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    deserializer.deserialize_any(U64OrHex)
}

/// `u32` variant of [`u64_or_hex`].
pub fn u32_or_hex<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let v = deserializer.deserialize_any(U64OrHex)?;
    u32::try_from(v).map_err(|_| de::Error::custom(format!("quantity {v} exceeds u32")))
}
