//! Binary snapshot of a registry for the cache store.
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! version       u8
//! contract      [u8; 20]
//! last_block    u64
//! count         u32
//! count × {
//!     address            [u8; 20]
//!     capacity           u32
//!     index              u32
//!     deposit            u64
//!     props              u64
//!     flags              u8      bit 0 blocked, bit 1 boot
//!     response_count     u32
//!     total_response_ms  u32
//!     blacklisted_until  u64
//!     url_len            u16
//!     url                [u8; url_len]
//! }
//! ```

use crate::registry::Registry;
use bytes::{Buf, BufMut};
use meshrpc_types::{Address, ChainId, Node, NodeProps, NodeWeight};
use thiserror::Error;

/// Current snapshot format.
pub const CACHE_VERSION: u8 = 1;

const FLAG_BLOCKED: u8 = 0x1;
const FLAG_BOOT: u8 = 0x2;

/// Fixed part of a node record.
const NODE_RECORD_LEN: usize = 20 + 4 + 4 + 8 + 8 + 1 + 4 + 4 + 8 + 2;

/// Errors decoding a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Written by another format version.
    #[error("cache version {found} does not match {expected}")]
    Version {
        /// Version byte found.
        found: u8,
        /// Version this build writes.
        expected: u8,
    },

    /// Input ended early.
    #[error("cache entry truncated")]
    Truncated,

    /// URL bytes are not UTF-8.
    #[error("cache entry has an invalid url")]
    InvalidUrl,

    /// Bytes left over after the last record.
    #[error("{0} trailing bytes in cache entry")]
    TrailingBytes(usize),
}

/// Cache key of a chain's registry.
pub fn cache_key(chain_id: ChainId) -> String {
    format!("nodelist_{}", chain_id.0)
}

/// Serialize the node and weight arrays.
pub fn encode(registry: &Registry) -> Vec<u8> {
    let url_bytes: usize = registry.nodes().iter().map(|n| n.url.len()).sum();
    let mut buf = Vec::with_capacity(1 + 20 + 8 + 4 + registry.len() * NODE_RECORD_LEN + url_bytes);

    buf.put_u8(CACHE_VERSION);
    buf.put_slice(registry.contract().as_bytes());
    buf.put_u64(registry.last_block());
    buf.put_u32(registry.len() as u32);

    for (node, weight) in registry.nodes().iter().zip(registry.weights()) {
        buf.put_slice(node.address.as_bytes());
        buf.put_u32(node.capacity);
        buf.put_u32(node.index);
        buf.put_u64(node.deposit);
        buf.put_u64(node.props.bits());
        let mut flags = 0;
        if node.blocked {
            flags |= FLAG_BLOCKED;
        }
        if node.boot {
            flags |= FLAG_BOOT;
        }
        buf.put_u8(flags);
        buf.put_u32(weight.response_count);
        buf.put_u32(weight.total_response_time);
        buf.put_u64(weight.blacklisted_until);
        // urls longer than u16::MAX are truncated at a char boundary
        let mut url_len = node.url.len().min(u16::MAX as usize);
        while !node.url.is_char_boundary(url_len) {
            url_len -= 1;
        }
        buf.put_u16(url_len as u16);
        buf.put_slice(&node.url.as_bytes()[..url_len]);
    }
    buf
}

fn need(buf: &[u8], len: usize) -> Result<(), CacheError> {
    if buf.remaining() < len {
        Err(CacheError::Truncated)
    } else {
        Ok(())
    }
}

fn read_address(buf: &mut &[u8]) -> Result<Address, CacheError> {
    need(*buf, Address::BYTES)?;
    let mut bytes = [0u8; 20];
    buf.copy_to_slice(&mut bytes);
    Ok(Address::new(bytes))
}

/// Restore a registry snapshot for `chain_id`.
pub fn decode(chain_id: ChainId, mut buf: &[u8]) -> Result<Registry, CacheError> {
    need(buf, 1)?;
    let version = buf.get_u8();
    if version != CACHE_VERSION {
        return Err(CacheError::Version {
            found: version,
            expected: CACHE_VERSION,
        });
    }
    let contract = read_address(&mut buf)?;
    need(buf, 8 + 4)?;
    let last_block = buf.get_u64();
    let count = buf.get_u32() as usize;

    // every record is at least NODE_RECORD_LEN bytes; reject absurd counts early
    need(buf, count.saturating_mul(NODE_RECORD_LEN))?;
    let mut nodes = Vec::with_capacity(count);
    let mut weights = Vec::with_capacity(count);
    for _ in 0..count {
        let address = read_address(&mut buf)?;
        need(buf, NODE_RECORD_LEN - Address::BYTES)?;
        let capacity = buf.get_u32();
        let index = buf.get_u32();
        let deposit = buf.get_u64();
        let props = NodeProps(buf.get_u64());
        let flags = buf.get_u8();
        let weight = NodeWeight {
            response_count: buf.get_u32(),
            total_response_time: buf.get_u32(),
            blacklisted_until: buf.get_u64(),
        };
        let url_len = buf.get_u16() as usize;
        need(buf, url_len)?;
        let url = std::str::from_utf8(&buf[..url_len])
            .map_err(|_| CacheError::InvalidUrl)?
            .to_owned();
        buf.advance(url_len);

        nodes.push(Node {
            address,
            url,
            capacity,
            deposit,
            props,
            blocked: flags & FLAG_BLOCKED != 0,
            index,
            boot: flags & FLAG_BOOT != 0,
        });
        weights.push(weight);
    }
    if buf.has_remaining() {
        return Err(CacheError::TrailingBytes(buf.remaining()));
    }

    Ok(Registry::from_parts(
        chain_id, contract, last_block, nodes, weights,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NodeLocator;

    fn sample() -> Registry {
        let mut reg = Registry::new(ChainId(5));
        reg.set_contract(Address::new([0xaa; 20]));
        let nodes = (1..=3u8)
            .map(|b| {
                let mut n = Node::new(
                    Address::new([b; 20]),
                    format!("https://node-{b}.example/rpc"),
                    NodeProps::PROOF | NodeProps::DATA,
                );
                n.deposit = 1_000 * b as u64;
                n.capacity = b as u32;
                n
            })
            .collect();
        reg.replace_nodes(nodes, vec![NodeWeight::default(); 3], 4_242)
            .unwrap();
        reg.record_response_time(&Address::new([1; 20]), 80, 0);
        reg.blacklist(NodeLocator::Address(&Address::new([2; 20])), 3_600, 1_000);
        reg
    }

    #[test]
    fn test_snapshot_restores_identical_tables() {
        let reg = sample();
        let restored = decode(ChainId(5), &encode(&reg)).unwrap();
        assert_eq!(restored.nodes(), reg.nodes());
        assert_eq!(restored.weights(), reg.weights());
        assert_eq!(restored.last_block(), 4_242);
        assert_eq!(restored.contract(), reg.contract());
        assert!(restored.pending_update().is_none());
    }

    #[test]
    fn test_version_mismatch() {
        let mut bytes = encode(&sample());
        bytes[0] = CACHE_VERSION + 1;
        assert_eq!(
            decode(ChainId(5), &bytes).unwrap_err(),
            CacheError::Version {
                found: CACHE_VERSION + 1,
                expected: CACHE_VERSION
            }
        );
    }

    #[test]
    fn test_truncated_and_trailing() {
        let bytes = encode(&sample());
        for cut in [0, 1, 21, 33, bytes.len() - 1] {
            assert_eq!(
                decode(ChainId(5), &bytes[..cut]).unwrap_err(),
                CacheError::Truncated,
                "cut at {cut}"
            );
        }
        let mut longer = bytes.clone();
        longer.push(0);
        assert_eq!(
            decode(ChainId(5), &longer).unwrap_err(),
            CacheError::TrailingBytes(1)
        );
    }

    #[test]
    fn test_absurd_count_rejected() {
        let mut bytes = encode(&Registry::new(ChainId(5)));
        let count_at = 1 + 20 + 8;
        bytes[count_at..count_at + 4].copy_from_slice(&u32::MAX.to_be_bytes());
        assert_eq!(decode(ChainId(5), &bytes).unwrap_err(), CacheError::Truncated);
    }

    #[test]
    fn test_cache_key() {
        assert_eq!(cache_key(ChainId(137)), "nodelist_137");
    }
}
