//! Parsing of node-list refresh results.

use meshrpc_types::serde_helpers::{u32_or_hex, u64_or_hex};
use meshrpc_types::{Address, Node, NodeProps, NodeWeight};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors decoding a node list.
#[derive(Debug, Error)]
pub enum NodeListError {
    /// The result does not have the expected shape.
    #[error("invalid node list: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The list contains no node.
    #[error("node list is empty")]
    Empty,

    /// The same address appears twice.
    #[error("duplicate node {0} in node list")]
    Duplicate(Address),
}

/// One node as reported by a refresh result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeListEntry {
    /// RPC endpoint.
    pub url: String,
    /// Node identity.
    pub address: Address,
    /// Capabilities.
    #[serde(default)]
    pub props: NodeProps,
    /// Stake.
    #[serde(default, deserialize_with = "u64_or_hex")]
    pub deposit: u64,
    /// Advertised capacity.
    #[serde(default = "default_capacity", deserialize_with = "u32_or_hex")]
    pub capacity: u32,
    /// Unix seconds the node registered.
    #[serde(default, deserialize_with = "u64_or_hex")]
    pub register_time: u64,
}

fn default_capacity() -> u32 {
    1
}

impl NodeListEntry {
    /// Entry with default capacity, no deposit and no capabilities.
    pub fn new(address: Address, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            address,
            props: NodeProps::NONE,
            deposit: 0,
            capacity: default_capacity(),
            register_time: 0,
        }
    }
}

/// Decoded refresh result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeList {
    /// Every registered node.
    pub nodes: Vec<NodeListEntry>,
    /// Block the list was read at.
    #[serde(deserialize_with = "u64_or_hex")]
    pub last_block_number: u64,
}

impl NodeList {
    /// Decode the `result` of a refresh response.
    pub fn from_result(result: &Value) -> Result<Self, NodeListError> {
        let list = Self::deserialize(result)?;
        if list.nodes.is_empty() {
            return Err(NodeListError::Empty);
        }
        let mut seen = BTreeSet::new();
        for entry in &list.nodes {
            if !seen.insert(entry.address) {
                return Err(NodeListError::Duplicate(entry.address));
            }
        }
        Ok(list)
    }

    /// Convert into parallel node and weight vectors.
    ///
    /// Nodes registered less than `grace_secs` ago start blacklisted until
    /// the grace period ends.
    pub fn into_nodes(self, now: u64, grace_secs: u64) -> (Vec<Node>, Vec<NodeWeight>) {
        self.nodes
            .into_iter()
            .enumerate()
            .map(|(i, entry)| {
                let in_grace = entry.register_time != 0
                    && now > entry.register_time
                    && entry.register_time + grace_secs > now;
                let node = Node {
                    address: entry.address,
                    url: entry.url,
                    capacity: entry.capacity,
                    deposit: entry.deposit,
                    props: entry.props,
                    blocked: in_grace,
                    index: i as u32,
                    boot: false,
                };
                let weight = NodeWeight {
                    blacklisted_until: if in_grace {
                        entry.register_time + grace_secs
                    } else {
                        0
                    },
                    ..Default::default()
                };
                (node, weight)
            })
            .unzip()
    }
}
