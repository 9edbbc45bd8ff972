//! Per-chain node table.
//!
//! A [`Registry`] holds the nodes of one chain in a contiguous vector with a
//! parallel vector of [`NodeWeight`]s. Both vectors always have the same
//! length; every operation that changes one changes the other in the same
//! call. Nodes are never removed individually: a verified node-list update
//! replaces both vectors wholesale.

use crate::staleness::PendingUpdate;
use meshrpc_types::{Address, ChainId, Node, NodeWeight, RegistryId};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, info};

/// Errors from structural registry mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Node and weight vectors differ in length.
    #[error("node/weight length mismatch: {nodes} nodes, {weights} weights")]
    LengthMismatch {
        /// Number of nodes offered.
        nodes: usize,
        /// Number of weights offered.
        weights: usize,
    },

    /// Offered list is older than the installed one.
    #[error("node list at block {offered} is older than installed block {current}")]
    Stale {
        /// Installed list block.
        current: u64,
        /// Offered list block.
        offered: u64,
    },

    /// The same address appears twice.
    #[error("duplicate node address {0}")]
    DuplicateAddress(Address),
}

/// Identifies a node by address or endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeLocator<'a> {
    /// Logical identity.
    Address(&'a Address),
    /// RPC endpoint.
    Url(&'a str),
}

impl<'a> From<&'a Address> for NodeLocator<'a> {
    fn from(address: &'a Address) -> Self {
        Self::Address(address)
    }
}

/// A report from one node that another node is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfflineReport {
    /// Node making the claim.
    pub reporter: Address,
    /// Node claimed to be offline.
    pub offline: Address,
}

/// Known nodes of one chain and their reputation.
#[derive(Debug, Clone)]
pub struct Registry {
    chain_id: ChainId,
    contract: Address,
    registry_id: RegistryId,
    pub(crate) nodes: Vec<Node>,
    pub(crate) weights: Vec<NodeWeight>,
    last_block: u64,
    avg_block_time: u16,
    pub(crate) pending_update: Option<PendingUpdate>,
    pub(crate) offline_reports: Vec<OfflineReport>,
    pre_filter: Option<BTreeSet<Address>>,
    dirty: bool,
}

impl Registry {
    /// Create an empty registry awaiting its first update.
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            contract: Address::ZERO,
            registry_id: RegistryId::default(),
            nodes: Vec::new(),
            weights: Vec::new(),
            last_block: 0,
            avg_block_time: chain_id.default_block_time_secs(),
            pending_update: Some(PendingUpdate::first()),
            offline_reports: Vec::new(),
            pre_filter: None,
            dirty: false,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    /// Chain this registry serves.
    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// Registry contract.
    pub fn contract(&self) -> Address {
        self.contract
    }

    /// Set the registry contract.
    pub fn set_contract(&mut self, contract: Address) {
        self.contract = contract;
    }

    /// Registry identifier.
    pub fn registry_id(&self) -> RegistryId {
        self.registry_id
    }

    /// Set the registry identifier.
    pub fn set_registry_id(&mut self, registry_id: RegistryId) {
        self.registry_id = registry_id;
    }

    /// All nodes, indexed by position.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// All weights, parallel to [`nodes`](Self::nodes).
    pub fn weights(&self) -> &[NodeWeight] {
        &self.weights
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if no node is known yet.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Block of the installed node list.
    pub fn last_block(&self) -> u64 {
        self.last_block
    }

    /// Average block time in seconds.
    pub fn avg_block_time(&self) -> u16 {
        self.avg_block_time
    }

    /// Override the average block time.
    pub fn set_avg_block_time(&mut self, secs: u16) {
        self.avg_block_time = secs.max(1);
    }

    /// Addresses selection is restricted to, if any.
    pub fn pre_filter(&self) -> Option<&BTreeSet<Address>> {
        self.pre_filter.as_ref()
    }

    /// Restrict every selection on this registry. `None` lifts the restriction.
    pub fn set_pre_filter(&mut self, pre_filter: Option<BTreeSet<Address>>) {
        self.pre_filter = pre_filter;
    }

    /// Offline reports awaiting corroboration.
    pub fn offline_reports(&self) -> &[OfflineReport] {
        &self.offline_reports
    }

    /// Position of a node.
    pub fn position(&self, locator: NodeLocator<'_>) -> Option<usize> {
        match locator {
            NodeLocator::Address(address) => self.nodes.iter().position(|n| n.address == *address),
            NodeLocator::Url(url) => self.nodes.iter().position(|n| n.url == url),
        }
    }

    /// Node and weight for an address.
    pub fn get(&self, address: &Address) -> Option<(&Node, &NodeWeight)> {
        let i = self.position(NodeLocator::Address(address))?;
        Some((&self.nodes[i], &self.weights[i]))
    }

    /// Whether the registry changed since the last [`take_dirty`](Self::take_dirty).
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Read and reset the dirty flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Structural mutations
    // ═══════════════════════════════════════════════════════════════════════

    /// Install configuration-supplied bootstrap nodes.
    ///
    /// Boot nodes bypass deposit and capability filtering until a verified
    /// list replaces them. Existing weights are kept for matching addresses.
    pub fn set_boot_nodes(&mut self, nodes: Vec<Node>) -> Result<(), RegistryError> {
        let weights = vec![NodeWeight::default(); nodes.len()];
        let nodes = nodes
            .into_iter()
            .map(|mut n| {
                n.boot = true;
                n
            })
            .collect();
        self.install(nodes, weights)?;
        debug!(chain_id = %self.chain_id, nodes = self.nodes.len(), "Installed boot nodes");
        Ok(())
    }

    /// Atomically swap in a new node list.
    ///
    /// Weights of nodes whose address already exists are carried over; the
    /// supplied weight is used only for nodes new to this registry.
    pub fn replace_nodes(
        &mut self,
        new_nodes: Vec<Node>,
        new_weights: Vec<NodeWeight>,
        new_last_block: u64,
    ) -> Result<(), RegistryError> {
        if new_last_block < self.last_block {
            return Err(RegistryError::Stale {
                current: self.last_block,
                offered: new_last_block,
            });
        }
        self.install(new_nodes, new_weights)?;
        self.last_block = new_last_block;
        info!(
            chain_id = %self.chain_id,
            nodes = self.nodes.len(),
            last_block = new_last_block,
            "Replaced node list"
        );
        meshrpc_metrics::set_registry_size(self.chain_id.0, self.nodes.len());
        Ok(())
    }

    fn install(
        &mut self,
        new_nodes: Vec<Node>,
        new_weights: Vec<NodeWeight>,
    ) -> Result<(), RegistryError> {
        if new_nodes.len() != new_weights.len() {
            return Err(RegistryError::LengthMismatch {
                nodes: new_nodes.len(),
                weights: new_weights.len(),
            });
        }
        let mut seen = BTreeSet::new();
        for node in &new_nodes {
            if !seen.insert(node.address) {
                return Err(RegistryError::DuplicateAddress(node.address));
            }
        }

        let mut nodes = new_nodes;
        let mut weights = new_weights;
        for (i, (node, weight)) in nodes.iter_mut().zip(weights.iter_mut()).enumerate() {
            node.index = i as u32;
            if let Some((old_node, old_weight)) = self.get(&node.address) {
                node.blocked = old_node.blocked;
                *weight = *old_weight;
            }
        }

        // reports about nodes that disappeared are meaningless now
        self.offline_reports
            .retain(|r| seen.contains(&r.offline) && seen.contains(&r.reporter));
        self.nodes = nodes;
        self.weights = weights;
        self.dirty = true;
        Ok(())
    }

    /// Take over the contents of a restored cache snapshot.
    ///
    /// Ignored if the snapshot is older than what is installed. A restored
    /// list counts as current, so any pending first update is dropped.
    pub fn adopt(&mut self, restored: Registry) -> bool {
        if restored.last_block < self.last_block || restored.nodes.is_empty() {
            return false;
        }
        self.contract = restored.contract;
        self.nodes = restored.nodes;
        self.weights = restored.weights;
        self.last_block = restored.last_block;
        self.pending_update = None;
        self.offline_reports.clear();
        debug!(
            chain_id = %self.chain_id,
            nodes = self.nodes.len(),
            last_block = self.last_block,
            "Adopted cached node list"
        );
        true
    }

    /// Build a registry from decoded parts. Used by the cache codec.
    pub(crate) fn from_parts(
        chain_id: ChainId,
        contract: Address,
        last_block: u64,
        nodes: Vec<Node>,
        weights: Vec<NodeWeight>,
    ) -> Self {
        Self {
            contract,
            nodes,
            weights,
            last_block,
            pending_update: None,
            ..Self::new(chain_id)
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Blacklist
    // ═══════════════════════════════════════════════════════════════════════

    /// Exclude a node from selection for `ttl_secs`.
    ///
    /// No-op returning `false` if the node is unknown or already blacklisted.
    pub fn blacklist(&mut self, locator: NodeLocator<'_>, ttl_secs: u64, now: u64) -> bool {
        let Some(i) = self.position(locator) else {
            return false;
        };
        if self.nodes[i].blocked && self.weights[i].is_blacklisted(now) {
            return false;
        }
        self.nodes[i].blocked = true;
        self.weights[i].blacklisted_until = now.saturating_add(ttl_secs);
        self.dirty = true;
        debug!(
            address = %self.nodes[i].address,
            url = %self.nodes[i].url,
            ttl_secs,
            "Blacklisting node"
        );
        true
    }

    /// Number of nodes currently blacklisted.
    pub fn blacklisted_count(&self, now: u64) -> usize {
        self.weights.iter().filter(|w| w.is_blacklisted(now)).count()
    }

    /// Clear every blacklist timer. Returns how many nodes were affected.
    pub fn clear_blacklist(&mut self) -> usize {
        let mut cleared = 0;
        for (node, weight) in self.nodes.iter_mut().zip(self.weights.iter_mut()) {
            if weight.blacklisted_until != 0 || node.blocked {
                cleared += 1;
            }
            weight.blacklisted_until = 0;
            node.blocked = false;
        }
        if cleared > 0 {
            self.dirty = true;
        }
        cleared
    }

    /// Copy for a client that customizes its node list.
    ///
    /// Side tables start clean; the copy shares nothing with `self`.
    pub fn detached_copy(&self) -> Self {
        let mut copy = self.clone();
        copy.offline_reports.clear();
        copy.dirty = false;
        copy
    }
}
