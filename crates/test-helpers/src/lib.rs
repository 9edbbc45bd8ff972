//! Test helpers for meshrpc: deterministic node sets, JSON-RPC fixtures and
//! scripted collaborators.
//!
//! Tests drive the engine with real registries and real response bodies
//! rather than mocking the registry away, so selection, blacklisting and
//! staleness logic run exactly as in production.
//!
//! # Example
//!
//! ```rust
//! use meshrpc_test_helpers::TestNodes;
//! use meshrpc_types::ChainId;
//!
//! // Four nodes with deterministic addresses
//! let nodes = TestNodes::new(4, 42);
//! let registry = nodes.registry(ChainId(1), 100);
//! assert_eq!(registry.len(), 4);
//! assert_eq!(registry.last_block(), 100);
//! ```

pub mod byzantine;
pub mod fixtures;

use meshrpc_registry::{NodeListEntry, Registry};
use meshrpc_types::{Address, ChainId, Node, NodeProps, NodeWeight};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Deposit every test node carries.
pub const TEST_DEPOSIT: u64 = 10_000;

/// A set of test nodes with deterministic addresses.
///
/// Node `i` is reachable at `https://node-<i>.test/rpc`, advertises
/// `PROOF | DATA | HTTP` and carries [`TEST_DEPOSIT`].
#[derive(Debug, Clone)]
pub struct TestNodes {
    addresses: Vec<Address>,
    props: Vec<NodeProps>,
}

impl TestNodes {
    /// Create `size` nodes. Different seeds produce different addresses.
    pub fn new(size: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let addresses = (0..size)
            .map(|_| {
                let mut bytes = [0u8; 20];
                rng.fill_bytes(&mut bytes);
                Address::new(bytes)
            })
            .collect();
        Self {
            addresses,
            props: vec![NodeProps::PROOF | NodeProps::DATA | NodeProps::HTTP; size],
        }
    }

    /// Give node `i` different capabilities.
    pub fn with_props(mut self, i: usize, props: NodeProps) -> Self {
        self.props[i] = props;
        self
    }

    /// Number of nodes.
    pub fn size(&self) -> usize {
        self.addresses.len()
    }

    /// Address of node `i`.
    pub fn address(&self, i: usize) -> Address {
        self.addresses[i]
    }

    /// All addresses in order.
    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    /// URL of node `i`.
    pub fn url(&self, i: usize) -> String {
        format!("https://node-{i}.test/rpc")
    }

    /// Index of the node behind `url`.
    pub fn index_of_url(&self, url: &str) -> Option<usize> {
        (0..self.size()).find(|&i| self.url(i) == url)
    }

    /// Index of the node with `address`.
    pub fn index_of(&self, address: &Address) -> Option<usize> {
        self.addresses.iter().position(|a| a == address)
    }

    /// Registry record of node `i`.
    pub fn node(&self, i: usize) -> Node {
        let mut node = Node::new(self.addresses[i], self.url(i), self.props[i]);
        node.deposit = TEST_DEPOSIT;
        node
    }

    /// Node-list entry of node `i`, as a refresh result reports it.
    pub fn entry(&self, i: usize) -> NodeListEntry {
        let mut entry = NodeListEntry::new(self.addresses[i], self.url(i));
        entry.props = self.props[i];
        entry.deposit = TEST_DEPOSIT;
        entry
    }

    /// Every node as a node-list entry.
    pub fn entries(&self) -> Vec<NodeListEntry> {
        (0..self.size()).map(|i| self.entry(i)).collect()
    }

    /// Populated registry with no pending update.
    pub fn registry(&self, chain_id: ChainId, last_block: u64) -> Registry {
        let mut registry = Registry::new(chain_id);
        let nodes = (0..self.size()).map(|i| self.node(i)).collect();
        // fixture data is consistent by construction
        registry
            .replace_nodes(nodes, vec![NodeWeight::default(); self.size()], last_block)
            .expect("fixture node list is valid");
        registry.clear_pending_update();
        registry
    }

    /// Registry holding only node `i` as a boot node, awaiting its first update.
    pub fn boot_registry(&self, chain_id: ChainId, i: usize) -> Registry {
        let mut registry = Registry::new(chain_id);
        registry
            .set_boot_nodes(vec![self.node(i)])
            .expect("single boot node is valid");
        registry
    }
}
