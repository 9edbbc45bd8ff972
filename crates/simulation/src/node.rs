//! Simulated nodes and how they behave.

use crate::NodeIndex;
use meshrpc_registry::NodeListEntry;
use meshrpc_types::{Address, NodeProps};
use rand::{Rng, RngCore};
use rand_chacha::ChaCha8Rng;

/// Deposit every simulated node carries.
pub const SIM_DEPOSIT: u64 = 50_000;

/// How a simulated node answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Behavior {
    /// Correct answers, truthful metadata.
    Honest,
    /// Wrong answers that a verifier rejects.
    Lying,
    /// Never reachable.
    Offline,
    /// Correct answers, but claims the node list changed and cannot back it up.
    StaleReporter,
}

impl Behavior {
    /// Every behavior, in a fixed order.
    pub const ALL: [Behavior; 4] = [
        Behavior::Honest,
        Behavior::Lying,
        Behavior::Offline,
        Behavior::StaleReporter,
    ];

    /// Short label for reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Honest => "honest",
            Self::Lying => "lying",
            Self::Offline => "offline",
            Self::StaleReporter => "stale_reporter",
        }
    }
}

/// How many nodes of each behavior to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeMix {
    /// Honest nodes.
    pub honest: usize,
    /// Lying nodes.
    pub lying: usize,
    /// Unreachable nodes.
    pub offline: usize,
    /// Nodes reporting node-list changes that never happened.
    pub stale_reporters: usize,
}

impl Default for NodeMix {
    fn default() -> Self {
        Self {
            honest: 8,
            lying: 2,
            offline: 1,
            stale_reporters: 1,
        }
    }
}

impl NodeMix {
    /// Total node count.
    pub fn total(&self) -> usize {
        self.honest + self.lying + self.offline + self.stale_reporters
    }

    fn behaviors(&self) -> Vec<Behavior> {
        let counts = [self.honest, self.lying, self.offline, self.stale_reporters];
        Behavior::ALL
            .iter()
            .zip(counts)
            .flat_map(|(b, n)| std::iter::repeat(*b).take(n))
            .collect()
    }
}

/// One node of the simulated network.
#[derive(Debug, Clone, PartialEq)]
pub struct SimNode {
    /// Position in the network.
    pub index: NodeIndex,
    /// Identity.
    pub address: Address,
    /// Endpoint.
    pub url: String,
    /// Answering behavior.
    pub behavior: Behavior,
    /// Multiplier on the network's base latency.
    pub speed: f64,
}

impl SimNode {
    /// Node-list entry advertising this node.
    pub fn entry(&self) -> NodeListEntry {
        let mut entry = NodeListEntry::new(self.address, self.url.clone());
        entry.props = NodeProps::PROOF | NodeProps::DATA | NodeProps::HTTP;
        entry.deposit = SIM_DEPOSIT;
        entry
    }
}

/// Create the nodes of `mix` with addresses and speeds drawn from `rng`.
///
/// Behaviors are shuffled so position says nothing about honesty, except
/// that node 0 is always honest and can serve as the boot node.
pub(crate) fn build_nodes(mix: &NodeMix, rng: &mut ChaCha8Rng) -> Vec<SimNode> {
    let mut behaviors = mix.behaviors();
    if let Some(first_honest) = behaviors.iter().position(|b| *b == Behavior::Honest) {
        behaviors.swap(0, first_honest);
    }
    // Fisher-Yates over everything but the boot node
    for i in (2..behaviors.len()).rev() {
        let j = rng.gen_range(1..=i);
        behaviors.swap(i, j);
    }
    behaviors
        .into_iter()
        .enumerate()
        .map(|(i, behavior)| {
            let mut bytes = [0u8; 20];
            rng.fill_bytes(&mut bytes);
            SimNode {
                index: i as NodeIndex,
                address: Address::new(bytes),
                url: format!("https://sim-{i}.mesh/rpc"),
                behavior,
                speed: rng.gen_range(0.5..3.0),
            }
        })
        .collect()
}
