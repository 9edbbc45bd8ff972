//! Deterministic simulation runner.
//!
//! Clients share one registry store and one cache, and take turns issuing
//! calls against the simulated network. Time only moves when the runner
//! advances the manual clock between rounds, so scheduled node-list
//! refreshes and blacklist expiry happen at reproducible points.

use crate::network::{canonical_result, CanonicalVerifier, NetworkConfig, NetworkCounters};
use crate::node::{Behavior, NodeMix};
use crate::SimulatedNetwork;
use meshrpc_cache_memory::MemoryCacheStore;
use meshrpc_client::{Client, ClientConfig, NodeConfig};
use meshrpc_core::{Clock, Collaborators, EngineResult, ManualClock};
use meshrpc_registry::{Registry, RegistryStore};
use meshrpc_types::ChainId;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Unix time the simulation starts at.
const START_TIME: u64 = 1_700_000_000;

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Seed for the network and every client.
    pub seed: u64,
    /// Node population.
    pub nodes: NodeMix,
    /// Network conditions.
    pub network: NetworkConfig,
    /// Number of clients sharing the registry.
    pub clients: usize,
    /// Calls each client makes.
    pub rounds: usize,
    /// Data nodes asked per call.
    pub request_count: u32,
    /// Attempts per call.
    pub max_attempts: u32,
    /// Simulated seconds between rounds.
    pub secs_per_round: u64,
    /// Chain id of the simulated chain.
    pub chain_id: ChainId,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            nodes: NodeMix::default(),
            network: NetworkConfig::default(),
            clients: 2,
            rounds: 50,
            request_count: 1,
            max_attempts: 7,
            secs_per_round: 30,
            chain_id: ChainId::MAINNET,
        }
    }
}

/// Statistics collected during a simulation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationStats {
    /// Calls issued.
    pub requests: u64,
    /// Calls that returned a result.
    pub succeeded: u64,
    /// Calls that failed.
    pub failed: u64,
    /// Results that differ from the canonical answer.
    pub wrong_answers: u64,
    /// Attempts across all calls.
    pub attempts: u64,
    /// Failures by error kind.
    pub errors: BTreeMap<String, u64>,
    /// Nodes blacklisted at the end, by behavior.
    pub blacklisted: BTreeMap<Behavior, usize>,
    /// Nodes in the shared registry at the end.
    pub registry_size: usize,
    /// Node-list block installed at the end.
    pub registry_last_block: u64,
    /// What the network observed.
    pub network: NetworkCounters,
}

impl SimulationStats {
    /// Fraction of calls that succeeded.
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            1.0
        } else {
            self.succeeded as f64 / self.requests as f64
        }
    }

    /// Mean attempts per call.
    pub fn attempts_per_request(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.attempts as f64 / self.requests as f64
        }
    }

    /// Blacklisted nodes of `behavior`.
    pub fn blacklisted(&self, behavior: Behavior) -> usize {
        self.blacklisted.get(&behavior).copied().unwrap_or(0)
    }
}

/// Drives clients against a simulated network.
pub struct SimulationRunner {
    config: SimulationConfig,
    network: Arc<SimulatedNetwork>,
    clock: Arc<ManualClock>,
    cache: MemoryCacheStore,
    clients: Vec<Client>,
    round: usize,
    stats: SimulationStats,
    // dropped after the clients so leases release into a live store
    _store: RegistryStore,
}

impl SimulationRunner {
    /// Build the network and the clients.
    ///
    /// Every client boots from node 0, which is always honest, and gets its
    /// own seed derived from the simulation seed.
    pub fn new(config: SimulationConfig) -> EngineResult<Self> {
        let network = Arc::new(SimulatedNetwork::new(
            config.network.clone(),
            &config.nodes,
            config.seed,
        ));
        let store = RegistryStore::new();
        let cache = MemoryCacheStore::new();
        let clock = Arc::new(ManualClock::new(START_TIME));
        let boot = network
            .nodes()
            .first()
            .map(|n| NodeConfig {
                url: n.url.clone(),
                address: n.address,
                props: n.entry().props,
            })
            .into_iter()
            .collect::<Vec<_>>();

        let mut clients = Vec::with_capacity(config.clients);
        for i in 0..config.clients {
            let mut client_config = ClientConfig::new(config.chain_id)
                .with_boot_nodes(boot.clone())
                .with_seed(config.seed.wrapping_add(i as u64 + 1));
            client_config.request_count = config.request_count;
            client_config.max_attempts = config.max_attempts;
            let collaborators = Collaborators::new()
                .with_transport(network.clone())
                .with_verifier(Arc::new(CanonicalVerifier))
                .with_cache(Arc::new(cache.clone()));
            clients.push(Client::new(&store, client_config, collaborators, clock.clone())?);
        }
        info!(
            seed = config.seed,
            nodes = network.nodes().len(),
            clients = clients.len(),
            "Simulation initialized"
        );

        Ok(Self {
            config,
            network,
            clock,
            cache,
            clients,
            round: 0,
            stats: SimulationStats::default(),
            _store: store,
        })
    }

    /// The simulated network.
    pub fn network(&self) -> &SimulatedNetwork {
        &self.network
    }

    /// The clients, in creation order.
    pub fn clients(&self) -> &[Client] {
        &self.clients
    }

    /// The shared cache store.
    pub fn cache(&self) -> &MemoryCacheStore {
        &self.cache
    }

    /// Current simulated unix time.
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Statistics so far.
    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// Run one round: every client makes one call, then time moves on.
    pub fn step_round(&mut self) {
        let round = self.round;
        for (i, client) in self.clients.iter().enumerate() {
            let params = json!([format!("0x{i:040x}"), format!("0x{round:x}")]);
            Self::issue(client, &mut self.stats, params);
        }
        self.round += 1;
        self.clock.advance(self.config.secs_per_round);
        self.network.advance_blocks(2);
    }

    /// Run every configured round and return the final statistics.
    pub fn run(&mut self) -> &SimulationStats {
        while self.round < self.config.rounds {
            self.step_round();
        }
        self.finish();
        info!(
            requests = self.stats.requests,
            succeeded = self.stats.succeeded,
            failed = self.stats.failed,
            wrong_answers = self.stats.wrong_answers,
            "Simulation finished"
        );
        &self.stats
    }

    fn issue(client: &Client, stats: &mut SimulationStats, params: serde_json::Value) {
        stats.requests += 1;
        let mut tree = match client.create_request("eth_getBalance", params) {
            Ok(tree) => tree,
            Err(e) => {
                stats.failed += 1;
                *stats.errors.entry(format!("{:?}", e.kind())).or_default() += 1;
                return;
            }
        };
        let expected = canonical_result(&tree.root().requests()[0]);
        let outcome = client.execute(&mut tree).and_then(|()| tree.result(0));
        stats.attempts += u64::from(tree.root().attempt());
        match outcome {
            Ok(result) => {
                stats.succeeded += 1;
                if result != expected {
                    stats.wrong_answers += 1;
                }
            }
            Err(e) => {
                debug!(error = %e, "Simulated call failed");
                stats.failed += 1;
                *stats.errors.entry(format!("{:?}", e.kind())).or_default() += 1;
            }
        }
    }

    fn finish(&mut self) {
        let now = self.clock.now();
        let Some(client) = self.clients.first() else {
            self.stats.network = self.network.counters();
            return;
        };
        let (blacklisted, size, last_block) = client.registry().with(|r: &Registry| {
            let blacklisted: Vec<_> = r
                .nodes()
                .iter()
                .zip(r.weights())
                .filter(|(_, w)| w.is_blacklisted(now))
                .map(|(n, _)| n.address)
                .collect();
            (blacklisted, r.len(), r.last_block())
        });
        self.stats.blacklisted.clear();
        for address in blacklisted {
            if let Some(node) = self.network.nodes().iter().find(|n| n.address == address) {
                *self.stats.blacklisted.entry(node.behavior).or_default() += 1;
            }
        }
        self.stats.registry_size = size;
        self.stats.registry_last_block = last_block;
        self.stats.network = self.network.counters();
    }
}

impl std::fmt::Debug for SimulationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationRunner")
            .field("config", &self.config)
            .field("round", &self.round)
            .field("clients", &self.clients.len())
            .finish_non_exhaustive()
    }
}
