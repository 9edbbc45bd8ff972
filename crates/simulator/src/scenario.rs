//! Scenario files.

use meshrpc_simulation::{NetworkConfig, NodeMix, SimulationConfig};
use meshrpc_types::ChainId;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Failure loading a scenario.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid scenario.
    #[error("invalid scenario: {0}")]
    Parse(#[from] toml::de::Error),

    /// The scenario parses but cannot run.
    #[error("invalid scenario: {0}")]
    Invalid(String),
}

/// Node population of a scenario.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeScenario {
    #[serde(default = "default_honest")]
    pub honest: usize,
    #[serde(default)]
    pub lying: usize,
    #[serde(default)]
    pub offline: usize,
    #[serde(default)]
    pub stale_reporters: usize,
}

impl Default for NodeScenario {
    fn default() -> Self {
        let mix = NodeMix::default();
        Self {
            honest: mix.honest,
            lying: mix.lying,
            offline: mix.offline,
            stale_reporters: mix.stale_reporters,
        }
    }
}

fn default_honest() -> usize {
    NodeMix::default().honest
}

/// Network conditions of a scenario.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkScenario {
    #[serde(default = "default_base_latency_ms")]
    pub base_latency_ms: u64,
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
    #[serde(default)]
    pub packet_loss_rate: f64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_node_list_block")]
    pub node_list_block: u64,
}

impl Default for NetworkScenario {
    fn default() -> Self {
        Self {
            base_latency_ms: default_base_latency_ms(),
            jitter_fraction: default_jitter_fraction(),
            packet_loss_rate: 0.0,
            timeout_ms: default_timeout_ms(),
            node_list_block: default_node_list_block(),
        }
    }
}

fn default_base_latency_ms() -> u64 {
    NetworkConfig::default().base_latency.as_millis() as u64
}

fn default_jitter_fraction() -> f64 {
    NetworkConfig::default().jitter_fraction
}

fn default_timeout_ms() -> u64 {
    NetworkConfig::default().timeout.as_millis() as u64
}

fn default_node_list_block() -> u64 {
    NetworkConfig::default().node_list_block
}

/// A simulation scenario as written in a TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    /// Seed; a random one is drawn when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default = "default_clients")]
    pub clients: usize,
    #[serde(default = "default_rounds")]
    pub rounds: usize,
    #[serde(default = "default_request_count")]
    pub request_count: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_secs_per_round")]
    pub secs_per_round: u64,
    #[serde(default)]
    pub nodes: NodeScenario,
    #[serde(default)]
    pub network: NetworkScenario,
}

fn default_chain_id() -> u64 {
    ChainId::MAINNET.0
}

fn default_clients() -> usize {
    SimulationConfig::default().clients
}

fn default_rounds() -> usize {
    SimulationConfig::default().rounds
}

fn default_request_count() -> u32 {
    SimulationConfig::default().request_count
}

fn default_max_attempts() -> u32 {
    SimulationConfig::default().max_attempts
}

fn default_secs_per_round() -> u64 {
    SimulationConfig::default().secs_per_round
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            seed: None,
            chain_id: default_chain_id(),
            clients: default_clients(),
            rounds: default_rounds(),
            request_count: default_request_count(),
            max_attempts: default_max_attempts(),
            secs_per_round: default_secs_per_round(),
            nodes: NodeScenario::default(),
            network: NetworkScenario::default(),
        }
    }
}

impl Scenario {
    /// Parse a scenario from TOML.
    pub fn from_toml(input: &str) -> Result<Self, ScenarioError> {
        Ok(toml::from_str(input)?)
    }

    /// Load a scenario file.
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let input = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&input)
    }

    /// Build the simulation configuration with `seed`.
    pub fn to_config(&self, seed: u64) -> Result<SimulationConfig, ScenarioError> {
        if self.nodes.honest == 0 {
            return Err(ScenarioError::Invalid(
                "at least one honest node is needed to boot from".into(),
            ));
        }
        if self.clients == 0 {
            return Err(ScenarioError::Invalid("clients must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.network.jitter_fraction)
            || !(0.0..=1.0).contains(&self.network.packet_loss_rate)
        {
            return Err(ScenarioError::Invalid(
                "jitterFraction and packetLossRate must be within 0.0 - 1.0".into(),
            ));
        }
        Ok(SimulationConfig {
            seed,
            nodes: NodeMix {
                honest: self.nodes.honest,
                lying: self.nodes.lying,
                offline: self.nodes.offline,
                stale_reporters: self.nodes.stale_reporters,
            },
            network: NetworkConfig {
                base_latency: Duration::from_millis(self.network.base_latency_ms),
                jitter_fraction: self.network.jitter_fraction,
                packet_loss_rate: self.network.packet_loss_rate,
                timeout: Duration::from_millis(self.network.timeout_ms),
                node_list_block: self.network.node_list_block,
            },
            clients: self.clients,
            rounds: self.rounds,
            request_count: self.request_count,
            max_attempts: self.max_attempts,
            secs_per_round: self.secs_per_round,
            chain_id: ChainId(self.chain_id),
        })
    }
}
