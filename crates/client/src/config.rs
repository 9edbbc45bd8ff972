//! Client configuration.
//!
//! Loaded from JSON or TOML. Every field has a default, so an empty document
//! is a valid mainnet configuration:
//!
//! ```toml
//! chainId = 1
//! requestCount = 2
//! verification = "proof"
//!
//! [nodeRegistry]
//! needsUpdate = true
//! avgBlockTime = 12
//!
//! [[bootNodes]]
//! url = "https://boot.example/rpc"
//! address = "0x45d45e6ff99e6c34a235d263965910298985fcfe"
//! ```

use meshrpc_core::{EngineError, ErrorKind};
use meshrpc_engine::{EngineConfig, Verification};
use meshrpc_registry::{SelectionConfig, StalenessConfig};
use meshrpc_types::{Address, ChainId, Node, NodeProps, RegistryId, DAY_SECS};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// File that was read.
        path: PathBuf,
        /// Underlying failure.
        source: std::io::Error,
    },

    /// JSON did not match the configuration shape.
    #[error("Invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML did not match the configuration shape.
    #[error("Invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        EngineError::new(ErrorKind::Config, e.to_string())
    }
}

/// A node supplied by configuration rather than a verified node list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    /// RPC endpoint.
    pub url: String,
    /// Node identity.
    pub address: Address,
    /// Capabilities.
    #[serde(default)]
    pub props: NodeProps,
}

impl NodeConfig {
    fn to_node(&self) -> Node {
        Node::new(self.address, self.url.clone(), self.props)
    }
}

/// Overrides of the chain's registry.
///
/// Setting `node_list`, `contract` or `registry_id` gives the client a
/// private registry copy, so other clients on the same chain keep theirs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRegistryConfig {
    /// Registry contract the node list is read from.
    #[serde(default)]
    pub contract: Option<Address>,

    /// Registry identifier.
    #[serde(default)]
    pub registry_id: Option<RegistryId>,

    /// Fixed node list replacing the registry's nodes.
    #[serde(default)]
    pub node_list: Option<Vec<NodeConfig>>,

    /// `true` refreshes the node list before the first call, `false` trusts
    /// the configured or cached list as it is.
    #[serde(default)]
    pub needs_update: Option<bool>,

    /// Block time in seconds, overriding the chain default.
    #[serde(default)]
    pub avg_block_time: Option<u16>,
}

impl NodeRegistryConfig {
    /// True if applying this configuration needs a private registry.
    pub fn detaches(&self) -> bool {
        self.node_list.is_some() || self.contract.is_some() || self.registry_id.is_some()
    }
}

/// Client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Chain the client talks to.
    #[serde(default = "default_chain_id")]
    pub chain_id: ChainId,

    /// Data nodes asked per attempt.
    #[serde(default = "default_request_count")]
    pub request_count: u32,

    /// Signer nodes asked to sign results.
    #[serde(default)]
    pub signature_count: u32,

    /// Minimum deposit of selected nodes.
    #[serde(default)]
    pub min_deposit: u64,

    /// Capabilities selected nodes must have.
    #[serde(default)]
    pub node_props: NodeProps,

    /// Node limit for node-list refreshes; 0 means all.
    #[serde(default)]
    pub node_limit: u32,

    /// Attempts per request before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Confirmations before a reported node-list change is trusted.
    /// Overrides `staleness.confirmationsRequired` when set.
    #[serde(default)]
    pub replace_latest_block: Option<u64>,

    /// Refresh the node list when a node reports a newer one.
    #[serde(default = "default_auto_update_list")]
    pub auto_update_list: bool,

    /// Verification level.
    #[serde(default)]
    pub verification: Verification,

    /// Restrict selection to these nodes. Needs a private registry.
    #[serde(default, alias = "preselect_nodes")]
    pub preselect_nodes: Option<Vec<Address>>,

    /// Nodes installed when the shared registry is still empty.
    #[serde(default)]
    pub boot_nodes: Vec<NodeConfig>,

    /// Registry overrides.
    #[serde(default)]
    pub node_registry: Option<NodeRegistryConfig>,

    /// Blacklist window for misbehaving nodes, in seconds.
    #[serde(default = "default_blacklist_ttl_secs")]
    pub blacklist_ttl_secs: u64,

    /// Upper bound on contexts in one request tree.
    #[serde(default = "default_max_contexts")]
    pub max_contexts: usize,

    /// Selection tuning.
    #[serde(default)]
    pub selection: SelectionConfig,

    /// Node-list refresh tuning.
    #[serde(default)]
    pub staleness: StalenessConfig,

    /// Seed for a reproducible node selection. Entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn check_nodes(field: &str, nodes: &[NodeConfig]) -> Result<(), ConfigError> {
    let mut seen = BTreeSet::new();
    for node in nodes {
        if node.url.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "{field}: node {} has no url",
                node.address
            )));
        }
        if !seen.insert(node.address) {
            return Err(ConfigError::Invalid(format!(
                "{field}: node {} listed twice",
                node.address
            )));
        }
    }
    Ok(())
}

fn default_chain_id() -> ChainId {
    ChainId::MAINNET
}

fn default_request_count() -> u32 {
    1
}

fn default_max_attempts() -> u32 {
    7
}

fn default_auto_update_list() -> bool {
    true
}

fn default_blacklist_ttl_secs() -> u64 {
    DAY_SECS
}

fn default_max_contexts() -> usize {
    256
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(default_chain_id())
    }
}

impl ClientConfig {
    /// Defaults for `chain_id`.
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            request_count: default_request_count(),
            signature_count: 0,
            min_deposit: 0,
            node_props: NodeProps::NONE,
            node_limit: 0,
            max_attempts: default_max_attempts(),
            replace_latest_block: None,
            auto_update_list: default_auto_update_list(),
            verification: Verification::None,
            preselect_nodes: None,
            boot_nodes: Vec::new(),
            node_registry: None,
            blacklist_ttl_secs: default_blacklist_ttl_secs(),
            max_contexts: default_max_contexts(),
            selection: SelectionConfig::default(),
            staleness: StalenessConfig::default(),
            seed: None,
        }
    }

    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a file; `.toml` files are TOML, anything else JSON.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&contents),
            _ => Self::from_json(&contents),
        }
    }

    /// Set the seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the boot nodes.
    pub fn with_boot_nodes(mut self, nodes: Vec<NodeConfig>) -> Self {
        self.boot_nodes = nodes;
        self
    }

    /// Set the registry overrides.
    pub fn with_node_registry(mut self, registry: NodeRegistryConfig) -> Self {
        self.node_registry = Some(registry);
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_count == 0 {
            return Err(ConfigError::Invalid("requestCount must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("maxAttempts must be at least 1".into()));
        }
        if self.max_contexts == 0 {
            return Err(ConfigError::Invalid("maxContexts must be at least 1".into()));
        }
        if self.selection.baseline_response_ms == 0 || self.selection.max_draw_factor == 0 {
            return Err(ConfigError::Invalid(
                "selection baseline and draw factor must be positive".into(),
            ));
        }
        let floor = self.selection.reputation_floor;
        if !(floor > 0.0 && floor <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "reputationFloor {floor} is outside (0, 1]"
            )));
        }
        if let Some(list) = self.node_registry.as_ref().and_then(|r| r.node_list.as_ref()) {
            if list.is_empty() {
                return Err(ConfigError::Invalid("nodeList must not be empty".into()));
            }
        }
        check_nodes("bootNodes", &self.boot_nodes)?;
        if let Some(list) = self.node_registry.as_ref().and_then(|r| r.node_list.as_ref()) {
            check_nodes("nodeList", list)?;
        }
        Ok(())
    }

    /// True if the client needs a private registry copy.
    pub fn detaches(&self) -> bool {
        self.preselect_nodes.is_some()
            || self.node_registry.as_ref().is_some_and(NodeRegistryConfig::detaches)
    }

    /// Configured preselection as an address set.
    pub fn preselection(&self) -> Option<BTreeSet<Address>> {
        self.preselect_nodes
            .as_ref()
            .map(|nodes| nodes.iter().copied().collect())
    }

    /// Boot nodes as registry records.
    pub fn boot_node_records(&self) -> Vec<Node> {
        self.boot_nodes.iter().map(NodeConfig::to_node).collect()
    }

    /// Configured fixed node list as registry records.
    pub fn node_list_records(&self) -> Option<Vec<Node>> {
        let list = self.node_registry.as_ref()?.node_list.as_ref()?;
        Some(list.iter().map(NodeConfig::to_node).collect())
    }

    /// The engine's view of this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        let mut staleness = self.staleness.clone();
        if let Some(confirmations) = self.replace_latest_block {
            staleness.confirmations_required = confirmations;
        }
        EngineConfig {
            request_count: self.request_count,
            signature_count: self.signature_count,
            max_attempts: self.max_attempts,
            node_limit: self.node_limit,
            min_deposit: self.min_deposit,
            node_props: self.node_props,
            verification: self.verification,
            auto_update_list: self.auto_update_list,
            blacklist_ttl_secs: self.blacklist_ttl_secs,
            max_contexts: self.max_contexts,
            selection: self.selection.clone(),
            staleness,
        }
    }
}
