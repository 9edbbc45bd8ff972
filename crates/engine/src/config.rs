//! Engine configuration.

use meshrpc_registry::{SelectionConfig, StalenessConfig};
use meshrpc_types::{NodeFilter, NodeProps, DAY_SECS};
use serde::{Deserialize, Serialize};

/// How responses must be proven before they are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verification {
    /// Accept responses no verifier claims.
    #[default]
    None,
    /// Ask nodes for proofs; a response no verifier claims is unverifiable.
    Proof,
}

impl Verification {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Proof => "proof",
        }
    }
}

/// Request execution configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Data nodes asked per attempt.
    pub request_count: u32,

    /// Signer nodes asked to sign the result. Non-zero raises the data
    /// node count to at least 2.
    pub signature_count: u32,

    /// Attempts per context before giving up.
    pub max_attempts: u32,

    /// Node limit passed to node-list refreshes; 0 means all.
    pub node_limit: u32,

    /// Minimum deposit of selected nodes.
    pub min_deposit: u64,

    /// Capabilities selected nodes must have.
    pub node_props: NodeProps,

    /// Verification level.
    pub verification: Verification,

    /// Refresh the node list when a node reports a newer one.
    pub auto_update_list: bool,

    /// How long a misbehaving node stays blacklisted.
    pub blacklist_ttl_secs: u64,

    /// Upper bound on contexts in one request tree.
    pub max_contexts: usize,

    /// Selection tuning.
    pub selection: SelectionConfig,

    /// Node-list refresh tuning.
    pub staleness: StalenessConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_count: 1,
            signature_count: 0,
            max_attempts: 7,
            node_limit: 0,
            min_deposit: 0,
            node_props: NodeProps::NONE,
            verification: Verification::None,
            auto_update_list: true,
            blacklist_ttl_secs: DAY_SECS,
            max_contexts: 256,
            selection: SelectionConfig::default(),
            staleness: StalenessConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the data node count.
    pub fn with_request_count(mut self, count: u32) -> Self {
        self.request_count = count;
        self
    }

    /// Set the signer node count.
    pub fn with_signature_count(mut self, count: u32) -> Self {
        self.signature_count = count;
        self
    }

    /// Set the attempt limit.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the verification level.
    pub fn with_verification(mut self, verification: Verification) -> Self {
        self.verification = verification;
        self
    }

    /// Data nodes actually asked per attempt.
    pub fn effective_request_count(&self) -> usize {
        let floor = if self.signature_count > 0 { 2 } else { 1 };
        self.request_count.max(floor) as usize
    }

    /// Filter for data nodes.
    pub fn data_filter(&self) -> NodeFilter {
        NodeFilter::new(self.node_props)
            .with_min_deposit(self.min_deposit)
    }
}
