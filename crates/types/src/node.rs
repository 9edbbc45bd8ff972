//! Node records and their reputation weights.

use crate::{Address, NodeProps};

/// A node known to a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Logical identity, stable across registry rebuilds.
    pub address: Address,
    /// RPC endpoint.
    pub url: String,
    /// Advertised request capacity.
    pub capacity: u32,
    /// Stake at risk.
    pub deposit: u64,
    /// Capability bitset.
    pub props: NodeProps,
    /// Set when the node was blacklisted; cleared once it is selectable again.
    pub blocked: bool,
    /// Position in the registry's parallel arrays.
    pub index: u32,
    /// Node came from configuration rather than a verified node list.
    pub boot: bool,
}

impl Node {
    /// Create a node with default capacity and no deposit.
    pub fn new(address: Address, url: impl Into<String>, props: NodeProps) -> Self {
        Self {
            address,
            url: url.into(),
            capacity: 1,
            deposit: 0,
            props,
            blocked: false,
            index: 0,
            boot: false,
        }
    }
}

/// Reputation state of a node, parallel to [`Node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeWeight {
    /// Number of timed responses.
    pub response_count: u32,
    /// Sum of response times in milliseconds.
    pub total_response_time: u32,
    /// Unix seconds until which the node is excluded; 0 if never blacklisted.
    pub blacklisted_until: u64,
}

impl NodeWeight {
    /// Mean response time in milliseconds, if any sample exists.
    pub fn avg_response_time(&self) -> Option<u32> {
        if self.response_count == 0 {
            None
        } else {
            Some(self.total_response_time / self.response_count)
        }
    }

    /// True while the blacklist timer is running.
    pub fn is_blacklisted(&self, now: u64) -> bool {
        self.blacklisted_until > now
    }

    /// Add one timed response.
    pub fn record_response(&mut self, elapsed_ms: u32) {
        self.response_count = self.response_count.saturating_add(1);
        self.total_response_time = self.total_response_time.saturating_add(elapsed_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_average() {
        let mut w = NodeWeight::default();
        assert_eq!(w.avg_response_time(), None);
        w.record_response(100);
        w.record_response(300);
        assert_eq!(w.avg_response_time(), Some(200));
    }

    #[test]
    fn test_weight_blacklist_window() {
        let w = NodeWeight {
            blacklisted_until: 1_000,
            ..Default::default()
        };
        assert!(w.is_blacklisted(999));
        assert!(!w.is_blacklisted(1_000));
    }

    #[test]
    fn test_record_response_saturates() {
        let mut w = NodeWeight {
            response_count: 1,
            total_response_time: u32::MAX - 1,
            blacklisted_until: 0,
        };
        w.record_response(10);
        assert_eq!(w.total_response_time, u32::MAX);
        assert_eq!(w.response_count, 2);
    }
}
