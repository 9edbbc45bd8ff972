//! Selection filter value object.

use crate::{Address, NodeProps};
use std::collections::BTreeSet;

/// Constraints applied when picking nodes. Built per call, never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFilter {
    /// Capabilities every picked node must advertise.
    pub required_properties: NodeProps,
    /// Minimum stake.
    pub min_deposit: u64,
    /// Only these nodes may be picked.
    pub explicit_node_list: Option<BTreeSet<Address>>,
    /// These nodes must not be picked.
    pub exclusions: Option<BTreeSet<Address>>,
    /// Registry-level preselection copied in by the caller.
    pub pre_filter: Option<BTreeSet<Address>>,
}

impl NodeFilter {
    /// Filter on capabilities only.
    pub fn new(required_properties: NodeProps) -> Self {
        Self {
            required_properties,
            ..Default::default()
        }
    }

    /// Require a minimum deposit.
    pub fn with_min_deposit(mut self, min_deposit: u64) -> Self {
        self.min_deposit = min_deposit;
        self
    }

    /// Restrict selection to the given addresses.
    pub fn only(mut self, addresses: impl IntoIterator<Item = Address>) -> Self {
        self.explicit_node_list = Some(addresses.into_iter().collect());
        self
    }

    /// Exclude the given addresses, merging with existing exclusions.
    pub fn excluding(mut self, addresses: impl IntoIterator<Item = Address>) -> Self {
        let set = self.exclusions.get_or_insert_with(BTreeSet::new);
        set.extend(addresses);
        self
    }

    /// Apply a registry preselection.
    pub fn with_pre_filter(mut self, pre_filter: Option<BTreeSet<Address>>) -> Self {
        self.pre_filter = pre_filter;
        self
    }

    /// Membership checks shared by every node regardless of its boot status.
    pub fn admits(&self, address: &Address) -> bool {
        if let Some(only) = &self.explicit_node_list {
            if !only.contains(address) {
                return false;
            }
        }
        if let Some(pre) = &self.pre_filter {
            if !pre.contains(address) {
                return false;
            }
        }
        !self
            .exclusions
            .as_ref()
            .is_some_and(|excluded| excluded.contains(address))
    }
}
