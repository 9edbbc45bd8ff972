//! Weighted random node selection.
//!
//! Picks `count` distinct nodes from the eligible subset of a registry,
//! favouring fast, well-capitalized and well-behaved nodes while giving every
//! eligible node a non-zero chance.
//!
//! # Weight
//!
//! ```text
//! weight = reputation × capacity × baseline_ms / avg_response_ms
//! ```
//!
//! Nodes without timing samples use the baseline as their average, which
//! makes their speed factor exactly 1. Reputation is 1 for nodes that were
//! never blacklisted and recovers linearly from a floor after a blacklist
//! expires.

use crate::registry::Registry;
use meshrpc_types::{Address, DAY_SECS, Node, NodeFilter, NodeProps, NodeWeight};
use rand::Rng;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Tuning constants for selection.
///
/// These are empirical; they are kept configurable instead of derived.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SelectionConfig {
    /// Response time assumed for nodes without samples.
    pub baseline_response_ms: u32,
    /// Draw attempts allowed per requested node.
    pub max_draw_factor: u32,
    /// Lowest reputation factor any eligible node gets.
    pub reputation_floor: f64,
    /// Time for reputation to fully recover after a blacklist expires.
    pub blacklist_recovery_secs: u64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            baseline_response_ms: 100,
            max_draw_factor: 10,
            reputation_floor: 0.05,
            blacklist_recovery_secs: 7 * DAY_SECS,
        }
    }
}

/// Selection failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// No node passed the filter.
    #[error("No eligible nodes: {blacklisted} of {total} nodes blacklisted")]
    NoEligibleNodes {
        /// Nodes in the registry.
        total: usize,
        /// Nodes currently blacklisted.
        blacklisted: usize,
    },

    /// Asked for zero nodes.
    #[error("selection count must be at least 1")]
    ZeroCount,
}

/// A picked node. Holds copies, so no registry borrow outlives the pick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedNode {
    /// Registry position at pick time.
    pub index: u32,
    /// Node identity.
    pub address: Address,
    /// RPC endpoint.
    pub url: String,
    /// Capabilities.
    pub props: NodeProps,
}

impl From<&Node> for SelectedNode {
    fn from(node: &Node) -> Self {
        Self {
            index: node.index,
            address: node.address,
            url: node.url.clone(),
            props: node.props,
        }
    }
}

/// Result of a pick.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Distinct picked nodes.
    pub nodes: Vec<SelectedNode>,
    /// Random draws performed. Zero when every eligible node was returned.
    pub draws: u32,
    /// Whether blacklists had to be cleared to find any node.
    pub failsafe_applied: bool,
}

/// Reputation multiplier in `[floor, 1]`.
pub fn reputation_factor(weight: &NodeWeight, now: u64, config: &SelectionConfig) -> f64 {
    if weight.blacklisted_until == 0 {
        return 1.0;
    }
    if weight.blacklisted_until > now {
        return config.reputation_floor;
    }
    let since = now - weight.blacklisted_until;
    if since >= config.blacklist_recovery_secs || config.blacklist_recovery_secs == 0 {
        return 1.0;
    }
    (since as f64 / config.blacklist_recovery_secs as f64).max(config.reputation_floor)
}

/// Sampling weight of a node.
pub fn selection_weight(
    node: &Node,
    weight: &NodeWeight,
    now: u64,
    config: &SelectionConfig,
) -> f64 {
    let baseline = config.baseline_response_ms.max(1);
    let avg = weight.avg_response_time().unwrap_or(baseline).max(1);
    let speed = baseline as f64 / avg as f64;
    let capacity = node.capacity.max(1) as f64;
    reputation_factor(weight, now, config) * capacity * speed
}

/// Eligibility of one node under a filter.
///
/// Boot nodes bypass deposit and capability checks; they are only trusted
/// until the first verified list replaces them.
pub fn is_eligible(node: &Node, weight: &NodeWeight, filter: &NodeFilter, now: u64) -> bool {
    if !filter.admits(&node.address) || weight.is_blacklisted(now) {
        return false;
    }
    node.boot
        || (node.deposit >= filter.min_deposit && node.props.satisfies(filter.required_properties))
}

impl Registry {
    /// Pick up to `count` distinct eligible nodes.
    ///
    /// The registry's own pre-filter applies when the filter carries none.
    /// If nothing is eligible and more than half the registry is blacklisted,
    /// every blacklist timer is cleared and eligibility is computed once more.
    pub fn pick<R: Rng + ?Sized>(
        &mut self,
        filter: &NodeFilter,
        count: usize,
        now: u64,
        config: &SelectionConfig,
        rng: &mut R,
    ) -> Result<Selection, SelectionError> {
        if count == 0 {
            return Err(SelectionError::ZeroCount);
        }

        // a caller's own preselection wins over the registry's
        let effective;
        let filter = if filter.pre_filter.is_none() && self.pre_filter().is_some() {
            effective = filter.clone().with_pre_filter(self.pre_filter().cloned());
            &effective
        } else {
            filter
        };

        let mut failsafe_applied = false;
        let mut eligible = self.eligible_positions(filter, now);
        if eligible.is_empty() {
            let blacklisted = self.blacklisted_count(now);
            if blacklisted * 2 > self.len() {
                warn!(
                    blacklisted,
                    total = self.len(),
                    "No eligible nodes, clearing all blacklists"
                );
                self.clear_blacklist();
                meshrpc_metrics::record_selection_failsafe();
                failsafe_applied = true;
                eligible = self.eligible_positions(filter, now);
            }
        }
        if eligible.is_empty() {
            return Err(SelectionError::NoEligibleNodes {
                total: self.len(),
                blacklisted: self.blacklisted_count(now),
            });
        }

        let (chosen, draws) = if count >= eligible.len() {
            (eligible.clone(), 0)
        } else {
            self.draw(&eligible, count, now, config, rng)
        };

        for &i in &chosen {
            self.nodes[i].blocked = false;
        }
        let nodes: Vec<SelectedNode> = chosen.iter().map(|&i| (&self.nodes[i]).into()).collect();
        debug!(
            requested = count,
            eligible = eligible.len(),
            picked = nodes.len(),
            draws,
            "Selected nodes"
        );
        meshrpc_metrics::record_nodes_selected(nodes.len());
        Ok(Selection {
            nodes,
            draws,
            failsafe_applied,
        })
    }

    fn eligible_positions(&self, filter: &NodeFilter, now: u64) -> Vec<usize> {
        self.nodes
            .iter()
            .zip(self.weights.iter())
            .enumerate()
            .filter(|(_, (node, weight))| is_eligible(node, weight, filter, now))
            .map(|(i, _)| i)
            .collect()
    }

    /// Sample without replacement by rejecting repeats, bounded to
    /// `max_draw_factor × count` attempts.
    fn draw<R: Rng + ?Sized>(
        &self,
        eligible: &[usize],
        count: usize,
        now: u64,
        config: &SelectionConfig,
        rng: &mut R,
    ) -> (Vec<usize>, u32) {
        let mut cumulative = Vec::with_capacity(eligible.len());
        let mut total = 0.0;
        for &i in eligible {
            total += selection_weight(&self.nodes[i], &self.weights[i], now, config);
            cumulative.push(total);
        }
        // degenerate tuning can zero every weight; fall back to uniform
        if total <= 0.0 || !total.is_finite() {
            cumulative = (1..=eligible.len()).map(|i| i as f64).collect();
            total = eligible.len() as f64;
        }

        let max_draws = config.max_draw_factor.max(1) as usize * count;
        let mut chosen: Vec<usize> = Vec::with_capacity(count);
        let mut draws = 0u32;
        while chosen.len() < count && (draws as usize) < max_draws {
            draws += 1;
            let r = rng.gen_range(0.0..total);
            let slot = cumulative
                .partition_point(|&c| c <= r)
                .min(eligible.len() - 1);
            let pos = eligible[slot];
            if chosen.contains(&pos) {
                trace!(draw = draws, position = pos, "Draw hit an already chosen node");
                continue;
            }
            chosen.push(pos);
        }
        (chosen, draws)
    }
}
