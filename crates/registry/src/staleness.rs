//! Node-list staleness tracking.
//!
//! Every response may carry the block at which the answering node last saw
//! the node list change. When that block is newer than the installed list,
//! a refresh is scheduled, delayed until the reporting block is considered
//! final. The refresh itself is an ordinary nested request driven by the
//! engine; this module only keeps the bookkeeping:
//!
//! ```text
//! observe_response_meta ──► pending_update ──► update_due ──► engine issues refresh
//!                                                               │
//!                  apply_node_list / on_update_failed ◄─────────┘
//! ```

use crate::nodelist::NodeList;
use crate::registry::{NodeLocator, Registry};
use meshrpc_core::ResponseMeta;
use meshrpc_metrics::UpdateOutcome;
use meshrpc_types::{Address, DAY_SECS};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Tuning for refresh scheduling and penalties.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StalenessConfig {
    /// Confirmations required before a reported list change is trusted.
    pub confirmations_required: u64,
    /// Upper bound on the refresh delay.
    pub wait_time_cap_secs: u64,
    /// Blacklist window for a node that reported a change it could not substantiate.
    pub update_failure_penalty_secs: u64,
    /// Nodes registered more recently than this start blacklisted.
    pub new_node_grace_secs: u64,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            // Six blocks is the usual finality heuristic for PoW chains
            confirmations_required: 6,
            // Chains with very long block times must not stall refreshes
            wait_time_cap_secs: 3600,
            update_failure_penalty_secs: DAY_SECS,
            new_node_grace_secs: DAY_SECS,
        }
    }
}

/// A scheduled node-list refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingUpdate {
    /// Block the reporter claimed the list changed at. 0 for the first update.
    pub expected_last_block: u64,
    /// Node that reported the change. `None` for the first update.
    pub reporting_node: Option<Address>,
    /// Unix seconds after which the refresh may run.
    pub deadline: u64,
}

impl PendingUpdate {
    /// The bootstrap refresh every new registry needs.
    pub fn first() -> Self {
        Self {
            expected_last_block: 0,
            reporting_node: None,
            deadline: 0,
        }
    }

    /// True for the bootstrap refresh.
    pub fn is_first(&self) -> bool {
        self.reporting_node.is_none()
    }
}

/// What happened when a refresh result was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateApplied {
    /// A newer list replaced the installed one.
    pub replaced: bool,
    /// Reporter blacklisted because the list did not match its claim.
    pub penalized: Option<Address>,
}

/// What to do after a refresh failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateFailure {
    /// First update: no one to blame, the caller sees the error.
    Surface,
    /// Later update: the reporting node was blacklisted and the failure absorbed.
    Penalized(Address),
    /// A bootstrap refresh failed after another one already installed a list.
    Superseded,
}

/// Seconds to wait before trusting a reported node-list change.
///
/// `confirmations − (current_block − last_node_list)` blocks remain until the
/// change is final; the wait is that many block times, capped. A report where
/// the node-list block is ahead of the current block yields zero so the claim
/// is checked, and punished, right away.
pub fn update_wait_time(
    last_node_list: u64,
    current_block: u64,
    confirmations: u64,
    avg_block_time: u16,
    cap_secs: u64,
) -> u64 {
    if last_node_list > current_block {
        return 0;
    }
    let diff = current_block - last_node_list;
    if diff >= confirmations {
        return 0;
    }
    (confirmations - diff)
        .saturating_mul(u64::from(avg_block_time))
        .min(cap_secs)
}

impl Registry {
    /// Scheduled refresh, if any.
    pub fn pending_update(&self) -> Option<&PendingUpdate> {
        self.pending_update.as_ref()
    }

    /// True while the bootstrap refresh has not completed.
    pub fn is_first_update(&self) -> bool {
        self.pending_update.is_some_and(|p| p.is_first())
    }

    /// Force a bootstrap refresh on next use.
    pub fn mark_needs_update(&mut self) {
        self.pending_update = Some(PendingUpdate::first());
    }

    /// Drop any scheduled refresh.
    pub fn clear_pending_update(&mut self) {
        self.pending_update = None;
    }

    /// Scheduled refresh whose deadline has passed. The first update is
    /// always due.
    pub fn update_due(&self, now: u64) -> Option<PendingUpdate> {
        self.pending_update
            .filter(|p| p.is_first() || p.deadline <= now)
    }

    /// Feed the side-channel metadata of an accepted response.
    ///
    /// Returns true if a refresh was scheduled.
    pub fn observe_response_meta(
        &mut self,
        reporter: Address,
        meta: ResponseMeta,
        now: u64,
        config: &StalenessConfig,
    ) -> bool {
        if meta.last_node_list > meta.current_block {
            debug!(
                %reporter,
                last_node_list = meta.last_node_list,
                current_block = meta.current_block,
                "Ignoring self-contradictory node list report"
            );
            return false;
        }
        if meta.last_node_list <= self.last_block() || self.pending_update.is_some() {
            return false;
        }
        if self.get(&reporter).is_none() {
            return false;
        }

        let wait = update_wait_time(
            meta.last_node_list,
            meta.current_block,
            config.confirmations_required,
            self.avg_block_time(),
            config.wait_time_cap_secs,
        );
        self.pending_update = Some(PendingUpdate {
            expected_last_block: meta.last_node_list,
            reporting_node: Some(reporter),
            deadline: now + wait,
        });
        info!(
            %reporter,
            expected_last_block = meta.last_node_list,
            wait_secs = wait,
            "Scheduled node list update"
        );
        meshrpc_metrics::record_update_scheduled(wait);
        true
    }

    /// Apply the result of the refresh issued for `update`.
    ///
    /// A non-first refresh whose block does not match what its reporter
    /// claimed penalizes that reporter; the list is still installed if newer.
    pub fn apply_node_list(
        &mut self,
        list: NodeList,
        update: PendingUpdate,
        now: u64,
        config: &StalenessConfig,
    ) -> UpdateApplied {
        let mut penalized = None;
        if let Some(reporter) = update.reporting_node {
            if list.last_block_number != update.expected_last_block {
                warn!(
                    %reporter,
                    expected_last_block = update.expected_last_block,
                    actual = list.last_block_number,
                    "Node list does not match the reported change"
                );
                if self.blacklist(
                    NodeLocator::Address(&reporter),
                    config.update_failure_penalty_secs,
                    now,
                ) {
                    meshrpc_metrics::record_node_blacklisted("unsubstantiated_update");
                }
                penalized = Some(reporter);
            }
        }

        let replaced = if list.last_block_number > self.last_block() || self.has_only_boot_nodes() {
            let block = list.last_block_number.max(self.last_block());
            let (nodes, weights) = list.into_nodes(now, config.new_node_grace_secs);
            match self.replace_nodes(nodes, weights, block) {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Rejected node list");
                    false
                }
            }
        } else {
            false
        };
        self.settle_pending(update, replaced);

        meshrpc_metrics::record_nodelist_update(if replaced {
            UpdateOutcome::Applied
        } else {
            UpdateOutcome::Unchanged
        });
        UpdateApplied {
            replaced,
            penalized,
        }
    }

    /// Handle a failure of the refresh issued for `update`.
    ///
    /// Only a failed bootstrap on a registry that still waits for it reaches
    /// the caller. A failed reported change penalizes its reporter, even when
    /// another refresh for the same report already settled it.
    pub fn on_update_failed(
        &mut self,
        update: PendingUpdate,
        now: u64,
        config: &StalenessConfig,
    ) -> UpdateFailure {
        let Some(reporter) = update.reporting_node else {
            if !self.is_first_update() {
                debug!(chain_id = %self.chain_id(), "Bootstrap refresh failed after another one landed");
                return UpdateFailure::Superseded;
            }
            warn!(chain_id = %self.chain_id(), "First node list update failed");
            meshrpc_metrics::record_nodelist_update(UpdateOutcome::Failed);
            return UpdateFailure::Surface;
        };

        self.settle_pending(update, false);
        if self.blacklist(
            NodeLocator::Address(&reporter),
            config.update_failure_penalty_secs,
            now,
        ) {
            meshrpc_metrics::record_node_blacklisted("unsubstantiated_update");
        }
        warn!(%reporter, "Node list update failed, penalizing reporter");
        meshrpc_metrics::record_nodelist_update(UpdateOutcome::Penalized);
        UpdateFailure::Penalized(reporter)
    }

    /// Drop the scheduled refresh if `update` settled it.
    ///
    /// A report for a block the installed list already covers is settled too.
    fn settle_pending(&mut self, update: PendingUpdate, replaced: bool) {
        let settled = self.pending_update.is_some_and(|p| {
            p == update
                || (replaced && p.is_first())
                || (!p.is_first() && p.expected_last_block <= self.last_block())
        });
        if settled {
            self.pending_update = None;
        }
    }

    fn has_only_boot_nodes(&self) -> bool {
        !self.nodes.is_empty() && self.nodes.iter().all(|n| n.boot)
    }
}
