//! Response-time accounting and offline reports.
//!
//! Timing never blacklists a node. Blacklisting happens for verification
//! failures (engine), unsubstantiated node-list updates (staleness), and
//! corroborated offline reports (here).

use crate::registry::{NodeLocator, OfflineReport, Registry};
use meshrpc_types::Address;
use tracing::{debug, info};

/// Result of an offline report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineOutcome {
    /// Report stored, awaiting a second opinion.
    Recorded,
    /// A different node had already reported the same peer; it is now blacklisted.
    Corroborated,
    /// Unknown node, self-report, or a repeat from the same reporter.
    Ignored,
}

impl Registry {
    /// Account one timed response.
    ///
    /// Skipped for unknown nodes, nodes that are currently blocked, and
    /// zero durations. Returns true if the sample was recorded.
    pub fn record_response_time(&mut self, address: &Address, elapsed_ms: u32, now: u64) -> bool {
        if elapsed_ms == 0 {
            return false;
        }
        let Some(i) = self.position(NodeLocator::Address(address)) else {
            return false;
        };
        if self.nodes[i].blocked && self.weights[i].is_blacklisted(now) {
            return false;
        }
        self.weights[i].record_response(elapsed_ms);
        self.mark_dirty();
        meshrpc_metrics::record_response_time(elapsed_ms);
        true
    }

    /// `reporter` claims `offline` did not respond.
    ///
    /// A single report is only recorded. When a different node reports the
    /// same peer, the peer is blacklisted for `ttl_secs` and all reports
    /// about it are dropped.
    pub fn report_offline(
        &mut self,
        reporter: Address,
        offline: Address,
        ttl_secs: u64,
        now: u64,
    ) -> OfflineOutcome {
        if reporter == offline || self.get(&offline).is_none() || self.get(&reporter).is_none() {
            return OfflineOutcome::Ignored;
        }

        let mut already_reported = false;
        let mut corroborated = false;
        for report in self.offline_reports.iter().filter(|r| r.offline == offline) {
            if report.reporter == reporter {
                already_reported = true;
            } else {
                corroborated = true;
            }
        }

        if corroborated {
            self.offline_reports.retain(|r| r.offline != offline);
            self.blacklist(NodeLocator::Address(&offline), ttl_secs, now);
            info!(%offline, %reporter, "Offline report corroborated, blacklisting node");
            meshrpc_metrics::record_node_blacklisted("offline");
            meshrpc_metrics::record_offline_report(true);
            return OfflineOutcome::Corroborated;
        }
        if already_reported {
            return OfflineOutcome::Ignored;
        }

        self.offline_reports.push(OfflineReport { reporter, offline });
        debug!(%offline, %reporter, "Recorded offline report");
        meshrpc_metrics::record_offline_report(false);
        OfflineOutcome::Recorded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshrpc_types::{ChainId, Node, NodeProps, NodeWeight};

    fn addr(b: u8) -> Address {
        Address::new([b; 20])
    }

    fn registry() -> Registry {
        let mut reg = Registry::new(ChainId(1));
        let nodes: Vec<_> = (1..=4)
            .map(|b| Node::new(addr(b), format!("http://n{b}"), NodeProps::SIGNER))
            .collect();
        reg.replace_nodes(nodes, vec![NodeWeight::default(); 4], 1)
            .unwrap();
        reg
    }

    #[test]
    fn test_timing_recorded_for_healthy_nodes_only() {
        let mut reg = registry();
        assert!(reg.record_response_time(&addr(1), 120, 0));
        assert!(!reg.record_response_time(&addr(1), 0, 0));
        assert!(!reg.record_response_time(&addr(9), 120, 0));

        reg.blacklist(NodeLocator::Address(&addr(2)), 100, 0);
        assert!(!reg.record_response_time(&addr(2), 120, 50));
        // once the timer ran out samples count again
        assert!(reg.record_response_time(&addr(2), 120, 200));

        let (_, w) = reg.get(&addr(1)).unwrap();
        assert_eq!((w.response_count, w.total_response_time), (1, 120));
    }

    #[test]
    fn test_single_report_does_not_blacklist() {
        let mut reg = registry();
        assert_eq!(
            reg.report_offline(addr(1), addr(3), 100, 0),
            OfflineOutcome::Recorded
        );
        assert_eq!(
            reg.report_offline(addr(1), addr(3), 100, 0),
            OfflineOutcome::Ignored
        );
        assert_eq!(reg.blacklisted_count(0), 0);
        assert_eq!(reg.offline_reports().len(), 1);
    }

    #[test]
    fn test_second_reporter_corroborates() {
        let mut reg = registry();
        reg.report_offline(addr(1), addr(3), 100, 0);
        reg.report_offline(addr(2), addr(4), 100, 0);
        assert_eq!(
            reg.report_offline(addr(2), addr(3), 100, 0),
            OfflineOutcome::Corroborated
        );
        assert!(reg.get(&addr(3)).unwrap().1.is_blacklisted(0));
        assert_eq!(
            reg.offline_reports(),
            &[OfflineReport {
                reporter: addr(2),
                offline: addr(4)
            }]
        );
    }

    #[test]
    fn test_self_and_unknown_reports_ignored() {
        let mut reg = registry();
        assert_eq!(
            reg.report_offline(addr(1), addr(1), 100, 0),
            OfflineOutcome::Ignored
        );
        assert_eq!(
            reg.report_offline(addr(1), addr(9), 100, 0),
            OfflineOutcome::Ignored
        );
        assert!(reg.offline_reports().is_empty());
    }
}
