//! Metrics facade for meshrpc.
//!
//! Provides a [`MetricsRecorder`] trait with domain-specific methods and default
//! no-op implementations. A global singleton recorder is accessed via [`recorder()`],
//! and convenience free functions delegate to it.
//!
//! # Usage
//!
//! Callers record metrics via free functions:
//! ```ignore
//! meshrpc_metrics::record_nodes_selected(2);
//! meshrpc_metrics::record_node_blacklisted("verification");
//! ```
//!
//! At startup, an embedding application may install its own backend:
//! ```ignore
//! meshrpc_metrics::set_global_recorder(Box::new(MyPrometheusRecorder::new()));
//! ```
//!
//! Nothing is recorded until a backend is installed.

use std::sync::OnceLock;

// ═══════════════════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════════════════

/// Outcome of a node-list refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// A newer list was installed.
    Applied,
    /// The response was valid but not newer than the current list.
    Unchanged,
    /// The refresh failed and the reporting node was penalized.
    Penalized,
    /// The first refresh failed and the error reached the caller.
    Failed,
}

impl UpdateOutcome {
    /// Label for backends that key series by string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Unchanged => "unchanged",
            Self::Penalized => "penalized",
            Self::Failed => "failed",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Trait
// ═══════════════════════════════════════════════════════════════════════

/// Domain-specific metrics recording trait.
///
/// All methods have default no-op implementations so backends only need
/// to override the metrics they care about.
#[allow(unused_variables)]
pub trait MetricsRecorder: Send + Sync + 'static {
    // ── Registry ─────────────────────────────────────────────────────

    /// Set the node count of a registry after a replacement.
    fn set_registry_size(&self, chain_id: u64, nodes: usize) {}

    /// Record a node being blacklisted.
    fn record_node_blacklisted(&self, reason: &str) {}

    /// Record an offline report, and whether it was corroborated.
    fn record_offline_report(&self, corroborated: bool) {}

    /// Record a timed response feeding reputation.
    fn record_response_time(&self, elapsed_ms: u32) {}

    /// Record a registry written to the cache store.
    fn record_cache_persisted(&self) {}

    // ── Selection ────────────────────────────────────────────────────

    /// Record a successful pick.
    fn record_nodes_selected(&self, count: usize) {}

    /// Record the blacklist-clearing failsafe firing.
    fn record_selection_failsafe(&self) {}

    // ── Staleness ────────────────────────────────────────────────────

    /// Record a node-list refresh being scheduled.
    fn record_update_scheduled(&self, wait_secs: u64) {}

    /// Record the result of a node-list refresh.
    fn record_nodelist_update(&self, outcome: UpdateOutcome) {}

    // ── Requests ─────────────────────────────────────────────────────

    /// Record a request dispatched to the transport.
    fn record_request_attempt(&self, method: &str) {}

    /// Record a retry on a fresh node set.
    fn record_request_retry(&self, reason: &str) {}

    /// Record a root request reaching a terminal state.
    fn record_request_finished(&self, success: bool) {}

    /// Record a sub-request satisfied by an existing sibling.
    fn record_dedup_hit(&self) {}
}

// ═══════════════════════════════════════════════════════════════════════
// Global singleton
// ═══════════════════════════════════════════════════════════════════════

struct NoopRecorder;
impl MetricsRecorder for NoopRecorder {}

static RECORDER: OnceLock<Box<dyn MetricsRecorder>> = OnceLock::new();

/// Install a global metrics recorder.
///
/// Can only be called once. Subsequent calls are silently ignored.
pub fn set_global_recorder(recorder: Box<dyn MetricsRecorder>) {
    let _ = RECORDER.set(recorder);
}

/// Get the global metrics recorder.
///
/// Returns a no-op recorder if none has been installed.
#[inline]
fn recorder() -> &'static dyn MetricsRecorder {
    RECORDER.get().map(|r| r.as_ref()).unwrap_or(&NoopRecorder)
}

// ═══════════════════════════════════════════════════════════════════════
// Convenience free functions
// ═══════════════════════════════════════════════════════════════════════

// ── Registry ─────────────────────────────────────────────────────────

/// Set the node count of a registry after a replacement.
#[inline]
pub fn set_registry_size(chain_id: u64, nodes: usize) {
    recorder().set_registry_size(chain_id, nodes);
}

/// Record a node being blacklisted.
#[inline]
pub fn record_node_blacklisted(reason: &str) {
    recorder().record_node_blacklisted(reason);
}

/// Record an offline report.
#[inline]
pub fn record_offline_report(corroborated: bool) {
    recorder().record_offline_report(corroborated);
}

/// Record a timed response.
#[inline]
pub fn record_response_time(elapsed_ms: u32) {
    recorder().record_response_time(elapsed_ms);
}

/// Record a registry written to the cache store.
#[inline]
pub fn record_cache_persisted() {
    recorder().record_cache_persisted();
}

// ── Selection ────────────────────────────────────────────────────────

/// Record a successful pick.
#[inline]
pub fn record_nodes_selected(count: usize) {
    recorder().record_nodes_selected(count);
}

/// Record the blacklist-clearing failsafe firing.
#[inline]
pub fn record_selection_failsafe() {
    recorder().record_selection_failsafe();
}

// ── Staleness ────────────────────────────────────────────────────────

/// Record a node-list refresh being scheduled.
#[inline]
pub fn record_update_scheduled(wait_secs: u64) {
    recorder().record_update_scheduled(wait_secs);
}

/// Record the result of a node-list refresh.
#[inline]
pub fn record_nodelist_update(outcome: UpdateOutcome) {
    recorder().record_nodelist_update(outcome);
}

// ── Requests ─────────────────────────────────────────────────────────

/// Record a request dispatched to the transport.
#[inline]
pub fn record_request_attempt(method: &str) {
    recorder().record_request_attempt(method);
}

/// Record a retry on a fresh node set.
#[inline]
pub fn record_request_retry(reason: &str) {
    recorder().record_request_retry(reason);
}

/// Record a root request reaching a terminal state.
#[inline]
pub fn record_request_finished(success: bool) {
    recorder().record_request_finished(success);
}

/// Record a sub-request satisfied by an existing sibling.
#[inline]
pub fn record_dedup_hit() {
    recorder().record_dedup_hit();
}
