//! Node-list refreshes driven from inside request trees.

mod harness;

use harness::{Harness, CHAIN};
use meshrpc_cache_memory::MemoryCacheStore;
use meshrpc_core::{ErrorKind, RpcRequest, TransportResponse, NODELIST_METHOD};
use meshrpc_engine::{GIVE_UP_PREFIX, UPDATE_ERROR_PREFIX};
use meshrpc_registry::{cache, Registry};
use meshrpc_test_helpers::fixtures::{
    meta, nodelist_result, ok, result_response, result_response_with_meta, unreachable,
};
use meshrpc_test_helpers::TestNodes;
use meshrpc_types::NodeWeight;
use serde_json::json;
use tracing_test::traced_test;

/// Registry holding the first `n` of `nodes` at block 100.
fn partial_registry(nodes: &TestNodes, n: usize) -> Registry {
    let mut registry = Registry::new(CHAIN);
    registry
        .replace_nodes(
            (0..n).map(|i| nodes.node(i)).collect(),
            vec![NodeWeight::default(); n],
            100,
        )
        .unwrap();
    registry.clear_pending_update();
    registry
}

/// Nodes serve `list` for refreshes and report a change at block 200 on calls.
fn serving(
    list: Option<(TestNodes, u64)>,
) -> impl Fn(&str, &[RpcRequest]) -> TransportResponse + Send + Sync + 'static {
    move |_, reqs| {
        if reqs[0].method == NODELIST_METHOD {
            return match &list {
                Some((nodes, block)) => {
                    ok(&[result_response(1, nodelist_result(&nodes.entries(), *block))], 30)
                }
                None => unreachable(),
            };
        }
        ok(&[result_response_with_meta(1, json!("0x1"), meta(200, 1_000))], 10)
    }
}

fn nodelist_calls(h: &Harness) -> Vec<Vec<String>> {
    h.transport
        .calls()
        .into_iter()
        .filter(|(_, payload)| payload.contains(NODELIST_METHOD))
        .map(|(urls, _)| urls)
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// First update
// ═══════════════════════════════════════════════════════════════════════════

#[traced_test]
#[test]
fn test_first_update_installs_list_and_persists() {
    let nodes = TestNodes::new(4, 3);
    let store = MemoryCacheStore::new();
    let mut h = Harness::new(
        nodes.clone(),
        nodes.boot_registry(CHAIN, 0),
        serving(Some((nodes.clone(), 500))),
    )
    .with_cache(store.clone());

    let (tree, outcome) = h.call("eth_blockNumber", json!([]));
    outcome.unwrap();
    assert_eq!(tree.result(0).unwrap(), json!("0x1"));
    assert_eq!(
        h.transport.sent_methods(),
        vec![NODELIST_METHOD.to_string(), "eth_blockNumber".to_string()]
    );
    assert_eq!(nodelist_calls(&h), vec![vec![nodes.url(0)]]);

    let (len, last_block, first) = h
        .registry
        .with(|r| (r.len(), r.last_block(), r.is_first_update()));
    assert_eq!((len, last_block, first), (4, 500, false));

    let bytes = store
        .snapshot()
        .get(&cache::cache_key(CHAIN))
        .expect("registry persisted")
        .to_vec();
    let restored = cache::decode(CHAIN, &bytes).unwrap();
    assert_eq!(restored.len(), 4);
    assert_eq!(restored.last_block(), 500);
}

#[test]
fn test_first_update_failure_surfaces() {
    let nodes = TestNodes::new(2, 3);
    let mut h = Harness::new(nodes.clone(), nodes.boot_registry(CHAIN, 0), serving(None))
        .with_config(|c| c.with_max_attempts(2));

    let (_, outcome) = h.call("eth_blockNumber", json!([]));
    let err = outcome.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteRejected);
    let prefix = format!("{UPDATE_ERROR_PREFIX}:{GIVE_UP_PREFIX}:");
    assert!(err.message().starts_with(&prefix), "{err}");

    // the caller's call never left
    assert!(h.transport.sent_methods().iter().all(|m| m == NODELIST_METHOD));
    assert_eq!(h.transport.call_count(), 2);
    assert!(h.registry.with(Registry::is_first_update));
}

#[test]
fn test_auto_update_disabled_uses_boot_nodes() {
    let nodes = TestNodes::new(2, 3);
    let mut h = Harness::new(nodes.clone(), nodes.boot_registry(CHAIN, 1), serving(None))
        .with_config(|mut c| {
            c.auto_update_list = false;
            c
        });

    let (tree, outcome) = h.call("eth_chainId", json!([]));
    outcome.unwrap();
    assert_eq!(h.answered_by(&tree), 1);
    assert_eq!(h.transport.sent_methods(), vec!["eth_chainId".to_string()]);
}

// ═══════════════════════════════════════════════════════════════════════════
// Reported changes
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_reported_change_fetched_from_reporter() {
    let nodes = TestNodes::new(5, 3);
    let mut h = Harness::new(
        nodes.clone(),
        partial_registry(&nodes, 3),
        serving(Some((nodes.clone(), 200))),
    );

    let (tree, outcome) = h.call("eth_blockNumber", json!([]));
    outcome.unwrap();
    let reporter = h.answered_by(&tree);
    let pending = h.registry.with(|r| r.pending_update().copied()).unwrap();
    assert_eq!(pending.reporting_node, Some(nodes.address(reporter)));
    assert_eq!(pending.expected_last_block, 200);

    // enough confirmations: the refresh runs on the next call
    h.call("eth_blockNumber", json!([])).1.unwrap();
    assert_eq!(nodelist_calls(&h), vec![vec![nodes.url(reporter)]]);
    let (len, last_block, pending) = h
        .registry
        .with(|r| (r.len(), r.last_block(), r.pending_update().copied()));
    assert_eq!((len, last_block), (5, 200));
    assert!(pending.is_none());
    assert!(!h.is_blacklisted(reporter));
}

#[test]
fn test_failed_reported_change_penalizes_reporter() {
    let nodes = TestNodes::new(3, 3);
    let mut h = Harness::new(nodes.clone(), partial_registry(&nodes, 3), serving(None));

    let (tree, _) = h.call("eth_blockNumber", json!([]));
    let reporter = h.answered_by(&tree);

    // the refresh fails, the call itself still succeeds elsewhere
    let (tree, outcome) = h.call("eth_blockNumber", json!([]));
    outcome.unwrap();
    assert_ne!(h.answered_by(&tree), reporter);
    assert!(h.is_blacklisted(reporter));
    assert_eq!(h.registry.with(Registry::last_block), 100);

    // the new answer reschedules from an honest reporter
    let pending = h.registry.with(|r| r.pending_update().copied()).unwrap();
    assert_ne!(pending.reporting_node, Some(nodes.address(reporter)));
}

#[test]
fn test_shared_reported_change_failing_twice_is_absorbed() {
    let nodes = TestNodes::new(3, 3);
    let mut h = Harness::new(nodes.clone(), partial_registry(&nodes, 3), serving(None))
        .with_config(|c| c.with_max_attempts(1));

    let (tree, _) = h.call("eth_blockNumber", json!([]));
    let reporter = h.answered_by(&tree);
    let scheduled = h.registry.with(|r| r.pending_update().copied()).unwrap();

    // both trees pick up the same scheduled refresh before either resolves
    let mut a = h.tree("eth_blockNumber", json!([]));
    let mut b = h.tree("eth_blockNumber", json!([]));
    let a_actions = h.step(&mut a);
    let b_actions = h.step(&mut b);
    assert_eq!(
        h.registry.with(|r| r.pending_update().copied()),
        Some(scheduled)
    );

    h.finish(&mut a, a_actions).unwrap();
    h.finish(&mut b, b_actions).unwrap();
    assert_eq!(nodelist_calls(&h), vec![vec![nodes.url(reporter)]; 2]);
    assert!(h.is_blacklisted(reporter));
    assert_eq!(h.registry.with(Registry::last_block), 100);
    assert!(!h.registry.with(Registry::is_first_update));
}

#[test]
fn test_mismatching_list_penalizes_reporter_but_installs() {
    let nodes = TestNodes::new(4, 3);
    let mut h = Harness::new(
        nodes.clone(),
        partial_registry(&nodes, 3),
        serving(Some((nodes.clone(), 150))),
    );

    let (tree, _) = h.call("eth_blockNumber", json!([]));
    let reporter = h.answered_by(&tree);
    h.call("eth_blockNumber", json!([])).1.unwrap();

    assert!(h.is_blacklisted(reporter));
    assert_eq!(h.registry.with(Registry::last_block), 150);
    assert_eq!(h.registry.with(Registry::len), 4);
}
