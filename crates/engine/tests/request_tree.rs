//! End-to-end behaviour of request trees against scripted nodes.

mod harness;

use harness::{Harness, CHAIN};
use meshrpc_core::{ContextId, ErrorKind, RpcRequest, TransportResponse};
use meshrpc_engine::{ContextKind, ContextState, RequestTree, Verification, GIVE_UP_PREFIX};
use meshrpc_test_helpers::byzantine::{
    EchoSigner, FailingSigner, OfflineReportingVerifier, RejectNodesVerifier, RequireVerifier,
    SignatureVerifier,
};
use meshrpc_test_helpers::fixtures::{error_response, ok, result_response, unreachable};
use meshrpc_test_helpers::TestNodes;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing_test::traced_test;

/// Every node answers every call with `result`.
fn answering(result: Value) -> impl Fn(&str, &[RpcRequest]) -> TransportResponse + Send + Sync {
    move |_, reqs| {
        let items: Vec<Value> = (1..=reqs.len() as u64)
            .map(|id| result_response(id, result.clone()))
            .collect();
        ok(&items, 20)
    }
}

fn harness(
    size: usize,
    handler: impl Fn(&str, &[RpcRequest]) -> TransportResponse + Send + Sync + 'static,
) -> Harness {
    let nodes = TestNodes::new(size, 11);
    let registry = nodes.registry(CHAIN, 100);
    Harness::new(nodes, registry, handler)
}

// ═══════════════════════════════════════════════════════════════════════════
// Plain calls
// ═══════════════════════════════════════════════════════════════════════════

#[traced_test]
#[test]
fn test_single_call_succeeds() {
    let mut h = harness(3, answering(json!("0x10")));
    let (tree, outcome) = h.call("eth_blockNumber", json!([]));

    outcome.unwrap();
    assert_eq!(tree.state(), ContextState::Success);
    assert_eq!(tree.result(0).unwrap(), json!("0x10"));
    assert_eq!(tree.len(), 1);
    assert_eq!(tree.root().attempt(), 1);
    assert_eq!(h.transport.call_count(), 1);
    assert!(tree.root().answered_by().is_some());
}

#[test]
fn test_batch_results_keep_order() {
    let mut h = harness(2, |_, reqs| {
        let items: Vec<Value> = reqs
            .iter()
            .enumerate()
            .map(|(i, r)| result_response(i as u64 + 1, json!(r.method)))
            .collect();
        ok(&items, 5)
    });
    let mut tree = RequestTree::parse(
        r#"[{"method":"eth_chainId","params":[]},{"method":"eth_gasPrice","params":[]}]"#,
    )
    .unwrap();
    h.run(&mut tree).unwrap();

    let results: Vec<Value> = tree.results().unwrap().into_iter().map(Result::unwrap).collect();
    assert_eq!(results, vec![json!("eth_chainId"), json!("eth_gasPrice")]);
}

#[test]
fn test_user_error_is_an_answer() {
    let mut h = harness(3, |_, _| ok(&[error_response(1, "execution reverted")], 5));
    let (tree, outcome) = h.call("eth_call", json!([{"to": "0x01"}, "latest"]));

    outcome.unwrap();
    let err = tree.result(0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteRejected);
    assert_eq!(err.message(), "execution reverted");
    assert_eq!(h.blacklisted(), 0);
    assert_eq!(h.transport.call_count(), 1);
}

#[test]
fn test_result_index_out_of_range() {
    let mut h = harness(1, answering(json!(1)));
    let (tree, _) = h.call("eth_chainId", json!([]));
    assert_eq!(tree.result(3).unwrap_err().kind(), ErrorKind::NotFound);
}

// ═══════════════════════════════════════════════════════════════════════════
// Misbehaving nodes
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_server_errors_blacklist_and_later_slot_answers() {
    let nodes = TestNodes::new(3, 11);
    let lookup = nodes.clone();
    let mut h = Harness::new(nodes.clone(), nodes.registry(CHAIN, 100), move |url, _| {
        match lookup.index_of_url(url) {
            Some(2) => ok(&[result_response(1, json!("0x2a"))], 10),
            _ => ok(&[error_response(1, "Error: upstream unavailable")], 10),
        }
    })
    .with_config(|c| c.with_request_count(3));

    let (tree, outcome) = h.call("eth_blockNumber", json!([]));
    outcome.unwrap();
    assert_eq!(h.answered_by(&tree), 2);
    assert!(h.is_blacklisted(0));
    assert!(h.is_blacklisted(1));
    assert!(!h.is_blacklisted(2));
    assert_eq!(tree.root().attempt(), 1);
}

#[test]
fn test_malformed_body_blacklists() {
    let nodes = TestNodes::new(2, 11);
    let lookup = nodes.clone();
    let mut h = Harness::new(nodes.clone(), nodes.registry(CHAIN, 100), move |url, _| {
        match lookup.index_of_url(url) {
            Some(0) => TransportResponse::ok("<html>bad gateway</html>", 3),
            _ => ok(&[result_response(1, json!(true))], 3),
        }
    })
    .with_config(|c| c.with_request_count(2));

    let (tree, outcome) = h.call("net_listening", json!([]));
    outcome.unwrap();
    assert_eq!(h.answered_by(&tree), 1);
    assert!(h.is_blacklisted(0));
}

#[test]
fn test_liars_are_blacklisted_until_honest_node_answers() {
    let nodes = TestNodes::new(4, 11);
    let liars = (0..3).map(|i| nodes.address(i));
    let mut h = Harness::new(nodes.clone(), nodes.registry(CHAIN, 100), answering(json!("0x1")))
        .with_verifier(Arc::new(RejectNodesVerifier::new(liars)))
        .with_config(|c| c.with_verification(Verification::Proof));

    let (tree, outcome) = h.call("eth_getBalance", json!(["0x01", "latest"]));
    outcome.unwrap();
    assert_eq!(h.answered_by(&tree), 3);
    let attempts = tree.root().attempt();
    assert!((1..=4).contains(&attempts));
    // every failed attempt hit a different liar
    assert_eq!(h.blacklisted(), attempts as usize - 1);
}

#[traced_test]
#[test]
fn test_gives_up_after_max_attempts() {
    let nodes = TestNodes::new(10, 11);
    let everyone = nodes.addresses().to_vec();
    let mut h = Harness::new(nodes.clone(), nodes.registry(CHAIN, 100), answering(json!("0x1")))
        .with_verifier(Arc::new(RejectNodesVerifier::new(everyone)))
        .with_config(|c| c.with_verification(Verification::Proof).with_max_attempts(3));

    let (tree, outcome) = h.call("eth_getBalance", json!(["0x01", "latest"]));
    let err = outcome.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unverifiable);
    assert!(err.message().starts_with(GIVE_UP_PREFIX), "{err}");
    assert_eq!(tree.root().attempt(), 3);
    assert_eq!(h.transport.call_count(), 3);
    assert_eq!(tree.result(0).unwrap_err(), err);
}

#[test]
fn test_unreachable_nodes_exhaust_attempts() {
    let mut h = harness(2, |_, _| unreachable()).with_config(|c| c.with_request_count(2));
    let (tree, outcome) = h.call("eth_blockNumber", json!([]));

    let err = outcome.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteRejected);
    assert!(err.message().starts_with(GIVE_UP_PREFIX));
    // blacklisting everyone trips the failsafe, so every attempt is dispatched
    assert_eq!(tree.root().attempt(), h.config.max_attempts);
}

#[test]
fn test_no_verifier_under_proof_is_terminal() {
    let mut h = harness(3, answering(json!("0x1")))
        .with_config(|c| c.with_verification(Verification::Proof));
    let (_, outcome) = h.call("eth_blockNumber", json!([]));

    let err = outcome.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unverifiable);
    assert!(err.message().contains("eth_blockNumber"));
    assert_eq!(h.transport.call_count(), 1);
    assert_eq!(h.blacklisted(), 0);
}

#[test]
fn test_no_eligible_nodes() {
    let mut h = harness(3, answering(json!("0x1")))
        .with_config(|c| c.with_request_count(1));
    h.config.min_deposit = u64::MAX;
    let (_, outcome) = h.call("eth_blockNumber", json!([]));
    assert_eq!(outcome.unwrap_err().kind(), ErrorKind::NoEligibleNodes);
    assert_eq!(h.transport.call_count(), 0);
}

// ═══════════════════════════════════════════════════════════════════════════
// Sub-requests
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_shared_dependency_is_sent_once() {
    let mut h = harness(3, answering(json!("0x5")))
        .with_verifier(Arc::new(
            RequireVerifier::new("eth_getBlockByNumber", json!(["latest", false]))
                .only_for("eth_getBalance"),
        ))
        .with_config(|c| c.with_request_count(2));

    let mut tree = RequestTree::parse(
        r#"[{"method":"eth_getBalance","params":["0x01","latest"]},
            {"method":"eth_getBalance","params":["0x02","latest"]}]"#,
    )
    .unwrap();
    h.run(&mut tree).unwrap();

    let sent = h.transport.sent_methods();
    let block_calls = sent.iter().filter(|m| *m == "eth_getBlockByNumber").count();
    assert_eq!(block_calls, 1, "sent: {sent:?}");
    assert_eq!(tree.len(), 2);
    assert_eq!(tree.context(ContextId(1)).unwrap().state(), ContextState::Success);
    assert_eq!(tree.result(1).unwrap(), json!("0x5"));
}

#[test]
fn test_failed_dependency_rejects_and_retries() {
    let nodes = TestNodes::new(3, 11);
    let mut h = Harness::new(nodes.clone(), nodes.registry(CHAIN, 100), |_, reqs| {
        if reqs[0].method == "eth_getBlockByNumber" {
            unreachable()
        } else {
            ok(&[result_response(1, json!("0x1"))], 5)
        }
    })
    .with_verifier(Arc::new(
        RequireVerifier::new("eth_getBlockByNumber", json!(["latest", false]))
            .only_for("eth_getBalance"),
    ))
    .with_config(|c| c.with_max_attempts(2));

    let (tree, outcome) = h.call("eth_getBalance", json!(["0x01", "latest"]));
    let err = outcome.unwrap_err();
    assert!(err.message().contains("dependency failed"), "{err}");
    // the failed dependency is reused, not re-sent, on the second attempt
    let dependency = tree.context(ContextId(1)).unwrap();
    assert_eq!(dependency.state(), ContextState::Error);
    assert_eq!(tree.len(), 2);
}

#[test]
fn test_signature_sub_request() {
    let signer = Arc::new(EchoSigner::default());
    let mut h = harness(2, answering(json!("0xbeef")))
        .with_verifier(Arc::new(SignatureVerifier))
        .with_signer(signer.clone())
        .with_config(|c| c.with_verification(Verification::Proof));

    let (tree, outcome) = h.call("eth_getCode", json!(["0x01", "latest"]));
    outcome.unwrap();
    assert_eq!(signer.calls(), 1);

    let node = tree.root().answered_by().unwrap();
    let sign = tree
        .contexts()
        .find(|c| matches!(c.kind(), ContextKind::Sign { .. }))
        .expect("a signing context");
    let mut expected = node.as_bytes().to_vec();
    expected.extend_from_slice(b"\"0xbeef\"");
    assert_eq!(sign.signature(), Some(expected.as_slice()));
}

#[test]
fn test_failing_signer_fails_request() {
    let mut h = harness(2, answering(json!("0xbeef")))
        .with_verifier(Arc::new(SignatureVerifier))
        .with_signer(Arc::new(FailingSigner))
        .with_config(|c| c.with_verification(Verification::Proof));

    let (_, outcome) = h.call("eth_getCode", json!(["0x01", "latest"]));
    let err = outcome.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
    assert!(err.message().starts_with("Error signing:"), "{err}");
}

// ═══════════════════════════════════════════════════════════════════════════
// Offline reports
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_offline_report_needs_corroboration() {
    let nodes = TestNodes::new(3, 11);
    let offline = nodes.address(2);
    let mut h = Harness::new(nodes.clone(), nodes.registry(CHAIN, 100), answering(json!("0x1")))
        .with_verifier(Arc::new(OfflineReportingVerifier { offline }))
        .with_config(|c| c.with_request_count(3));

    // node 0 answers first and reports node 2
    let (tree, outcome) = h.call("eth_blockNumber", json!([]));
    outcome.unwrap();
    assert_eq!(h.answered_by(&tree), 0);
    assert_eq!(h.registry.with(|r| r.offline_reports().len()), 1);
    assert!(!h.is_blacklisted(2));

    // node 1 backs the claim
    let preselect = BTreeSet::from([nodes.address(1), nodes.address(2)]);
    h.registry.with_mut(|r| r.set_pre_filter(Some(preselect)));
    let (tree, outcome) = h.call("eth_blockNumber", json!([]));
    outcome.unwrap();
    assert_eq!(h.answered_by(&tree), 1);
    assert!(h.is_blacklisted(2));
    assert!(h.registry.with(|r| r.offline_reports().is_empty()));
}

#[test]
fn test_response_times_recorded() {
    let mut h = harness(1, answering(json!("0x1")));
    h.call("eth_blockNumber", json!([])).1.unwrap();
    h.call("eth_blockNumber", json!([])).1.unwrap();

    let address = h.nodes.address(0);
    let (count, avg) = h.registry.with(|r| {
        let (_, w) = r.get(&address).unwrap();
        (w.response_count, w.avg_response_time())
    });
    assert_eq!(count, 2);
    assert_eq!(avg, Some(20));
}
