//! Client construction, registry sharing and the blocking driver.

use meshrpc_cache_memory::MemoryCacheStore;
use meshrpc_client::{Client, ClientConfig, NodeConfig, NodeRegistryConfig};
use meshrpc_core::{
    Action, CacheStore, Collaborators, ErrorKind, ManualClock, RpcRequest, NODELIST_METHOD,
};
use meshrpc_engine::{StepOutcome, GIVE_UP_PREFIX};
use meshrpc_registry::{cache, NodeLocator, Registry, RegistryStore};
use meshrpc_test_helpers::byzantine::{DecliningTransport, ScriptedTransport};
use meshrpc_test_helpers::fixtures::{nodelist_result, ok, result_response};
use meshrpc_test_helpers::TestNodes;
use meshrpc_types::ChainId;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing_test::traced_test;

const CHAIN: ChainId = ChainId(1);
const NOW: u64 = 1_700_000_000;

fn boot(nodes: &TestNodes, i: usize) -> NodeConfig {
    NodeConfig {
        url: nodes.url(i),
        address: nodes.address(i),
        props: nodes.node(i).props,
    }
}

/// Serves `nodes` at block 500 for refreshes and echoes the method otherwise.
fn serving(nodes: TestNodes) -> Arc<ScriptedTransport> {
    Arc::new(ScriptedTransport::new(move |_, reqs: &[RpcRequest]| {
        if reqs[0].method == NODELIST_METHOD {
            return ok(&[result_response(1, nodelist_result(&nodes.entries(), 500))], 30);
        }
        let items: Vec<Value> = reqs
            .iter()
            .enumerate()
            .map(|(i, r)| result_response(i as u64 + 1, json!(r.method)))
            .collect();
        ok(&items, 10)
    }))
}

fn client(
    store: &RegistryStore,
    config: ClientConfig,
    collaborators: Collaborators,
) -> Client {
    Client::new(
        store,
        config,
        collaborators,
        Arc::new(ManualClock::new(NOW)),
    )
    .unwrap()
}

// ═══════════════════════════════════════════════════════════════════════════
// Registry binding
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_clients_share_registry() {
    let nodes = TestNodes::new(3, 5);
    let store = RegistryStore::new();
    let config = ClientConfig::new(CHAIN).with_boot_nodes(vec![boot(&nodes, 0)]);

    let a = client(&store, config.clone(), Collaborators::new());
    let b = client(&store, config, Collaborators::new());
    assert!(a.is_shared() && b.is_shared());
    assert_eq!(store.ref_count(CHAIN), 2);

    let address = nodes.address(0);
    a.registry()
        .with_mut(|r| r.blacklist(NodeLocator::Address(&address), 60, NOW));
    assert_eq!(b.registry().with(|r| r.blacklisted_count(NOW)), 1);

    drop(a);
    assert_eq!(store.ref_count(CHAIN), 1);
    drop(b);
    assert!(store.is_empty());
}

#[test]
fn test_boot_nodes_only_fill_empty_registry() {
    let nodes = TestNodes::new(2, 5);
    let store = RegistryStore::new();
    let first = client(
        &store,
        ClientConfig::new(CHAIN).with_boot_nodes(vec![boot(&nodes, 0)]),
        Collaborators::new(),
    );
    let second = client(
        &store,
        ClientConfig::new(CHAIN).with_boot_nodes(vec![boot(&nodes, 1)]),
        Collaborators::new(),
    );

    assert!(second.is_shared());
    let installed = second.registry().with(|r| r.nodes()[0].address);
    assert_eq!(installed, nodes.address(0));
    assert_eq!(first.registry().with(Registry::len), 1);
}

#[test]
fn test_node_list_detaches_private_copy() {
    let nodes = TestNodes::new(3, 5);
    let store = RegistryStore::new();
    let shared = client(
        &store,
        ClientConfig::new(CHAIN).with_boot_nodes(vec![boot(&nodes, 0)]),
        Collaborators::new(),
    );
    let private = client(
        &store,
        ClientConfig::new(CHAIN).with_node_registry(NodeRegistryConfig {
            node_list: Some(vec![boot(&nodes, 1), boot(&nodes, 2)]),
            avg_block_time: Some(2),
            ..Default::default()
        }),
        Collaborators::new(),
    );

    assert!(!private.is_shared());
    assert_eq!(store.ref_count(CHAIN), 1);
    assert_eq!(private.registry().with(Registry::len), 2);
    assert_eq!(private.registry().with(Registry::avg_block_time), 2);
    assert_eq!(shared.registry().with(Registry::len), 1);
    assert_eq!(shared.registry().with(Registry::avg_block_time), 15);
}

#[test]
fn test_preselection_restricts_private_registry() {
    let nodes = TestNodes::new(4, 5);
    let store = RegistryStore::new();
    let transport = serving(nodes.clone());
    let shared = client(
        &store,
        ClientConfig::new(CHAIN).with_boot_nodes(vec![boot(&nodes, 2)]),
        Collaborators::new(),
    );
    let mut config = ClientConfig::new(CHAIN).with_seed(1);
    config.preselect_nodes = Some(vec![nodes.address(2)]);
    let c = client(
        &store,
        config,
        Collaborators::new().with_transport(transport.clone()),
    );

    assert!(!c.is_shared());
    assert!(shared.registry().with(|r| r.pre_filter().is_none()));
    for _ in 0..3 {
        c.call("eth_blockNumber", json!([])).unwrap();
    }
    assert_eq!(c.registry().with(Registry::len), 4);
    let urls: Vec<String> = transport.calls().into_iter().flat_map(|(u, _)| u).collect();
    assert!(!urls.is_empty());
    assert!(urls.iter().all(|u| *u == nodes.url(2)), "{urls:?}");
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = ClientConfig::new(CHAIN);
    config.request_count = 0;
    let err = Client::new(
        &RegistryStore::new(),
        config,
        Collaborators::new(),
        Arc::new(ManualClock::new(NOW)),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

// ═══════════════════════════════════════════════════════════════════════════
// Cache restore
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_restores_cached_node_list() {
    let nodes = TestNodes::new(4, 5);
    let cache_store = MemoryCacheStore::new();
    cache_store.set(
        &cache::cache_key(CHAIN),
        &cache::encode(&nodes.registry(CHAIN, 300)),
    );
    let transport = serving(nodes.clone());
    let collaborators = Collaborators::new()
        .with_transport(transport.clone())
        .with_cache(Arc::new(cache_store));

    let c = client(
        &RegistryStore::new(),
        ClientConfig::new(CHAIN)
            .with_boot_nodes(vec![boot(&nodes, 0)])
            .with_seed(1),
        collaborators,
    );
    let (len, last_block, first) = c
        .registry()
        .with(|r| (r.len(), r.last_block(), r.is_first_update()));
    assert_eq!((len, last_block, first), (4, 300, false));

    // no refresh needed before answering
    assert_eq!(c.call("eth_chainId", json!([])).unwrap(), json!("eth_chainId"));
    assert_eq!(transport.sent_methods(), vec!["eth_chainId".to_string()]);
}

#[test]
fn test_corrupt_cache_is_ignored() {
    let nodes = TestNodes::new(2, 5);
    let cache_store = MemoryCacheStore::new();
    cache_store.set(&cache::cache_key(CHAIN), &[0xff, 0x00, 0x01]);

    let c = client(
        &RegistryStore::new(),
        ClientConfig::new(CHAIN).with_boot_nodes(vec![boot(&nodes, 0)]),
        Collaborators::new().with_cache(Arc::new(cache_store)),
    );
    let (len, first) = c.registry().with(|r| (r.len(), r.is_first_update()));
    assert_eq!((len, first), (1, true));
}

#[test]
fn test_needs_update_overrides_cache() {
    let nodes = TestNodes::new(3, 5);
    let cache_store = MemoryCacheStore::new();
    cache_store.set(
        &cache::cache_key(CHAIN),
        &cache::encode(&nodes.registry(CHAIN, 300)),
    );
    let c = client(
        &RegistryStore::new(),
        ClientConfig::new(CHAIN).with_node_registry(NodeRegistryConfig {
            needs_update: Some(true),
            ..Default::default()
        }),
        Collaborators::new().with_cache(Arc::new(cache_store)),
    );
    assert!(c.is_shared());
    let (len, first) = c.registry().with(|r| (r.len(), r.is_first_update()));
    assert_eq!((len, first), (3, true));
}

#[test]
fn test_needs_update_false_trusts_configured_list() {
    let nodes = TestNodes::new(3, 5);
    let transport = serving(nodes.clone());
    let c = client(
        &RegistryStore::new(),
        ClientConfig::new(CHAIN).with_node_registry(NodeRegistryConfig {
            node_list: Some((0..3).map(|i| boot(&nodes, i)).collect()),
            needs_update: Some(false),
            ..Default::default()
        }),
        Collaborators::new().with_transport(transport.clone()),
    );
    assert!(!c.is_shared());
    assert!(!c.registry().with(Registry::is_first_update));

    assert_eq!(c.call("eth_chainId", json!([])).unwrap(), json!("eth_chainId"));
    assert_eq!(transport.sent_methods(), vec!["eth_chainId".to_string()]);
}

// ═══════════════════════════════════════════════════════════════════════════
// Driving requests
// ═══════════════════════════════════════════════════════════════════════════

#[traced_test]
#[test]
fn test_first_call_refreshes_then_answers() {
    let nodes = TestNodes::new(4, 5);
    let transport = serving(nodes.clone());
    let cache_store = MemoryCacheStore::new();
    let c = client(
        &RegistryStore::new(),
        ClientConfig::new(CHAIN)
            .with_boot_nodes(vec![boot(&nodes, 2)])
            .with_seed(3),
        Collaborators::new()
            .with_transport(transport.clone())
            .with_cache(Arc::new(cache_store.clone())),
    );

    assert_eq!(c.call("eth_blockNumber", json!([])).unwrap(), json!("eth_blockNumber"));
    assert_eq!(
        transport.sent_methods(),
        vec![NODELIST_METHOD.to_string(), "eth_blockNumber".to_string()]
    );
    assert_eq!(transport.calls()[0].0, vec![nodes.url(2)]);
    assert_eq!(c.registry().with(Registry::len), 4);
    assert!(cache_store.get(&cache::cache_key(CHAIN)).is_some());
}

#[test]
fn test_manual_step_and_perform() {
    let nodes = TestNodes::new(3, 5);
    let store = RegistryStore::new();
    let c = client(
        &store,
        ClientConfig::new(CHAIN).with_seed(9),
        Collaborators::new().with_transport(serving(nodes.clone())),
    );
    c.registry().with_mut(|r| {
        r.adopt(nodes.registry(CHAIN, 100));
    });

    let mut tree = c.create_request("net_version", json!([])).unwrap();
    let actions = match c.step(&mut tree).unwrap() {
        StepOutcome::Waiting(actions) => actions,
        StepOutcome::Done => panic!("nothing was sent yet"),
    };
    assert_eq!(actions.len(), 1);
    assert!(matches!(&actions[0], Action::Send { urls, .. } if urls.len() == 1));
    for action in actions {
        c.perform(&mut tree, action).unwrap();
    }
    assert!(matches!(c.step(&mut tree).unwrap(), StepOutcome::Done));
    assert_eq!(tree.result(0).unwrap(), json!("net_version"));
}

#[test]
fn test_batch_call_keeps_order() {
    let nodes = TestNodes::new(2, 5);
    let c = client(
        &RegistryStore::new(),
        ClientConfig::new(CHAIN).with_seed(2),
        Collaborators::new().with_transport(serving(nodes.clone())),
    );
    c.registry().with_mut(|r| {
        r.adopt(nodes.registry(CHAIN, 100));
    });

    let results: Vec<Value> = c
        .call_batch(vec![
            RpcRequest::new("eth_chainId", json!([])),
            RpcRequest::new("eth_gasPrice", json!([])),
        ])
        .unwrap()
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(results, vec![json!("eth_chainId"), json!("eth_gasPrice")]);
}

#[test]
fn test_transport_failure_exhausts_attempts() {
    let nodes = TestNodes::new(3, 5);
    let mut config = ClientConfig::new(CHAIN).with_seed(4);
    config.max_attempts = 2;
    let c = client(
        &RegistryStore::new(),
        config,
        Collaborators::new().with_transport(Arc::new(DecliningTransport)),
    );
    c.registry().with_mut(|r| {
        r.adopt(nodes.registry(CHAIN, 100));
    });

    let err = c.call("eth_chainId", json!([])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteRejected);
    assert!(err.message().starts_with(GIVE_UP_PREFIX), "{err}");
    assert_eq!(c.registry().with(|r| r.blacklisted_count(NOW)), 2);
}

#[test]
fn test_seeded_clients_pick_identically() {
    let nodes = TestNodes::new(6, 5);
    let picks = |seed: u64| {
        let transport = serving(nodes.clone());
        let c = client(
            &RegistryStore::new(),
            ClientConfig::new(CHAIN).with_seed(seed),
            Collaborators::new().with_transport(transport.clone()),
        );
        c.registry().with_mut(|r| {
            r.adopt(nodes.registry(CHAIN, 100));
        });
        for _ in 0..8 {
            c.call("eth_chainId", json!([])).unwrap();
        }
        transport
            .calls()
            .into_iter()
            .map(|(urls, _)| urls)
            .collect::<Vec<_>>()
    };
    assert_eq!(picks(42), picks(42));
}

