//! Simulated node network with deterministic latency, loss and misbehavior.

use crate::node::{build_nodes, Behavior, NodeMix, SimNode};
use crate::NodeIndex;
use meshrpc_core::{
    CollaboratorError, RpcRequest, Transport, TransportResponse, Verdict, VerifyContext, Verifier,
    NODELIST_METHOD,
};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

/// Result every lying node returns.
const LIE: &str = "0xdeadbeef";

/// Configuration for the simulated network.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Round-trip time of a node with speed 1.
    pub base_latency: Duration,
    /// Jitter as a fraction of the node's latency (0.0 - 1.0).
    pub jitter_fraction: f64,
    /// Probability that a reachable node's answer is lost.
    pub packet_loss_rate: f64,
    /// Time a client waits before giving up on a node.
    pub timeout: Duration,
    /// Block at which the node list was last changed.
    pub node_list_block: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_latency: Duration::from_millis(120),
            jitter_fraction: 0.1,
            packet_loss_rate: 0.0,
            timeout: Duration::from_secs(2),
            node_list_block: 100,
        }
    }
}

/// What the network observed while answering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkCounters {
    /// `send` invocations.
    pub sends: u64,
    /// Individual node requests across all sends.
    pub node_requests: u64,
    /// Requests to offline nodes.
    pub offline_hits: u64,
    /// Answers lost to packet loss.
    pub dropped: u64,
    /// Wrong results handed out.
    pub lies_told: u64,
    /// Node lists served.
    pub nodelists_served: u64,
    /// Node-list requests refused.
    pub nodelists_refused: u64,
}

/// The correct answer to a request, as every honest node computes it.
pub fn canonical_result(request: &RpcRequest) -> Value {
    let input = format!("{}{}", request.method, request.params);
    let digest = blake3::hash(input.as_bytes());
    json!(format!("0x{}", &digest.to_hex()[..16]))
}

/// A network of simulated nodes, used as a client transport.
///
/// Randomness comes from one seeded generator, so a single-threaded driver
/// sees identical answers and latencies for identical request sequences.
pub struct SimulatedNetwork {
    config: NetworkConfig,
    nodes: Vec<SimNode>,
    by_url: HashMap<String, NodeIndex>,
    rng: Mutex<ChaCha8Rng>,
    current_block: AtomicU64,
    counters: Mutex<NetworkCounters>,
}

impl std::fmt::Debug for SimulatedNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedNetwork")
            .field("config", &self.config)
            .field("nodes", &self.nodes.len())
            .field("current_block", &self.current_block())
            .finish()
    }
}

impl SimulatedNetwork {
    /// Create the nodes of `mix` from `seed`.
    pub fn new(config: NetworkConfig, mix: &NodeMix, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let nodes = build_nodes(mix, &mut rng);
        let by_url = nodes.iter().map(|n| (n.url.clone(), n.index)).collect();
        let current_block = config.node_list_block + 1_000;
        Self {
            config,
            nodes,
            by_url,
            rng: Mutex::new(rng),
            current_block: AtomicU64::new(current_block),
            counters: Mutex::new(NetworkCounters::default()),
        }
    }

    /// Every node.
    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    /// Node at `index`.
    pub fn node(&self, index: NodeIndex) -> Option<&SimNode> {
        self.nodes.get(index as usize)
    }

    /// Node behind `url`.
    pub fn node_by_url(&self, url: &str) -> Option<&SimNode> {
        self.by_url.get(url).and_then(|&i| self.node(i))
    }

    /// Chain head as honest nodes report it.
    pub fn current_block(&self) -> u64 {
        self.current_block.load(Ordering::SeqCst)
    }

    /// Advance the chain head.
    pub fn advance_blocks(&self, blocks: u64) {
        self.current_block.fetch_add(blocks, Ordering::SeqCst);
    }

    /// Counters so far.
    pub fn counters(&self) -> NetworkCounters {
        self.counters.lock().clone()
    }

    /// Sample the round trip to `node`.
    pub fn sample_latency(&self, node: &SimNode, rng: &mut ChaCha8Rng) -> Duration {
        let base = self.config.base_latency.as_secs_f64() * node.speed;
        let jitter_range = base * self.config.jitter_fraction;
        let jitter = if jitter_range > 0.0 {
            rng.gen_range(-jitter_range..jitter_range)
        } else {
            0.0
        };
        Duration::from_secs_f64((base + jitter).max(0.001))
    }

    fn timeout_ms(&self) -> u32 {
        self.config.timeout.as_millis().min(u32::MAX as u128) as u32
    }

    fn answer(
        &self,
        node: &SimNode,
        requests: &[RpcRequest],
        rng: &mut ChaCha8Rng,
    ) -> TransportResponse {
        let mut counters = self.counters.lock();
        counters.node_requests += 1;
        if node.behavior == Behavior::Offline {
            counters.offline_hits += 1;
            return TransportResponse::failed(503, "connection timed out", self.timeout_ms());
        }
        if self.config.packet_loss_rate > 0.0 && rng.gen::<f64>() < self.config.packet_loss_rate {
            counters.dropped += 1;
            return TransportResponse::failed(503, "connection reset", self.timeout_ms());
        }

        let current = self.current_block();
        let meta = match node.behavior {
            // claims a node-list change at the chain head
            Behavior::StaleReporter => json!({ "lastNodeList": current, "currentBlock": current }),
            _ => json!({ "lastNodeList": self.config.node_list_block, "currentBlock": current }),
        };
        let items: Vec<Value> = requests
            .iter()
            .enumerate()
            .map(|(i, request)| {
                let id = i + 1;
                if request.method == NODELIST_METHOD {
                    if node.behavior == Behavior::StaleReporter {
                        counters.nodelists_refused += 1;
                        return json!({
                            "id": id,
                            "jsonrpc": "2.0",
                            "error": { "code": -32000, "message": "Error: node list unavailable" },
                        });
                    }
                    counters.nodelists_served += 1;
                    return json!({ "id": id, "jsonrpc": "2.0", "result": self.node_list() });
                }
                let result = if node.behavior == Behavior::Lying {
                    counters.lies_told += 1;
                    json!(LIE)
                } else {
                    canonical_result(request)
                };
                json!({ "id": id, "jsonrpc": "2.0", "result": result, "meta": meta })
            })
            .collect();
        drop(counters);

        let latency = self.sample_latency(node, rng);
        trace!(
            node = node.index,
            behavior = node.behavior.as_str(),
            latency_ms = latency.as_millis() as u64,
            "Simulated answer"
        );
        TransportResponse::ok(
            Value::Array(items).to_string(),
            latency.as_millis().min(u32::MAX as u128) as u32,
        )
    }

    fn node_list(&self) -> Value {
        let nodes: Vec<Value> = self
            .nodes
            .iter()
            .map(|node| {
                let entry = node.entry();
                json!({
                    "url": entry.url,
                    "address": entry.address.to_hex(),
                    "props": format!("0x{:x}", entry.props.bits()),
                    "deposit": entry.deposit,
                    "capacity": entry.capacity,
                })
            })
            .collect();
        json!({ "nodes": nodes, "lastBlockNumber": self.config.node_list_block })
    }
}

impl Transport for SimulatedNetwork {
    fn send(
        &self,
        urls: &[String],
        payload: &str,
    ) -> Result<Vec<TransportResponse>, CollaboratorError> {
        let requests = RpcRequest::parse_batch(payload)?;
        self.counters.lock().sends += 1;
        let mut rng = self.rng.lock();
        Ok(urls
            .iter()
            .map(|url| match self.node_by_url(url) {
                Some(node) => self.answer(node, &requests, &mut rng),
                None => TransportResponse::failed(404, format!("unknown endpoint {url}"), 0),
            })
            .collect())
    }
}

/// Checks answers against the canonical result.
///
/// Declines node-list responses; those are trusted by construction.
#[derive(Debug, Default, Clone, Copy)]
pub struct CanonicalVerifier;

impl Verifier for CanonicalVerifier {
    fn verify(&self, cx: &mut VerifyContext<'_>) -> Result<Verdict, CollaboratorError> {
        if cx.request.method == NODELIST_METHOD {
            return Err(CollaboratorError::Unsupported);
        }
        match cx.result() {
            Some(result) if *result == canonical_result(cx.request) => Ok(Verdict::Accept),
            _ => Ok(Verdict::Reject(format!(
                "{} returned a wrong result for {}",
                cx.node, cx.request.method
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshrpc_registry::NodeList;

    fn network(mix: NodeMix) -> SimulatedNetwork {
        SimulatedNetwork::new(NetworkConfig::default(), &mix, 3)
    }

    fn payload(method: &str) -> String {
        json!([{ "id": 1, "jsonrpc": "2.0", "method": method, "params": [] }]).to_string()
    }

    fn body(response: &TransportResponse) -> Value {
        serde_json::from_str::<Value>(&response.body).unwrap()[0].clone()
    }

    #[test]
    fn test_behaviors_answer_differently() {
        let net = network(NodeMix {
            honest: 1,
            lying: 1,
            offline: 1,
            stale_reporters: 1,
        });
        let urls: Vec<String> = net.nodes().iter().map(|n| n.url.clone()).collect();
        let responses = net.send(&urls, &payload("eth_chainId")).unwrap();
        let expected = canonical_result(&RpcRequest::new("eth_chainId", json!([])));

        for (node, response) in net.nodes().iter().zip(&responses) {
            match node.behavior {
                Behavior::Offline => assert_eq!(response.status, 503),
                Behavior::Lying => assert_eq!(body(response)["result"], json!(LIE)),
                Behavior::Honest | Behavior::StaleReporter => {
                    assert_eq!(body(response)["result"], expected)
                }
            }
        }
        let counters = net.counters();
        assert_eq!(counters.sends, 1);
        assert_eq!(counters.node_requests, 4);
        assert_eq!(counters.offline_hits, 1);
        assert_eq!(counters.lies_told, 1);
    }

    #[test]
    fn test_node_list_decodes() {
        let net = network(NodeMix::default());
        let honest = net.nodes()[0].url.clone();
        let responses = net.send(&[honest], &payload(NODELIST_METHOD)).unwrap();
        let list = NodeList::from_result(&body(&responses[0])["result"]).unwrap();
        assert_eq!(list.nodes.len(), NodeMix::default().total());
        assert_eq!(list.last_block_number, 100);
    }

    #[test]
    fn test_stale_reporter_refuses_node_list() {
        let net = network(NodeMix {
            honest: 1,
            lying: 0,
            offline: 0,
            stale_reporters: 1,
        });
        let reporter = net.nodes()[1].url.clone();
        let responses = net.send(&[reporter], &payload(NODELIST_METHOD)).unwrap();
        assert!(body(&responses[0])["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("Error:"));
        assert_eq!(net.counters().nodelists_refused, 1);
    }

    #[test]
    fn test_latency_scales_with_speed() {
        let mut config = NetworkConfig::default();
        config.jitter_fraction = 0.0;
        let net = SimulatedNetwork::new(config, &NodeMix::default(), 1);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let node = &net.nodes()[0];
        let expected = 0.120 * node.speed;
        let sampled = net.sample_latency(node, &mut rng).as_secs_f64();
        assert!((sampled - expected).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_url() {
        let net = network(NodeMix::default());
        let responses = net
            .send(&["https://nowhere/rpc".to_string()], &payload("eth_chainId"))
            .unwrap();
        assert_eq!(responses[0].status, 404);
    }
}
