//! Shared driver for engine integration tests.
//!
//! Performs every action a step emits synchronously through the registered
//! collaborators, the way the blocking client does.

#![allow(dead_code)]

use meshrpc_core::{
    Action, Collaborators, EngineResult, RpcRequest, Signer, TransportResponse, Verifier,
};
use meshrpc_cache_memory::MemoryCacheStore;
use meshrpc_engine::{EngineConfig, RequestTree, StepEnv, StepOutcome};
use meshrpc_registry::{Registry, RegistryLease};
use meshrpc_test_helpers::byzantine::ScriptedTransport;
use meshrpc_test_helpers::TestNodes;
use meshrpc_types::ChainId;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde_json::Value;
use std::sync::Arc;

pub const CHAIN: ChainId = ChainId(1);
pub const NOW: u64 = 1_700_000_000;

/// Steps allowed before a test is considered hung.
const MAX_STEPS: usize = 64;

pub struct Harness {
    pub nodes: TestNodes,
    pub registry: RegistryLease,
    pub collaborators: Collaborators,
    pub transport: Arc<ScriptedTransport>,
    pub config: EngineConfig,
    pub rng: ChaCha8Rng,
    pub now: u64,
    pub steps: usize,
}

impl Harness {
    pub fn new(
        nodes: TestNodes,
        registry: Registry,
        handler: impl Fn(&str, &[RpcRequest]) -> TransportResponse + Send + Sync + 'static,
    ) -> Self {
        let transport = Arc::new(ScriptedTransport::new(handler));
        Self {
            nodes,
            registry: RegistryLease::private(registry),
            collaborators: Collaborators::new().with_transport(transport.clone()),
            transport,
            config: EngineConfig::default(),
            rng: ChaCha8Rng::seed_from_u64(7),
            now: NOW,
            steps: 0,
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.collaborators = std::mem::take(&mut self.collaborators).with_verifier(verifier);
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.collaborators = std::mem::take(&mut self.collaborators).with_signer(signer);
        self
    }

    pub fn with_cache(mut self, cache: MemoryCacheStore) -> Self {
        self.collaborators = std::mem::take(&mut self.collaborators).with_cache(Arc::new(cache));
        self
    }

    pub fn with_config(mut self, f: impl FnOnce(EngineConfig) -> EngineConfig) -> Self {
        self.config = f(self.config);
        self
    }

    /// Run a single call to completion.
    pub fn call(&mut self, method: &str, params: Value) -> (RequestTree, EngineResult<()>) {
        let mut tree = RequestTree::new(vec![RpcRequest::new(method, params)])
            .expect("non-empty request");
        let outcome = self.run(&mut tree);
        (tree, outcome)
    }

    /// Build a tree for a single call without running it.
    pub fn tree(&self, method: &str, params: Value) -> RequestTree {
        RequestTree::new(vec![RpcRequest::new(method, params)]).expect("non-empty request")
    }

    /// Take one step, returning the actions it emitted.
    pub fn step(&mut self, tree: &mut RequestTree) -> Vec<Action> {
        self.steps += 1;
        let mut env = StepEnv {
            registry: &self.registry,
            collaborators: &self.collaborators,
            config: &self.config,
            rng: &mut self.rng,
            now: self.now,
        };
        match tree.step(&mut env).expect("step succeeds") {
            StepOutcome::Done => Vec::new(),
            StepOutcome::Waiting(actions) => actions,
        }
    }

    /// Perform `actions` and run the tree to completion.
    pub fn finish(&mut self, tree: &mut RequestTree, actions: Vec<Action>) -> EngineResult<()> {
        for action in actions {
            self.perform(tree, action);
        }
        self.run(tree)
    }

    /// Step until the root is terminal.
    pub fn run(&mut self, tree: &mut RequestTree) -> EngineResult<()> {
        for _ in 0..MAX_STEPS {
            self.steps += 1;
            let outcome = {
                let mut env = StepEnv {
                    registry: &self.registry,
                    collaborators: &self.collaborators,
                    config: &self.config,
                    rng: &mut self.rng,
                    now: self.now,
                };
                tree.step(&mut env)?
            };
            match outcome {
                StepOutcome::Done => return Ok(()),
                StepOutcome::Waiting(actions) => {
                    assert!(!actions.is_empty(), "step stalled without actions");
                    for action in actions {
                        self.perform(tree, action);
                    }
                }
            }
        }
        panic!("request did not finish within {MAX_STEPS} steps");
    }

    fn perform(&self, tree: &mut RequestTree, action: Action) {
        match action {
            Action::Send {
                context,
                urls,
                payload,
            } => {
                let responses = self
                    .collaborators
                    .send(&urls, &payload)
                    .unwrap_or_else(|e| {
                        urls.iter()
                            .map(|_| TransportResponse::failed(500, e.to_string(), 0))
                            .collect()
                    });
                tree.add_response(context, responses)
                    .expect("one response per url");
            }
            Action::Sign {
                context,
                message,
                account,
                digest,
            } => {
                let signature = self.collaborators.sign(&message, &account, digest);
                tree.add_signature(context, signature)
                    .expect("context waits for a signature");
            }
        }
    }

    /// Node index of the context's answering node.
    pub fn answered_by(&self, tree: &RequestTree) -> usize {
        let address = tree.root().answered_by().expect("root was answered");
        self.nodes.index_of(&address).expect("answer from a test node")
    }

    pub fn blacklisted(&self) -> usize {
        let now = self.now;
        self.registry.with(|r| r.blacklisted_count(now))
    }

    pub fn is_blacklisted(&self, i: usize) -> bool {
        let (address, now) = (self.nodes.address(i), self.now);
        self.registry
            .with(|r| r.get(&address).is_some_and(|(_, w)| w.is_blacklisted(now)))
    }
}
