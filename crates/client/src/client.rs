//! The client facade.

use crate::config::ClientConfig;
use meshrpc_core::{
    Action, Clock, Collaborators, EngineError, EngineResult, ErrorKind, RpcRequest,
    TransportResponse,
};
use meshrpc_engine::{EngineConfig, RequestTree, StepEnv, StepOutcome};
use meshrpc_registry::{cache, Registry, RegistryHandle, RegistryLease, RegistryStore};
use meshrpc_types::ChainId;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Status reported for a send the transport could not perform at all.
const TRANSPORT_FAILURE_STATUS: u16 = 500;

/// A configured client bound to one chain's registry.
///
/// Request trees are independent; several threads may drive trees of the
/// same client at once. The registry lock and the RNG lock are held only
/// for the duration of a step, never across I/O.
pub struct Client {
    config: ClientConfig,
    engine: EngineConfig,
    registry: RegistryLease,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    rng: Mutex<ChaCha8Rng>,
}

impl Client {
    /// Bind a client to the registry for `config.chain_id`.
    ///
    /// Adopts the shared registry from `store`, or a private copy of it when
    /// the configuration overrides the node list, contract or registry id.
    /// A registry that has never been refreshed is restored from the cache
    /// store when a snapshot exists there.
    pub fn new(
        store: &RegistryStore,
        config: ClientConfig,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let mut registry = store.get_or_create(config.chain_id);
        if config.detaches() {
            registry = registry.detach_private_copy();
        }
        registry.with_mut(|r| apply_registry_config(r, &config))?;
        if config.node_list_records().is_none() {
            restore_from_cache(&registry, &config, &collaborators);
        }
        match config.node_registry.as_ref().and_then(|r| r.needs_update) {
            Some(true) => registry.with_mut(Registry::mark_needs_update),
            Some(false) => registry.with_mut(Registry::clear_pending_update),
            None => {}
        }

        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let (nodes, first_update) = registry.with(|r| (r.len(), r.is_first_update()));
        info!(
            chain_id = %config.chain_id,
            nodes,
            first_update,
            shared = registry.is_shared(),
            "Client ready"
        );
        Ok(Self {
            engine: config.engine_config(),
            config,
            registry,
            collaborators,
            clock,
            rng: Mutex::new(rng),
        })
    }

    /// Chain the client talks to.
    pub fn chain_id(&self) -> ChainId {
        self.config.chain_id
    }

    /// Configuration the client was built from.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Engine configuration derived from it.
    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine
    }

    /// The client's registry.
    pub fn registry(&self) -> &RegistryHandle {
        self.registry.handle()
    }

    /// True if other clients share the registry.
    pub fn is_shared(&self) -> bool {
        self.registry.is_shared()
    }

    /// Registered collaborators.
    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Request trees
    // ═══════════════════════════════════════════════════════════════════════

    /// Tree for a single call.
    pub fn create_request(&self, method: &str, params: Value) -> EngineResult<RequestTree> {
        RequestTree::new(vec![RpcRequest::new(method, params)])
    }

    /// Tree for a JSON request object or batch array.
    pub fn parse_request(&self, input: &str) -> EngineResult<RequestTree> {
        RequestTree::parse(input)
    }

    /// Advance a tree as far as possible without I/O.
    ///
    /// The caller performs the returned actions and steps again.
    pub fn step(&self, tree: &mut RequestTree) -> EngineResult<StepOutcome> {
        let mut rng = self.rng.lock();
        let mut env = StepEnv {
            registry: self.registry.handle(),
            collaborators: &self.collaborators,
            config: &self.engine,
            rng: &mut *rng,
            now: self.clock.now(),
        };
        tree.step(&mut env)
    }

    /// Perform one action through the registered collaborators.
    ///
    /// A transport failure is fed back as a failed response per URL, so
    /// the nodes are treated as unreachable and the retry path runs.
    pub fn perform(&self, tree: &mut RequestTree, action: Action) -> EngineResult<()> {
        match action {
            Action::Send {
                context,
                urls,
                payload,
            } => {
                let responses = match self.collaborators.send(&urls, &payload) {
                    Ok(responses) => responses,
                    Err(e) => {
                        debug!(%context, error = %e, "Transport failed");
                        urls.iter()
                            .map(|_| {
                                TransportResponse::failed(TRANSPORT_FAILURE_STATUS, e.to_string(), 0)
                            })
                            .collect()
                    }
                };
                tree.add_response(context, responses)
            }
            Action::Sign {
                context,
                message,
                account,
                digest,
            } => {
                let signature = self.collaborators.sign(&message, &account, digest);
                tree.add_signature(context, signature)
            }
        }
    }

    /// Drive a tree to completion, performing I/O on the calling thread.
    pub fn execute(&self, tree: &mut RequestTree) -> EngineResult<()> {
        loop {
            match self.step(tree)? {
                StepOutcome::Done => return Ok(()),
                StepOutcome::Waiting(actions) if actions.is_empty() => {
                    return Err(EngineError::new(
                        ErrorKind::ResourceExhausted,
                        "request stalled without pending I/O",
                    ));
                }
                StepOutcome::Waiting(actions) => {
                    for action in actions {
                        self.perform(tree, action)?;
                    }
                }
            }
        }
    }

    /// Run a single call and return its result.
    pub fn call(&self, method: &str, params: Value) -> EngineResult<Value> {
        let mut tree = self.create_request(method, params)?;
        self.execute(&mut tree)?;
        tree.result(0)
    }

    /// Run a batch; results keep the batch order.
    pub fn call_batch(&self, requests: Vec<RpcRequest>) -> EngineResult<Vec<EngineResult<Value>>> {
        let mut tree = RequestTree::new(requests)?;
        self.execute(&mut tree)?;
        tree.results()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("chain_id", &self.config.chain_id)
            .field("registry", &self.registry)
            .field("collaborators", &self.collaborators)
            .finish_non_exhaustive()
    }
}

fn apply_registry_config(registry: &mut Registry, config: &ClientConfig) -> EngineResult<()> {
    if let Some(overrides) = &config.node_registry {
        if let Some(contract) = overrides.contract {
            registry.set_contract(contract);
        }
        if let Some(registry_id) = overrides.registry_id {
            registry.set_registry_id(registry_id);
        }
        if let Some(secs) = overrides.avg_block_time {
            registry.set_avg_block_time(secs);
        }
    }
    if let Some(preselection) = config.preselection() {
        registry.set_pre_filter(Some(preselection));
    }
    if let Some(nodes) = config.node_list_records() {
        registry.set_boot_nodes(nodes)?;
    } else if registry.is_empty() && !config.boot_nodes.is_empty() {
        registry.set_boot_nodes(config.boot_node_records())?;
    }
    Ok(())
}

/// Take over a persisted node list if the registry was never refreshed.
fn restore_from_cache(registry: &RegistryLease, config: &ClientConfig, collaborators: &Collaborators) {
    let chain_id = config.chain_id;
    if !registry.with(Registry::is_first_update) {
        return;
    }
    let Some(bytes) = collaborators.cache_get(&cache::cache_key(chain_id)) else {
        return;
    };
    let restored = match cache::decode(chain_id, &bytes) {
        Ok(restored) => restored,
        Err(e) => {
            warn!(%chain_id, error = %e, "Ignoring cached node list");
            return;
        }
    };
    let expected = config.node_registry.as_ref().and_then(|r| r.contract);
    if expected.is_some_and(|contract| contract != restored.contract()) {
        debug!(%chain_id, "Cached node list belongs to another contract");
        return;
    }
    if registry.with_mut(|r| r.adopt(restored)) {
        debug!(%chain_id, "Restored node list from cache");
    }
}
