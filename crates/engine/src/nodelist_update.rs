//! Driving node-list refreshes as nested contexts.
//!
//! A refresh is an ordinary RPC context with a fixed dedup key, so every
//! context of a tree that finds the registry due shares one refresh. The
//! outcome is resolved once and recorded on the refresh context.

use crate::context::{ContextKind, ContextState, Purpose, UpdateResolution};
use crate::execute::StepEnv;
use crate::tree::RequestTree;
use meshrpc_core::{ContextId, EngineError, RequestKey, RpcRequest, NODELIST_METHOD};
use meshrpc_registry::{cache, NodeList, PendingUpdate, UpdateFailure};
use rand::RngCore;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Outer message of a refresh failure surfaced to the caller.
pub const UPDATE_ERROR_PREFIX: &str = "Error updating node_list";

fn update_key() -> RequestKey {
    RequestKey::for_cache_key(NODELIST_METHOD)
}

/// Params of a refresh request: `[node_limit, seed, excluded]`.
pub(crate) fn update_params(node_limit: u32, seed: &[u8; 32]) -> Value {
    json!([node_limit, format!("0x{}", hex::encode(seed)), []])
}

impl RequestTree {
    /// Attach a refresh to `parent` if the registry is due for one.
    ///
    /// Returns true if `parent` now waits for a refresh.
    pub(crate) fn attach_update_if_due(&mut self, parent: ContextId, env: &mut StepEnv<'_>) -> bool {
        let ctx = self.ctx_mut(parent);
        if ctx.purpose != Purpose::Call || ctx.update_checked || !env.config.auto_update_list {
            return false;
        }
        ctx.update_checked = true;

        let now = env.now;
        let Some(pending) = env.registry.with(|r| r.update_due(now)) else {
            return false;
        };

        let key = update_key();
        let existing = self
            .find_by_key(&key)
            .find(|&c| self.ctx(c).update_resolution.is_none() && !self.reaches(c, parent));
        let child = match existing {
            Some(child) => child,
            None => self.push_update(key, pending, env),
        };
        let ctx = self.ctx_mut(parent);
        ctx.update_child = Some(child);
        if !ctx.required.contains(&child) {
            ctx.required.push(child);
        }
        true
    }

    fn push_update(
        &mut self,
        key: RequestKey,
        pending: PendingUpdate,
        env: &mut StepEnv<'_>,
    ) -> ContextId {
        let mut seed = [0u8; 32];
        env.rng.fill_bytes(&mut seed);
        let request = RpcRequest::new(NODELIST_METHOD, update_params(env.config.node_limit, &seed));
        let child = self.push(
            ContextKind::Rpc {
                requests: vec![request],
            },
            Some(key),
            Purpose::NodeListUpdate,
        );
        // a reported change is fetched from the node that reported it
        let ctx = self.ctx_mut(child);
        ctx.explicit_nodes = pending
            .reporting_node
            .map(|reporter| BTreeSet::from([reporter]));
        ctx.issued_for = Some(pending);
        debug!(
            ?child,
            first = pending.is_first(),
            reporter = ?pending.reporting_node,
            "Requesting node list update"
        );
        child
    }

    /// Consume a finished refresh required by `parent`.
    ///
    /// A surfaced failure fails `parent`.
    pub(crate) fn resolve_update(
        &mut self,
        parent: ContextId,
        child: ContextId,
        env: &mut StepEnv<'_>,
    ) {
        let resolution = match self.ctx(child).update_resolution.clone() {
            Some(resolution) => resolution,
            None => {
                let resolution = self.apply_update(child, env);
                self.ctx_mut(child).update_resolution = Some(resolution.clone());
                resolution
            }
        };

        let ctx = self.ctx_mut(parent);
        ctx.update_child = None;
        ctx.required.retain(|&c| c != child);
        if let UpdateResolution::Surfaced(e) = resolution {
            ctx.fail(e.context(UPDATE_ERROR_PREFIX));
        }
    }

    fn apply_update(&self, child: ContextId, env: &StepEnv<'_>) -> UpdateResolution {
        let ctx = self.ctx(child);
        let update = ctx.issued_for.unwrap_or_else(PendingUpdate::first);
        let list = match ctx.state {
            ContextState::Success => ctx
                .responses
                .first()
                .and_then(|r| r.get("result"))
                .ok_or_else(|| EngineError::remote("node list response has no result"))
                .and_then(|result| NodeList::from_result(result).map_err(EngineError::from)),
            _ => Err(ctx
                .error
                .clone()
                .unwrap_or_else(|| EngineError::remote("node list request failed"))),
        };

        let now = env.now;
        let staleness = &env.config.staleness;
        match list {
            Ok(list) => {
                let applied = env
                    .registry
                    .with_mut(|r| r.apply_node_list(list, update, now, staleness));
                if applied.replaced {
                    persist_registry(env);
                }
                UpdateResolution::Absorbed
            }
            Err(error) => {
                let failure = env
                    .registry
                    .with_mut(|r| r.on_update_failed(update, now, staleness));
                match failure {
                    UpdateFailure::Surface => UpdateResolution::Surfaced(error),
                    UpdateFailure::Penalized(reporter) => {
                        warn!(%reporter, error = %error, "Node list update failed, continuing");
                        UpdateResolution::Absorbed
                    }
                    UpdateFailure::Superseded => UpdateResolution::Absorbed,
                }
            }
        }
    }
}

/// Write the registry snapshot to every cache store.
pub(crate) fn persist_registry(env: &StepEnv<'_>) {
    let (key, bytes) = env.registry.with_mut(|r| {
        r.take_dirty();
        (cache::cache_key(r.chain_id()), cache::encode(r))
    });
    if env.collaborators.cache_set(&key, &bytes) {
        info!(key, bytes = bytes.len(), "Persisted node list");
        meshrpc_metrics::record_cache_persisted();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_params_shape() {
        let params = update_params(8, &[0xab; 32]);
        assert_eq!(params[0], 8);
        let seed = params[1].as_str().unwrap();
        assert_eq!(seed.len(), 66);
        assert!(seed.starts_with("0xabab"));
        assert_eq!(params[2], json!([]));
    }
}
