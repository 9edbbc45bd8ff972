//! Sub-requests created on behalf of verifiers.
//!
//! A verifier asking for the same method and params twice, from any context
//! of the tree, gets the same context back. Only one network call is made.

use crate::context::{ContextKind, ContextState, Purpose};
use crate::tree::{response_result, RequestTree};
use meshrpc_core::{
    ContextId, Dependencies, Dependency, DigestKind, EngineError, ErrorKind, RequestKey,
    RpcRequest,
};
use meshrpc_types::Address;
use serde_json::Value;
use tracing::trace;

/// [`Dependencies`] over one context of a tree.
pub(crate) struct TreeDeps<'t> {
    tree: &'t mut RequestTree,
    parent: ContextId,
    max_contexts: usize,
    /// The parent's requirements changed.
    pub(crate) linked: bool,
    /// Nodes the answering node claims are unreachable.
    pub(crate) offline: Vec<Address>,
}

impl<'t> TreeDeps<'t> {
    pub(crate) fn new(tree: &'t mut RequestTree, parent: ContextId, max_contexts: usize) -> Self {
        Self {
            tree,
            parent,
            max_contexts,
            linked: false,
            offline: Vec::new(),
        }
    }

    fn find_or_create(
        &mut self,
        key: RequestKey,
        kind: impl FnOnce() -> ContextKind,
    ) -> Result<ContextId, EngineError> {
        let parent = self.parent;
        let reusable = self
            .tree
            .find_by_key(&key)
            .find(|&existing| !self.tree.reaches(existing, parent));

        let child = match reusable {
            Some(existing) => {
                if !self.tree.ctx(parent).required.contains(&existing) {
                    trace!(?parent, ?existing, "Reusing sub-request from another context");
                    meshrpc_metrics::record_dedup_hit();
                }
                existing
            }
            None => {
                if self.tree.len() >= self.max_contexts {
                    return Err(EngineError::new(
                        ErrorKind::ResourceExhausted,
                        format!("request tree exceeds {} contexts", self.max_contexts),
                    ));
                }
                let child = self.tree.push(kind(), Some(key), Purpose::Call);
                trace!(?parent, ?child, "Created sub-request");
                child
            }
        };

        let required = &mut self.tree.ctx_mut(parent).required;
        if !required.contains(&child) {
            required.push(child);
            self.linked = true;
        }
        Ok(child)
    }

    fn dependency(&self, id: ContextId) -> Dependency {
        let ctx = self.tree.ctx(id);
        match ctx.state {
            ContextState::Success => match &ctx.kind {
                ContextKind::Sign { .. } => Dependency::Ready(Value::String(format!(
                    "0x{}",
                    hex::encode(ctx.signature.as_deref().unwrap_or_default())
                ))),
                ContextKind::Rpc { .. } => match ctx.responses.first().map(response_result) {
                    Some(Ok(result)) => Dependency::Ready(result),
                    Some(Err(e)) => Dependency::Failed(e),
                    None => Dependency::Ready(Value::Null),
                },
            },
            ContextState::Error => Dependency::Failed(
                ctx.error
                    .clone()
                    .unwrap_or_else(|| EngineError::remote("sub-request failed")),
            ),
            ContextState::WaitingToSend | ContextState::WaitingForResponse => Dependency::Pending,
        }
    }
}

impl Dependencies for TreeDeps<'_> {
    fn require(&mut self, method: &str, params: Value) -> Dependency {
        let key = RequestKey::for_call(method, &params);
        let method = method.to_owned();
        match self.find_or_create(key, move || ContextKind::Rpc {
            requests: vec![RpcRequest::new(method, params)],
        }) {
            Ok(child) => self.dependency(child),
            Err(e) => Dependency::Failed(e),
        }
    }

    fn require_signature(
        &mut self,
        message: &[u8],
        account: Address,
        digest: DigestKind,
    ) -> Dependency {
        let key = RequestKey::for_signature(message, account.as_bytes(), digest);
        let message = message.to_vec();
        match self.find_or_create(key, move || ContextKind::Sign {
            message,
            account,
            digest,
        }) {
            Ok(child) => self.dependency(child),
            Err(e) => Dependency::Failed(e),
        }
    }

    fn report_offline(&mut self, node: Address) {
        if !self.offline.contains(&node) {
            self.offline.push(node);
        }
    }
}
