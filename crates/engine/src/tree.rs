//! Arena of request contexts rooted at the caller's call.
//!
//! Contexts refer to each other by [`ContextId`]; the tree owns all of them,
//! so dropping the tree drops every nested context at once. Links only ever
//! point from a context to a context that cannot reach it, which keeps the
//! dependency graph acyclic.

use crate::context::{ContextKind, ContextState, Purpose, RequestContext};
use meshrpc_core::{
    rpc_error_message, ContextId, EngineError, EngineResult, ErrorKind, RequestKey,
    RpcRequest, TransportResponse,
};
use serde_json::Value;

/// Id of the root context.
pub const ROOT: ContextId = ContextId(0);

/// A caller's request and everything it had to fetch along the way.
#[derive(Debug, Clone)]
pub struct RequestTree {
    pub(crate) contexts: Vec<RequestContext>,
    pub(crate) finished: bool,
}

impl RequestTree {
    /// Tree for a batch of calls.
    pub fn new(requests: Vec<RpcRequest>) -> EngineResult<Self> {
        if requests.is_empty() {
            return Err(EngineError::invalid_input("Empty batch request"));
        }
        let key = match requests.as_slice() {
            [single] => Some(single.key()),
            _ => None,
        };
        let root = RequestContext::new(ROOT, ContextKind::Rpc { requests }, key, Purpose::Call);
        Ok(Self {
            contexts: vec![root],
            finished: false,
        })
    }

    /// Tree for a JSON request object or batch array.
    pub fn parse(input: &str) -> EngineResult<Self> {
        Self::new(RpcRequest::parse_batch(input)?)
    }

    /// The root context.
    pub fn root(&self) -> &RequestContext {
        &self.contexts[0]
    }

    /// State of the root context.
    pub fn state(&self) -> ContextState {
        self.root().state
    }

    /// Terminal error of the root context.
    pub fn error(&self) -> Option<&EngineError> {
        self.root().error.as_ref()
    }

    /// Number of contexts.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Always false; a tree has at least its root.
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Look up a context.
    pub fn context(&self, id: ContextId) -> Option<&RequestContext> {
        self.contexts.get(id.0 as usize)
    }

    /// Every context, root first.
    pub fn contexts(&self) -> impl Iterator<Item = &RequestContext> {
        self.contexts.iter()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Feeding results back
    // ═══════════════════════════════════════════════════════════════════════

    /// Fill every response slot of a dispatched RPC context, one per URL.
    pub fn add_response(
        &mut self,
        id: ContextId,
        responses: Vec<TransportResponse>,
    ) -> EngineResult<()> {
        let expected = self.waiting_rpc(id)?.raw.len();
        if responses.len() != expected {
            return Err(EngineError::invalid_input(format!(
                "{id:?} expects {expected} responses, got {}",
                responses.len()
            )));
        }
        for (slot, response) in responses.into_iter().enumerate() {
            self.add_response_at(id, slot, response)?;
        }
        Ok(())
    }

    /// Fill a single response slot.
    pub fn add_response_at(
        &mut self,
        id: ContextId,
        slot: usize,
        response: TransportResponse,
    ) -> EngineResult<()> {
        let ctx = self.waiting_rpc(id)?;
        let Some(target) = ctx.raw.get_mut(slot) else {
            return Err(EngineError::new(
                ErrorKind::NotFound,
                format!("{id:?} has no response slot {slot}"),
            ));
        };
        *target = Some(response);
        Ok(())
    }

    /// Complete a signing context.
    pub fn add_signature(
        &mut self,
        id: ContextId,
        signature: EngineResult<Vec<u8>>,
    ) -> EngineResult<()> {
        let ctx = self.get_mut(id)?;
        if !matches!(ctx.kind, ContextKind::Sign { .. })
            || ctx.state != ContextState::WaitingForResponse
        {
            return Err(EngineError::invalid_input(format!(
                "{id:?} is not waiting for a signature"
            )));
        }
        match signature {
            Ok(signature) => {
                ctx.signature = Some(signature);
                ctx.state = ContextState::Success;
            }
            Err(e) => ctx.fail(e.context("Error signing")),
        }
        Ok(())
    }

    fn waiting_rpc(&mut self, id: ContextId) -> EngineResult<&mut RequestContext> {
        let ctx = self.get_mut(id)?;
        if !matches!(ctx.kind, ContextKind::Rpc { .. })
            || ctx.state != ContextState::WaitingForResponse
            || ctx.raw.is_empty()
        {
            return Err(EngineError::invalid_input(format!(
                "{id:?} is not waiting for responses"
            )));
        }
        Ok(ctx)
    }

    fn get_mut(&mut self, id: ContextId) -> EngineResult<&mut RequestContext> {
        self.contexts
            .get_mut(id.0 as usize)
            .ok_or_else(|| EngineError::new(ErrorKind::NotFound, format!("unknown {id:?}")))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Results
    // ═══════════════════════════════════════════════════════════════════════

    /// Result of the `index`-th call of the batch.
    ///
    /// A JSON-RPC error the node returned as a legitimate answer becomes a
    /// `RemoteRejected` error here.
    pub fn result(&self, index: usize) -> EngineResult<Value> {
        let root = self.root();
        match root.state {
            ContextState::Error => {
                return Err(root
                    .error
                    .clone()
                    .unwrap_or_else(|| EngineError::remote("request failed")))
            }
            ContextState::Success => {}
            _ => return Err(EngineError::invalid_input("request has not finished")),
        }
        let response = root.responses.get(index).ok_or_else(|| {
            EngineError::new(ErrorKind::NotFound, format!("no response at index {index}"))
        })?;
        response_result(response)
    }

    /// Results of every call, in batch order.
    pub fn results(&self) -> EngineResult<Vec<EngineResult<Value>>> {
        if self.state() != ContextState::Success {
            self.result(0)?;
        }
        Ok((0..self.root().responses.len())
            .map(|i| self.result(i))
            .collect())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Arena internals
    // ═══════════════════════════════════════════════════════════════════════

    pub(crate) fn ctx(&self, id: ContextId) -> &RequestContext {
        &self.contexts[id.0 as usize]
    }

    pub(crate) fn ctx_mut(&mut self, id: ContextId) -> &mut RequestContext {
        &mut self.contexts[id.0 as usize]
    }

    pub(crate) fn push(
        &mut self,
        kind: ContextKind,
        key: Option<RequestKey>,
        purpose: Purpose,
    ) -> ContextId {
        let id = ContextId(self.contexts.len() as u32);
        self.contexts
            .push(RequestContext::new(id, kind, key, purpose));
        id
    }

    /// Contexts created for `key`, oldest first. The root is never matched.
    pub(crate) fn find_by_key<'a>(
        &'a self,
        key: &'a RequestKey,
    ) -> impl Iterator<Item = ContextId> + 'a {
        self.contexts
            .iter()
            .skip(1)
            .filter(move |c| c.key.as_ref() == Some(key))
            .map(|c| c.id)
    }

    /// True if `target` is `from` or one of its transitive requirements.
    pub(crate) fn reaches(&self, from: ContextId, target: ContextId) -> bool {
        let mut stack = vec![from];
        let mut seen = vec![false; self.contexts.len()];
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            let i = id.0 as usize;
            if std::mem::replace(&mut seen[i], true) {
                continue;
            }
            stack.extend(self.contexts[i].required.iter().copied());
        }
        false
    }
}

/// Result of a response object, or its error as `RemoteRejected`.
pub(crate) fn response_result(response: &Value) -> EngineResult<Value> {
    match rpc_error_message(response) {
        Some(message) => Err(EngineError::remote(message)),
        None => Ok(response.get("result").cloned().unwrap_or(Value::Null)),
    }
}
