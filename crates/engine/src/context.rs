//! A single request context: one logical call or signature.

use meshrpc_core::{
    ContextId, DigestKind, EngineError, RequestKey, RpcRequest, TransportResponse,
};
use meshrpc_registry::{PendingUpdate, SelectedNode};
use meshrpc_types::Address;
use serde_json::Value;
use std::collections::BTreeSet;

/// What a context does.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextKind {
    /// One or more JSON-RPC calls sent together.
    Rpc {
        /// The batch, in order.
        requests: Vec<RpcRequest>,
    },
    /// A signature produced by the signer collaborator.
    Sign {
        /// Bytes to sign.
        message: Vec<u8>,
        /// Signing account.
        account: Address,
        /// Digest applied before signing.
        digest: DigestKind,
    },
}

/// Progress of a context.
///
/// `Success` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextState {
    /// Nothing dispatched for the current attempt.
    WaitingToSend,
    /// Dispatched; waiting for responses, a signature or required contexts.
    WaitingForResponse,
    /// Finished with an accepted result.
    Success,
    /// Finished with an error.
    Error,
}

impl ContextState {
    /// `Success` or `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

/// Why a context exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Purpose {
    /// A caller's call or a verifier's dependency.
    Call,
    /// A node-list refresh.
    NodeListUpdate,
}

/// Final judgement of one node's answer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SlotOutcome {
    Accepted,
    Failed(EngineError),
}

/// How a node-list refresh ended, shared by every context waiting on it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum UpdateResolution {
    Absorbed,
    Surfaced(EngineError),
}

/// One node of the request tree.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub(crate) id: ContextId,
    pub(crate) kind: ContextKind,
    pub(crate) key: Option<RequestKey>,
    pub(crate) purpose: Purpose,
    /// Overrides selection with exactly these nodes.
    pub(crate) explicit_nodes: Option<BTreeSet<Address>>,
    pub(crate) state: ContextState,

    // current attempt
    pub(crate) nodes: Vec<SelectedNode>,
    pub(crate) signers: Vec<Address>,
    pub(crate) raw: Vec<Option<TransportResponse>>,
    pub(crate) parsed: Vec<Option<Vec<Value>>>,
    pub(crate) outcomes: Vec<Option<SlotOutcome>>,
    pub(crate) timings_recorded: bool,

    // results
    pub(crate) responses: Vec<Value>,
    pub(crate) answered_by: Option<Address>,
    pub(crate) signature: Option<Vec<u8>>,
    pub(crate) error: Option<EngineError>,
    pub(crate) last_failure: Option<EngineError>,

    // dependencies
    pub(crate) required: Vec<ContextId>,
    pub(crate) update_child: Option<ContextId>,
    pub(crate) update_checked: bool,
    pub(crate) update_resolution: Option<UpdateResolution>,
    /// The scheduled refresh a node-list context was issued for.
    pub(crate) issued_for: Option<PendingUpdate>,

    pub(crate) attempt: u32,
}

impl RequestContext {
    pub(crate) fn new(
        id: ContextId,
        kind: ContextKind,
        key: Option<RequestKey>,
        purpose: Purpose,
    ) -> Self {
        Self {
            id,
            kind,
            key,
            purpose,
            explicit_nodes: None,
            state: ContextState::WaitingToSend,
            nodes: Vec::new(),
            signers: Vec::new(),
            raw: Vec::new(),
            parsed: Vec::new(),
            outcomes: Vec::new(),
            timings_recorded: false,
            responses: Vec::new(),
            answered_by: None,
            signature: None,
            error: None,
            last_failure: None,
            required: Vec::new(),
            update_child: None,
            update_checked: false,
            update_resolution: None,
            issued_for: None,
            attempt: 0,
        }
    }

    /// Identifier within the tree.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// What the context does.
    pub fn kind(&self) -> &ContextKind {
        &self.kind
    }

    /// Current state.
    pub fn state(&self) -> ContextState {
        self.state
    }

    /// True for node-list refresh contexts.
    pub fn is_nodelist_update(&self) -> bool {
        self.purpose == Purpose::NodeListUpdate
    }

    /// The calls of an RPC context; empty for signing contexts.
    pub fn requests(&self) -> &[RpcRequest] {
        match &self.kind {
            ContextKind::Rpc { requests } => requests,
            ContextKind::Sign { .. } => &[],
        }
    }

    /// Nodes of the current attempt.
    pub fn nodes(&self) -> &[SelectedNode] {
        &self.nodes
    }

    /// Signer nodes of the current attempt.
    pub fn signers(&self) -> &[Address] {
        &self.signers
    }

    /// Accepted responses, one per request. Empty until `Success`.
    pub fn responses(&self) -> &[Value] {
        &self.responses
    }

    /// Node whose answer was accepted.
    pub fn answered_by(&self) -> Option<Address> {
        self.answered_by
    }

    /// Signature of a finished signing context.
    pub fn signature(&self) -> Option<&[u8]> {
        self.signature.as_deref()
    }

    /// Terminal error.
    pub fn error(&self) -> Option<&EngineError> {
        self.error.as_ref()
    }

    /// Contexts this one waits for.
    pub fn required(&self) -> &[ContextId] {
        &self.required
    }

    /// Attempts dispatched so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// True once every response slot of the current attempt is filled.
    pub(crate) fn all_slots_filled(&self) -> bool {
        !self.raw.is_empty() && self.raw.iter().all(Option::is_some)
    }

    pub(crate) fn fail(&mut self, error: EngineError) {
        tracing::debug!(context = ?self.id, error = %error, "Context failed");
        self.state = ContextState::Error;
        self.error = Some(error);
    }

    /// Drop the current attempt so the context can be dispatched again.
    pub(crate) fn reset_attempt(&mut self) {
        self.state = ContextState::WaitingToSend;
        self.nodes.clear();
        self.signers.clear();
        self.raw.clear();
        self.parsed.clear();
        self.outcomes.clear();
        self.timings_recorded = false;
        let update = self.update_child;
        self.required.retain(|c| Some(*c) == update);
    }
}
