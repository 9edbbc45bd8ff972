//! Capability interfaces the engine consumes, and a typed registry of them.
//!
//! Every collaborator may decline an action by returning
//! [`CollaboratorError::Unsupported`]; the registry then asks the next one
//! registered for the same capability before giving up.
//!
//! # Example
//!
//! ```ignore
//! let collaborators = Collaborators::new()
//!     .with_transport(Arc::new(HttpTransport::default()))
//!     .with_verifier(Arc::new(EthVerifier::new()))
//!     .with_cache(Arc::new(MemoryCacheStore::new()));
//! ```

use crate::{EngineError, RpcRequest, TransportResponse};
use meshrpc_types::Address;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Failure of a single collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    /// This collaborator does not handle the action; try the next one.
    #[error("unsupported")]
    Unsupported,

    /// The collaborator handled the action and it failed.
    #[error(transparent)]
    Failed(#[from] EngineError),
}

// ═══════════════════════════════════════════════════════════════════════
// Transport
// ═══════════════════════════════════════════════════════════════════════

/// Performs the actual I/O for a dispatched request.
///
/// Called by the driver loop, never by the engine itself. Returns one
/// response per URL, in order.
pub trait Transport: Send + Sync {
    /// Send `payload` to every URL.
    fn send(
        &self,
        urls: &[String],
        payload: &str,
    ) -> Result<Vec<TransportResponse>, CollaboratorError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Signer
// ═══════════════════════════════════════════════════════════════════════

/// How the signer should digest the message before signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestKind {
    /// Sign the message bytes as given.
    Raw,
    /// Hash with the chain's native hash before signing.
    Hashed,
    /// Apply the chain's personal-message prefix, then hash.
    PrefixedMessage,
}

/// Produces signatures for signing contexts.
pub trait Signer: Send + Sync {
    /// Sign `message` on behalf of `account`.
    fn sign(
        &self,
        message: &[u8],
        account: &Address,
        digest: DigestKind,
    ) -> Result<Vec<u8>, CollaboratorError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Cache store
// ═══════════════════════════════════════════════════════════════════════

/// Opaque key/value persistence.
pub trait CacheStore: Send + Sync {
    /// Look up a value.
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Store a value, replacing any previous one.
    fn set(&self, key: &str, value: &[u8]);
}

// ═══════════════════════════════════════════════════════════════════════
// Verifier
// ═══════════════════════════════════════════════════════════════════════

/// Result of asking for auxiliary data during verification.
#[derive(Debug, Clone, PartialEq)]
pub enum Dependency {
    /// The sub-request already completed.
    Ready(Value),
    /// The sub-request is in flight; verification must wait.
    Pending,
    /// The sub-request failed.
    Failed(EngineError),
}

/// Engine services available to a verifier.
pub trait Dependencies {
    /// Reuse or create a sub-request for `method` with `params`.
    fn require(&mut self, method: &str, params: Value) -> Dependency;

    /// Reuse or create a signing sub-request, keyed by the message.
    fn require_signature(
        &mut self,
        message: &[u8],
        account: Address,
        digest: DigestKind,
    ) -> Dependency;

    /// Record that the answering node claims `node` is unreachable.
    fn report_offline(&mut self, node: Address);
}

/// Everything a verifier sees about one response slot.
pub struct VerifyContext<'a> {
    /// The request being answered.
    pub request: &'a RpcRequest,
    /// The parsed response object.
    pub response: &'a Value,
    /// Node that produced the response.
    pub node: Address,
    /// Signer nodes requested for this call.
    pub signers: &'a [Address],
    deps: &'a mut dyn Dependencies,
}

impl<'a> VerifyContext<'a> {
    /// Bundle a response with the engine services.
    pub fn new(
        request: &'a RpcRequest,
        response: &'a Value,
        node: Address,
        signers: &'a [Address],
        deps: &'a mut dyn Dependencies,
    ) -> Self {
        Self {
            request,
            response,
            node,
            signers,
            deps,
        }
    }

    /// The `result` member of the response.
    pub fn result(&self) -> Option<&Value> {
        self.response.get("result")
    }

    /// See [`Dependencies::require`].
    pub fn require(&mut self, method: &str, params: Value) -> Dependency {
        self.deps.require(method, params)
    }

    /// See [`Dependencies::require_signature`].
    pub fn require_signature(
        &mut self,
        message: &[u8],
        account: Address,
        digest: DigestKind,
    ) -> Dependency {
        self.deps.require_signature(message, account, digest)
    }

    /// See [`Dependencies::report_offline`].
    pub fn report_offline(&mut self, node: Address) {
        self.deps.report_offline(node)
    }
}

impl fmt::Debug for VerifyContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyContext")
            .field("method", &self.request.method)
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

/// Verifier decision for one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Response is correct.
    Accept,
    /// Response is wrong or unverifiable; the node gets blacklisted.
    Reject(String),
    /// Auxiliary data was requested and is not available yet.
    Pending,
}

/// Checks a response before it is accepted.
pub trait Verifier: Send + Sync {
    /// Judge one response slot.
    fn verify(&self, cx: &mut VerifyContext<'_>) -> Result<Verdict, CollaboratorError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Typed registry of collaborators, queried per capability.
#[derive(Clone, Default)]
pub struct Collaborators {
    transports: Vec<Arc<dyn Transport>>,
    verifiers: Vec<Arc<dyn Verifier>>,
    signers: Vec<Arc<dyn Signer>>,
    caches: Vec<Arc<dyn CacheStore>>,
}

impl Collaborators {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    /// Register a verifier.
    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifiers.push(verifier);
        self
    }

    /// Register a signer.
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signers.push(signer);
        self
    }

    /// Register a cache store.
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.caches.push(cache);
        self
    }

    /// True if any verifier is registered.
    pub fn has_verifiers(&self) -> bool {
        !self.verifiers.is_empty()
    }

    /// Send through the first transport that accepts the request.
    pub fn send(
        &self,
        urls: &[String],
        payload: &str,
    ) -> Result<Vec<TransportResponse>, EngineError> {
        for transport in &self.transports {
            match transport.send(urls, payload) {
                Err(CollaboratorError::Unsupported) => continue,
                Err(CollaboratorError::Failed(e)) => return Err(e),
                Ok(responses) => return Ok(responses),
            }
        }
        Err(EngineError::unsupported("no transport accepted the request"))
    }

    /// Sign with the first signer that accepts the account.
    pub fn sign(
        &self,
        message: &[u8],
        account: &Address,
        digest: DigestKind,
    ) -> Result<Vec<u8>, EngineError> {
        for signer in &self.signers {
            match signer.sign(message, account, digest) {
                Err(CollaboratorError::Unsupported) => continue,
                Err(CollaboratorError::Failed(e)) => return Err(e),
                Ok(signature) => return Ok(signature),
            }
        }
        Err(EngineError::unsupported(format!(
            "no signer available for {account}"
        )))
    }

    /// Run verifiers in order until one returns a verdict.
    ///
    /// Returns `Ok(None)` when every verifier declined.
    pub fn verify(&self, cx: &mut VerifyContext<'_>) -> Result<Option<Verdict>, EngineError> {
        for verifier in &self.verifiers {
            match verifier.verify(cx) {
                Err(CollaboratorError::Unsupported) => continue,
                Err(CollaboratorError::Failed(e)) => return Err(e),
                Ok(verdict) => return Ok(Some(verdict)),
            }
        }
        Ok(None)
    }

    /// First cache hit across stores.
    pub fn cache_get(&self, key: &str) -> Option<Vec<u8>> {
        self.caches.iter().find_map(|c| c.get(key))
    }

    /// Write to every store. Returns false if no store is registered.
    pub fn cache_set(&self, key: &str, value: &[u8]) -> bool {
        for cache in &self.caches {
            cache.set(key, value);
        }
        !self.caches.is_empty()
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("transports", &self.transports.len())
            .field("verifiers", &self.verifiers.len())
            .field("signers", &self.signers.len())
            .field("caches", &self.caches.len())
            .finish()
    }
}
