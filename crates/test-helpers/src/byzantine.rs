//! Scripted and adversarial collaborators.
//!
//! These stand in for transports, verifiers and signers so tests can make
//! nodes lie, go offline, or demand auxiliary data on cue.

use meshrpc_core::{
    CollaboratorError, Dependency, DigestKind, EngineError, RpcRequest, Signer, Transport,
    TransportResponse, Verdict, VerifyContext, Verifier,
};
use meshrpc_types::Address;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::fixtures::parse_payload;

type Handler = dyn Fn(&str, &[RpcRequest]) -> TransportResponse + Send + Sync;

// ═══════════════════════════════════════════════════════════════════════
// Transports
// ═══════════════════════════════════════════════════════════════════════

/// Answers every URL through a closure and records what was sent.
pub struct ScriptedTransport {
    handler: Box<Handler>,
    calls: Mutex<Vec<(Vec<String>, String)>>,
}

impl ScriptedTransport {
    /// Transport answering with `handler(url, requests)`.
    pub fn new(
        handler: impl Fn(&str, &[RpcRequest]) -> TransportResponse + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Number of `send` calls.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Every `(urls, payload)` sent so far.
    pub fn calls(&self) -> Vec<(Vec<String>, String)> {
        self.calls.lock().clone()
    }

    /// Method names of every request sent, in order.
    pub fn sent_methods(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .flat_map(|(_, payload)| parse_payload(payload))
            .map(|r| r.method)
            .collect()
    }
}

impl Transport for ScriptedTransport {
    fn send(
        &self,
        urls: &[String],
        payload: &str,
    ) -> Result<Vec<TransportResponse>, CollaboratorError> {
        self.calls.lock().push((urls.to_vec(), payload.to_owned()));
        let requests = parse_payload(payload);
        Ok(urls
            .iter()
            .map(|url| (self.handler)(url, &requests))
            .collect())
    }
}

/// Declines everything.
#[derive(Debug, Default)]
pub struct DecliningTransport;

impl Transport for DecliningTransport {
    fn send(&self, _: &[String], _: &str) -> Result<Vec<TransportResponse>, CollaboratorError> {
        Err(CollaboratorError::Unsupported)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Verifiers
// ═══════════════════════════════════════════════════════════════════════

/// Accepts every response.
#[derive(Debug, Default)]
pub struct AcceptAllVerifier;

impl Verifier for AcceptAllVerifier {
    fn verify(&self, _: &mut VerifyContext<'_>) -> Result<Verdict, CollaboratorError> {
        Ok(Verdict::Accept)
    }
}

/// Declines every response, as a verifier for another chain would.
#[derive(Debug, Default)]
pub struct DecliningVerifier;

impl Verifier for DecliningVerifier {
    fn verify(&self, _: &mut VerifyContext<'_>) -> Result<Verdict, CollaboratorError> {
        Err(CollaboratorError::Unsupported)
    }
}

/// Rejects responses from a fixed set of nodes. Counts its invocations.
#[derive(Debug, Default)]
pub struct RejectNodesVerifier {
    liars: HashSet<Address>,
    calls: AtomicUsize,
}

impl RejectNodesVerifier {
    /// Reject answers from `liars`.
    pub fn new(liars: impl IntoIterator<Item = Address>) -> Self {
        Self {
            liars: liars.into_iter().collect(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Responses judged so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Verifier for RejectNodesVerifier {
    fn verify(&self, cx: &mut VerifyContext<'_>) -> Result<Verdict, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.liars.contains(&cx.node) {
            Ok(Verdict::Reject(format!("{} returned a wrong result", cx.node)))
        } else {
            Ok(Verdict::Accept)
        }
    }
}

/// Needs one auxiliary call before accepting, like a proof verifier that
/// fetches a block header.
#[derive(Debug)]
pub struct RequireVerifier {
    /// Method of the auxiliary call.
    pub method: String,
    /// Params of the auxiliary call.
    pub params: Value,
    /// Only responses to this method are judged; others are declined.
    pub for_method: Option<String>,
}

impl RequireVerifier {
    /// Require `method(params)` for every response.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
            for_method: None,
        }
    }

    /// Only judge responses to `method`.
    pub fn only_for(mut self, method: impl Into<String>) -> Self {
        self.for_method = Some(method.into());
        self
    }
}

impl Verifier for RequireVerifier {
    fn verify(&self, cx: &mut VerifyContext<'_>) -> Result<Verdict, CollaboratorError> {
        match &self.for_method {
            Some(m) if *m != cx.request.method => return Err(CollaboratorError::Unsupported),
            _ => {}
        }
        match cx.require(&self.method, self.params.clone()) {
            Dependency::Ready(_) => Ok(Verdict::Accept),
            Dependency::Pending => Ok(Verdict::Pending),
            Dependency::Failed(e) => Ok(Verdict::Reject(format!("dependency failed: {e}"))),
        }
    }
}

/// Requires a signature over the result from the answering node's account.
#[derive(Debug, Default)]
pub struct SignatureVerifier;

impl Verifier for SignatureVerifier {
    fn verify(&self, cx: &mut VerifyContext<'_>) -> Result<Verdict, CollaboratorError> {
        let message = cx.result().map(Value::to_string).unwrap_or_default();
        let node = cx.node;
        match cx.require_signature(message.as_bytes(), node, DigestKind::Hashed) {
            Dependency::Ready(_) => Ok(Verdict::Accept),
            Dependency::Pending => Ok(Verdict::Pending),
            Dependency::Failed(e) => Err(CollaboratorError::Failed(e)),
        }
    }
}

/// Accepts everything, relaying that the answering node claims `offline`
/// did not respond.
#[derive(Debug)]
pub struct OfflineReportingVerifier {
    /// Node reported as unreachable.
    pub offline: Address,
}

impl Verifier for OfflineReportingVerifier {
    fn verify(&self, cx: &mut VerifyContext<'_>) -> Result<Verdict, CollaboratorError> {
        if cx.node != self.offline {
            cx.report_offline(self.offline);
        }
        Ok(Verdict::Accept)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Signers
// ═══════════════════════════════════════════════════════════════════════

/// Produces `account ‖ message` as the "signature".
#[derive(Debug, Default)]
pub struct EchoSigner {
    calls: AtomicUsize,
}

impl EchoSigner {
    /// Signatures produced so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Signer for EchoSigner {
    fn sign(
        &self,
        message: &[u8],
        account: &Address,
        _digest: DigestKind,
    ) -> Result<Vec<u8>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut sig = account.as_bytes().to_vec();
        sig.extend_from_slice(message);
        Ok(sig)
    }
}

/// Fails every signature.
#[derive(Debug, Default)]
pub struct FailingSigner;

impl Signer for FailingSigner {
    fn sign(&self, _: &[u8], account: &Address, _: DigestKind) -> Result<Vec<u8>, CollaboratorError> {
        Err(EngineError::unsupported(format!("key for {account} is locked")).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use meshrpc_core::Collaborators;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_scripted_transport_records_calls() {
        let transport = ScriptedTransport::new(|_, reqs| {
            fixtures::ok(&[fixtures::result_response(1, json!(reqs.len()))], 10)
        });
        let payload = r#"[{"id":1,"jsonrpc":"2.0","method":"eth_chainId","params":[]}]"#;
        let out = transport
            .send(&["a".to_string(), "b".to_string()], payload)
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(transport.call_count(), 1);
        assert_eq!(transport.sent_methods(), vec!["eth_chainId".to_string()]);
    }

    #[test]
    fn test_declining_transport_falls_through() {
        let scripted = Arc::new(ScriptedTransport::new(|_, _| fixtures::unreachable()));
        let collaborators = Collaborators::new()
            .with_transport(Arc::new(DecliningTransport))
            .with_transport(scripted.clone());
        let out = collaborators.send(&["u".into()], "[]").unwrap();
        assert_eq!(out[0].status, 503);
        assert_eq!(scripted.call_count(), 1);
    }

    #[test]
    fn test_echo_signer() {
        let signer = EchoSigner::default();
        let account = Address::new([9; 20]);
        let sig = signer.sign(b"hi", &account, DigestKind::Raw).unwrap();
        assert_eq!(&sig[..20], account.as_bytes());
        assert_eq!(&sig[20..], b"hi");
        assert_eq!(signer.calls(), 1);
    }
}
