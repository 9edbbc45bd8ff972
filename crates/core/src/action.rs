//! Outputs of a step: I/O the caller must perform.

use crate::DigestKind;
use meshrpc_types::Address;
use std::fmt;

/// Identifies a context within one request tree.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u32);

impl fmt::Debug for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// I/O requested by the engine.
///
/// The engine never performs I/O itself. It returns actions from a step; the
/// caller executes them and feeds the results back with `add_response` or
/// `add_signature` before stepping again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send a serialized payload to every URL.
    ///
    /// Feed one response per URL back, in order.
    Send {
        /// Context waiting for the responses.
        context: ContextId,
        /// Endpoints of the selected nodes.
        urls: Vec<String>,
        /// JSON-RPC payload.
        payload: String,
    },

    /// Produce a signature.
    Sign {
        /// Context waiting for the signature.
        context: ContextId,
        /// Bytes to sign.
        message: Vec<u8>,
        /// Signing account.
        account: Address,
        /// Digest to apply before signing.
        digest: DigestKind,
    },
}

impl Action {
    /// Context the action belongs to.
    pub fn context(&self) -> ContextId {
        match self {
            Self::Send { context, .. } | Self::Sign { context, .. } => *context,
        }
    }
}
