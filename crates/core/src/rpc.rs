//! JSON-RPC request and response shapes consumed by the engine.

use crate::{DigestKind, EngineError, EngineResult};
use meshrpc_types::serde_helpers::u64_or_hex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Method name of the node-list refresh request.
pub const NODELIST_METHOD: &str = "mesh_nodeList";

/// Error prefixes marking a node-side failure rather than an answer to the user.
const SERVER_ERROR_PREFIXES: [&str; 3] = ["Error:", "TypeError:", "Error connect"];

/// A single JSON-RPC call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Method name.
    pub method: String,
    /// Positional params.
    #[serde(default = "empty_params")]
    pub params: Value,
}

fn empty_params() -> Value {
    Value::Array(Vec::new())
}

impl RpcRequest {
    /// Create a request.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Parse a single request object or a non-empty batch array.
    pub fn parse_batch(input: &str) -> EngineResult<Vec<Self>> {
        let value: Value = serde_json::from_str(input)
            .map_err(|e| EngineError::invalid_input(format!("Invalid request: {e}")))?;
        let items = match value {
            Value::Array(items) if items.is_empty() => {
                return Err(EngineError::invalid_input("Empty batch request"))
            }
            Value::Array(items) => items,
            obj @ Value::Object(_) => vec![obj],
            _ => return Err(EngineError::invalid_input("Request must be an object or array")),
        };
        items
            .into_iter()
            .map(|item| {
                let req: Self = serde_json::from_value(item)
                    .map_err(|e| EngineError::invalid_input(format!("Invalid request: {e}")))?;
                if !req.params.is_array() {
                    return Err(EngineError::invalid_input("params must be an array"));
                }
                Ok(req)
            })
            .collect()
    }

    /// Content key over method and params.
    pub fn key(&self) -> RequestKey {
        RequestKey::for_call(&self.method, &self.params)
    }
}

/// Content hash identifying a sub-request for deduplication.
///
/// Two requests with the same method and structurally equal params produce the
/// same key. `serde_json` keeps object keys sorted, so the serialized params are
/// canonical.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey([u8; 32]);

impl RequestKey {
    /// Key for a method call.
    pub fn for_call(method: &str, params: &Value) -> Self {
        let params = params.to_string();
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"call");
        hasher.update(method.as_bytes());
        hasher.update(&[0u8]);
        hasher.update(params.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Key for a signing request. Each digest kind signs different bytes.
    pub fn for_signature(message: &[u8], account: &[u8], digest: DigestKind) -> Self {
        let digest = match digest {
            DigestKind::Raw => 0u8,
            DigestKind::Hashed => 1,
            DigestKind::PrefixedMessage => 2,
        };
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"sign");
        hasher.update(&[digest]);
        hasher.update(account);
        hasher.update(message);
        Self(*hasher.finalize().as_bytes())
    }

    /// Key for an explicit cache key.
    pub fn for_cache_key(key: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"cache");
        hasher.update(key.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }
}

impl fmt::Debug for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestKey({})", &hex::encode(self.0)[..12])
    }
}

/// Side-channel metadata a node attaches to its responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    /// Block at which the node's view of the node list last changed.
    #[serde(default, deserialize_with = "u64_or_hex")]
    pub last_node_list: u64,
    /// Node's current block.
    #[serde(default, deserialize_with = "u64_or_hex")]
    pub current_block: u64,
}

impl ResponseMeta {
    /// Extract from a response object's `meta` field.
    pub fn from_response(response: &Value) -> Option<Self> {
        response
            .get("meta")
            .and_then(|m| serde_json::from_value(m.clone()).ok())
    }
}

/// What a transport hands back for one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP-like status. 2xx is success.
    pub status: u16,
    /// Body, or an error description for failed statuses.
    pub body: String,
    /// Measured round-trip time.
    pub elapsed_ms: u32,
}

impl TransportResponse {
    /// Successful response.
    pub fn ok(body: impl Into<String>, elapsed_ms: u32) -> Self {
        Self {
            status: 200,
            body: body.into(),
            elapsed_ms,
        }
    }

    /// Failed response, e.g. connection refused.
    pub fn failed(status: u16, reason: impl Into<String>, elapsed_ms: u32) -> Self {
        Self {
            status,
            body: reason.into(),
            elapsed_ms,
        }
    }

    /// 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Error message carried by a JSON-RPC response, if any.
pub fn rpc_error_message(response: &Value) -> Option<String> {
    let err = response.get("error")?;
    match err {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(
            other
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| other.to_string()),
        ),
    }
}

/// A user error is a legitimate answer (e.g. a reverted call); anything else
/// means the node itself failed.
pub fn is_user_error(message: &str) -> bool {
    !SERVER_ERROR_PREFIXES
        .iter()
        .any(|prefix| message.starts_with(prefix))
}
