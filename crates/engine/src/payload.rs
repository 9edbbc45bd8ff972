//! Wire payloads and response bodies.

use crate::config::Verification;
use meshrpc_core::{EngineError, RpcRequest};
use meshrpc_types::Address;
use serde_json::{json, Map, Value};

/// Serialize a batch as the JSON-RPC array sent to every selected node.
///
/// Request ids are 1-based batch positions. Engine metadata rides in a
/// `meta` member: the verification level when proofs are wanted, and the
/// signer nodes the answering node should collect signatures from.
pub(crate) fn build(
    requests: &[RpcRequest],
    signers: &[Address],
    verification: Verification,
) -> String {
    let items: Vec<Value> = requests
        .iter()
        .enumerate()
        .map(|(i, req)| {
            let mut item = json!({
                "id": i + 1,
                "jsonrpc": "2.0",
                "method": req.method,
                "params": req.params,
            });
            let mut meta = Map::new();
            if verification != Verification::None {
                meta.insert("verification".into(), verification.as_str().into());
            }
            if !signers.is_empty() {
                let signers: Vec<Value> = signers.iter().map(|a| a.to_hex().into()).collect();
                meta.insert("signers".into(), Value::Array(signers));
            }
            if !meta.is_empty() {
                item["meta"] = Value::Object(meta);
            }
            item
        })
        .collect();
    Value::Array(items).to_string()
}

/// Split a node's body into one response object per request.
///
/// A single object is accepted for a single request.
pub(crate) fn split_body(body: &str, expected: usize) -> Result<Vec<Value>, EngineError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| EngineError::remote(format!("Invalid response: {e}")))?;
    let items = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        _ => return Err(EngineError::remote("Invalid response: not a JSON-RPC object")),
    };
    if items.len() != expected {
        return Err(EngineError::remote(format!(
            "Invalid response: expected {expected} results, got {}",
            items.len()
        )));
    }
    if !items.iter().all(Value::is_object) {
        return Err(EngineError::remote("Invalid response: not a JSON-RPC object"));
    }
    Ok(items)
}
