//! JSON-RPC response fixtures.
//!
//! Builders return response bodies exactly as a node would put them on the
//! wire, so tests exercise the engine's parsing paths too.

use meshrpc_core::{RpcRequest, TransportResponse};
use meshrpc_registry::NodeListEntry;
use serde_json::{json, Value};

/// Side-channel metadata a node attaches to a response.
pub fn meta(last_node_list: u64, current_block: u64) -> Value {
    json!({
        "lastNodeList": format!("0x{last_node_list:x}"),
        "currentBlock": current_block,
    })
}

/// A successful response object.
pub fn result_response(id: u64, result: Value) -> Value {
    json!({ "id": id, "jsonrpc": "2.0", "result": result })
}

/// A successful response object carrying metadata.
pub fn result_response_with_meta(id: u64, result: Value, meta: Value) -> Value {
    json!({ "id": id, "jsonrpc": "2.0", "result": result, "meta": meta })
}

/// An error response object.
pub fn error_response(id: u64, message: &str) -> Value {
    json!({
        "id": id,
        "jsonrpc": "2.0",
        "error": { "code": -32000, "message": message },
    })
}

/// Node-list refresh result.
pub fn nodelist_result(entries: &[NodeListEntry], last_block: u64) -> Value {
    let nodes: Vec<Value> = entries
        .iter()
        .map(|e| {
            json!({
                "url": e.url,
                "address": e.address.to_hex(),
                "props": format!("0x{:x}", e.props.bits()),
                "deposit": e.deposit,
                "capacity": e.capacity,
                "registerTime": e.register_time,
            })
        })
        .collect();
    json!({ "nodes": nodes, "lastBlockNumber": last_block })
}

/// Serialize responses as a batch body.
pub fn batch_body(responses: &[Value]) -> String {
    Value::Array(responses.to_vec()).to_string()
}

/// A 200 response carrying a batch body.
pub fn ok(responses: &[Value], elapsed_ms: u32) -> TransportResponse {
    TransportResponse::ok(batch_body(responses), elapsed_ms)
}

/// A connection failure.
pub fn unreachable() -> TransportResponse {
    TransportResponse::failed(503, "connection refused", 0)
}

/// Requests of a payload the engine sent.
pub fn parse_payload(payload: &str) -> Vec<RpcRequest> {
    let value: Value = serde_json::from_str(payload).expect("payload is json");
    value
        .as_array()
        .expect("payload is a batch")
        .iter()
        .map(|item| serde_json::from_value(item.clone()).expect("payload item is a request"))
        .collect()
}

/// Raw payload items, including engine metadata.
pub fn payload_items(payload: &str) -> Vec<Value> {
    let value: Value = serde_json::from_str(payload).expect("payload is json");
    value.as_array().cloned().unwrap_or_default()
}
