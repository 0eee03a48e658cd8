//! JSON-RPC 2.0 envelopes exchanged with the node.
//!
//! The connector only ever issues numeric ids (subscribe, unsubscribe, the
//! chain-id query and HTTP block fetches), but nodes may echo string or null
//! ids in error responses, so [`RpcId`] accepts all three.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request id as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => f.write_str("null"),
        }
    }
}

/// Outbound call, e.g. `eth_subscribe(["newHeads"])` or
/// `eth_getBlockByNumber(["0x10", false])`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: RpcId,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id: RpcId::Number(id),
        }
    }

    /// Push replies are matched on this id.
    pub fn numeric_id(&self) -> Option<u64> {
        match self.id {
            RpcId::Number(n) => Some(n),
            _ => None,
        }
    }
}

/// Error object a node returns instead of a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node rejected call ({}): {}", self.code, self.message)
    }
}

/// Reply to a pull-style call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RpcId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The result, or the node's error if one was returned.
    ///
    /// `eth_getBlockByNumber` answers `null` for a block the node does not
    /// have yet; that and an absent `result` both come back as `Value::Null`
    /// so callers can map it to "no such block".
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}
