//! Inbound frame decoding for the head subscription.
//!
//! Push frames carry no type tag, so [`Frame::decode`] tries each known shape
//! in a fixed precedence order and returns the first match:
//!
//! 1. [`Frame::SubscribeAck`] — `{jsonrpc, result: string, id: 1}`
//! 2. [`Frame::UnsubscribeAck`] — `{jsonrpc, result: bool, id: number}`
//! 3. [`Frame::Info`] — `{jsonrpc, result: string, id: 3}` (chain-id probe)
//! 4. [`Frame::NewHead`] — `{jsonrpc, method, params: {subscription, result: {number}}}`
//! 5. [`Frame::Unrecognized`]
//!
//! Whether a decoded frame is acceptable depends on the subscription state,
//! which the head channel applies on top of this decode.

use serde_json::{json, Value};

use chainfeed_core::types::SubscriptionId;
use chainfeed_rpc::request::JsonRpcRequest;

use crate::fetcher::parse_hex_u64;

/// Request id of `eth_subscribe`.
pub const SUBSCRIBE_REQUEST_ID: u64 = 1;
/// Request id of `eth_unsubscribe`.
pub const UNSUBSCRIBE_REQUEST_ID: u64 = 2;
/// Request id of the informational `eth_chainId` probe.
pub const CHAIN_ID_REQUEST_ID: u64 = 3;

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// The node accepted the head subscription.
    SubscribeAck { subscription: SubscriptionId },
    /// The node answered an unsubscribe request.
    UnsubscribeAck { removed: bool },
    /// Response to an informational query; never surfaced to callers.
    Info { id: u64, result: String },
    /// The chain head may have advanced.
    NewHead {
        subscription: SubscriptionId,
        number: u64,
    },
    /// Anything else.
    Unrecognized(Value),
}

impl Frame {
    /// Classify `value` against the known shapes in precedence order.
    pub fn decode(value: Value) -> Self {
        if let Some(frame) = subscribe_ack(&value) {
            return frame;
        }
        if let Some(frame) = unsubscribe_ack(&value) {
            return frame;
        }
        if let Some(frame) = info(&value) {
            return frame;
        }
        if let Some(frame) = new_head(&value) {
            return frame;
        }
        Self::Unrecognized(value)
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SubscribeAck { .. } => "subscribe-ack",
            Self::UnsubscribeAck { .. } => "unsubscribe-ack",
            Self::Info { .. } => "info",
            Self::NewHead { .. } => "new-head",
            Self::Unrecognized(_) => "unrecognized",
        }
    }
}

fn protocol(v: &Value) -> Option<&str> {
    v.get("jsonrpc")?.as_str()
}

fn subscribe_ack(v: &Value) -> Option<Frame> {
    protocol(v)?;
    let result = v.get("result")?.as_str()?;
    (v.get("id")?.as_u64()? == SUBSCRIBE_REQUEST_ID).then(|| Frame::SubscribeAck {
        subscription: SubscriptionId(result.to_string()),
    })
}

fn unsubscribe_ack(v: &Value) -> Option<Frame> {
    protocol(v)?;
    let removed = v.get("result")?.as_bool()?;
    v.get("id")?.as_u64()?;
    Some(Frame::UnsubscribeAck { removed })
}

fn info(v: &Value) -> Option<Frame> {
    protocol(v)?;
    let result = v.get("result")?.as_str()?;
    let id = v.get("id")?.as_u64()?;
    (id == CHAIN_ID_REQUEST_ID).then(|| Frame::Info {
        id,
        result: result.to_string(),
    })
}

fn new_head(v: &Value) -> Option<Frame> {
    protocol(v)?;
    v.get("method")?.as_str()?;
    let params = v.get("params")?;
    let subscription = params.get("subscription")?.as_str()?;
    let number = parse_hex_u64(params.get("result")?.get("number")?.as_str()?)?;
    Some(Frame::NewHead {
        subscription: SubscriptionId(subscription.to_string()),
        number,
    })
}

// ─── Outbound requests ────────────────────────────────────────────────────────

/// `eth_subscribe("newHeads")`.
pub fn subscribe_request() -> JsonRpcRequest {
    JsonRpcRequest::new(SUBSCRIBE_REQUEST_ID, "eth_subscribe", vec![json!("newHeads")])
}

/// `eth_unsubscribe(id)`.
pub fn unsubscribe_request(id: &SubscriptionId) -> JsonRpcRequest {
    JsonRpcRequest::new(UNSUBSCRIBE_REQUEST_ID, "eth_unsubscribe", vec![json!(id.0)])
}

/// `eth_chainId()`, answered by an [`Frame::Info`] frame.
pub fn chain_id_request() -> JsonRpcRequest {
    JsonRpcRequest::new(CHAIN_ID_REQUEST_ID, "eth_chainId", vec![])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(sub: &str, number: &str) -> Value {
        json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": { "subscription": sub, "result": { "number": number, "hash": "0xabc" } }
        })
    }

    #[test]
    fn decodes_subscribe_ack() {
        let frame = Frame::decode(json!({"jsonrpc": "2.0", "result": "0xsub", "id": 1}));
        assert_eq!(
            frame,
            Frame::SubscribeAck { subscription: SubscriptionId("0xsub".into()) }
        );
    }

    #[test]
    fn string_result_with_other_id_is_not_a_subscribe_ack() {
        let frame = Frame::decode(json!({"jsonrpc": "2.0", "result": "0x1", "id": 3}));
        assert_eq!(frame, Frame::Info { id: 3, result: "0x1".into() });

        let frame = Frame::decode(json!({"jsonrpc": "2.0", "result": "0x1", "id": 9}));
        assert!(matches!(frame, Frame::Unrecognized(_)));
    }

    #[test]
    fn decodes_unsubscribe_ack_for_any_numeric_id() {
        let frame = Frame::decode(json!({"jsonrpc": "2.0", "result": true, "id": 2}));
        assert_eq!(frame, Frame::UnsubscribeAck { removed: true });

        let frame = Frame::decode(json!({"jsonrpc": "2.0", "result": false, "id": 44}));
        assert_eq!(frame, Frame::UnsubscribeAck { removed: false });
    }

    #[test]
    fn decodes_new_head() {
        let frame = Frame::decode(head("0xsub", "0x67"));
        assert_eq!(
            frame,
            Frame::NewHead { subscription: SubscriptionId("0xsub".into()), number: 103 }
        );
    }

    #[test]
    fn head_with_bad_number_is_unrecognized() {
        assert!(matches!(Frame::decode(head("0xsub", "zz")), Frame::Unrecognized(_)));
    }

    #[test]
    fn missing_protocol_tag_is_unrecognized() {
        let frame = Frame::decode(json!({"result": "0xsub", "id": 1}));
        assert!(matches!(frame, Frame::Unrecognized(_)));
    }

    #[test]
    fn rpc_error_response_is_unrecognized() {
        let frame = Frame::decode(json!({
            "jsonrpc": "2.0", "id": 1, "error": {"code": -32601, "message": "no subscriptions"}
        }));
        assert_eq!(frame.kind(), "unrecognized");
    }

    #[test]
    fn requests_use_fixed_ids() {
        assert_eq!(subscribe_request().numeric_id(), Some(SUBSCRIBE_REQUEST_ID));
        let unsub = unsubscribe_request(&SubscriptionId("0xsub".into()));
        assert_eq!(unsub.numeric_id(), Some(UNSUBSCRIBE_REQUEST_ID));
        assert_eq!(unsub.params, vec![json!("0xsub")]);
        assert_eq!(chain_id_request().method, "eth_chainId");
    }
}
