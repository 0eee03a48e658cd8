//! Shared types for the ingestion pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Block ────────────────────────────────────────────────────────────────────

/// A block as fetched from the chain.
///
/// Only `number` is interpreted; `payload` is persisted verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Block number.
    pub number: u64,
    /// The block body exactly as the source returned it.
    pub payload: Value,
}

impl Block {
    pub fn new(number: u64, payload: Value) -> Self {
        Self { number, payload }
    }

    /// Serialized form written to the block log.
    pub fn encode_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.payload)
    }
}

/// Returns the highest block number in `blocks`, or `None` for an empty slice.
pub fn max_block_number(blocks: &[Block]) -> Option<u64> {
    blocks.iter().map(|b| b.number).max()
}

// ─── ChainId ─────────────────────────────────────────────────────────────────

/// Namespace for one ingestion stream inside a shared store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainId(String);

impl ChainId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChainId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChainId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ─── SubscriptionId ──────────────────────────────────────────────────────────

/// Identifier assigned by the node when a head subscription is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

impl From<String> for SubscriptionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn max_number_ignores_order() {
        let blocks = vec![
            Block::new(7, json!({})),
            Block::new(9, json!({})),
            Block::new(8, json!({})),
        ];
        assert_eq!(max_block_number(&blocks), Some(9));
        assert_eq!(max_block_number(&[]), None);
    }

    #[test]
    fn payload_is_encoded_verbatim() {
        let block = Block::new(1, json!({"hash": "0xabc", "number": "0x1"}));
        let encoded = block.encode_payload().unwrap();
        let back: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(back, block.payload);
    }
}
