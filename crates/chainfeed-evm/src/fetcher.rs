//! EVM block source.
//!
//! Adapts a JSON-RPC [`RpcTransport`] to [`BlockSource`] using
//! `eth_blockNumber` and `eth_getBlockByNumber`. Blocks are fetched without
//! full transactions and persisted exactly as the node returns them.

use async_trait::async_trait;
use serde_json::{json, Value};

use chainfeed_core::error::ConnectorError;
use chainfeed_core::source::BlockSource;
use chainfeed_core::types::Block;
use chainfeed_rpc::error::TransportError;
use chainfeed_rpc::transport::RpcTransport;

const BLOCK_NUMBER_ID: u64 = 1;
const GET_BLOCK_ID: u64 = 2;

pub(crate) fn transport_err(e: TransportError) -> ConnectorError {
    ConnectorError::Transport(e.to_string())
}

/// [`BlockSource`] over an EVM JSON-RPC endpoint.
pub struct EvmBlockSource<T> {
    transport: T,
}

impl<T: RpcTransport> EvmBlockSource<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn block_by_tag(&self, tag: Value) -> Result<Option<Block>, ConnectorError> {
        let raw: Value = self
            .transport
            .call(GET_BLOCK_ID, "eth_getBlockByNumber", vec![tag, json!(false)])
            .await
            .map_err(transport_err)?;
        block_from_json(raw)
    }
}

#[async_trait]
impl<T: RpcTransport> BlockSource for EvmBlockSource<T> {
    async fn latest_height(&self) -> Result<u64, ConnectorError> {
        let hex: String = self
            .transport
            .call(BLOCK_NUMBER_ID, "eth_blockNumber", vec![])
            .await
            .map_err(transport_err)?;
        parse_hex_u64(&hex).ok_or_else(|| {
            ConnectorError::Transport(format!("eth_blockNumber returned a non-hex height {hex:?}"))
        })
    }

    async fn block(&self, number: u64) -> Result<Option<Block>, ConnectorError> {
        self.block_by_tag(json!(format!("{number:#x}"))).await
    }

    async fn latest_block(&self) -> Result<Option<Block>, ConnectorError> {
        self.block_by_tag(json!("latest")).await
    }
}

/// Parse a hex quantity (with or without `0x`). `None` if it is not valid hex.
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// `null` means the node has no such block yet.
pub fn block_from_json(v: Value) -> Result<Option<Block>, ConnectorError> {
    if v.is_null() {
        return Ok(None);
    }
    let number = v
        .get("number")
        .and_then(Value::as_str)
        .and_then(parse_hex_u64)
        .ok_or_else(|| ConnectorError::Transport(format!("block without a hex number: {v}")))?;
    Ok(Some(Block::new(number, v)))
}
