//! Cursor store — durable cursor plus the ordered block log.
//!
//! A store is bound to one chain identity at construction. The cursor is the
//! highest block number known to be persisted; the log holds one entry per
//! persisted block. Both change together in [`CursorStore::save`] or not at all.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;
use crate::types::{max_block_number, Block};

/// One entry of the block log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Log position: unique and increasing in append order, not necessarily
    /// contiguous. Positions start above 0.
    pub position: u64,
    /// Serialized block payload.
    pub data: String,
}

/// Durable state holder for a single chain identity.
///
/// Implementations: `InMemoryCursorStore`, `SqliteCursorStore`,
/// `PostgresCursorStore` (in `chainfeed-storage`).
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// The durably stored cursor, `None` if nothing was ever persisted.
    async fn cursor(&self) -> Result<Option<u64>, ConnectorError>;

    /// Atomically set the cursor to the highest number in `blocks` and append
    /// every payload to the log in input order. Returns the new cursor.
    ///
    /// Fails with [`ConnectorError::Invariant`] if `blocks` is empty.
    async fn save(&self, blocks: &[Block]) -> Result<u64, ConnectorError>;

    /// Log entries with `position > after`, oldest first, at most `limit`.
    async fn entries_after(&self, after: u64, limit: usize)
        -> Result<Vec<LogEntry>, ConnectorError>;

    /// Number of entries in the log.
    async fn log_len(&self) -> Result<u64, ConnectorError>;
}

/// Validate a batch and prepare it for a write: the checkpoint to record and
/// the serialized payloads in input order.
pub fn prepare_batch(blocks: &[Block]) -> Result<(u64, Vec<String>), ConnectorError> {
    let checkpoint = max_block_number(blocks).ok_or_else(|| {
        ConnectorError::Invariant("unexpectedly received an empty batch (no checkpoint)".into())
    })?;
    let data = blocks
        .iter()
        .map(|b| {
            b.encode_payload()
                .map_err(|e| ConnectorError::Storage(format!("serialize block {}: {e}", b.number)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((checkpoint, data))
}
