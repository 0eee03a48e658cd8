//! In-memory cursor store.
//!
//! Models a key-value server: one record per cursor key, one log per stream
//! key, shared by every chain identity that uses the same backing map. A
//! `save` stages the cursor update and the log append under a single lock and
//! commits both or neither. Faults can be injected between the two steps to
//! exercise that guarantee.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chainfeed_core::error::ConnectorError;
use chainfeed_core::keys::{cursor_key, stream_key, CURSOR_FIELD};
use chainfeed_core::store::{prepare_batch, CursorStore, LogEntry};
use chainfeed_core::types::{Block, ChainId};

/// Where an injected fault interrupts the next `save`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// Before anything is staged.
    BeforeWrite,
    /// After the cursor is staged, before the log append.
    AfterCursor,
    /// After some log entries are staged, before commit.
    MidAppend,
}

#[derive(Default)]
struct Backing {
    records: HashMap<String, HashMap<String, String>>,
    streams: HashMap<String, Vec<LogEntry>>,
    fault: Option<FaultPoint>,
}

/// In-memory cursor store.
///
/// Cloning shares the backing map. All data is lost when the last clone drops.
#[derive(Clone)]
pub struct InMemoryCursorStore {
    chain_id: ChainId,
    backing: Arc<Mutex<Backing>>,
}

impl InMemoryCursorStore {
    pub fn new(chain_id: impl Into<ChainId>) -> Self {
        Self {
            chain_id: chain_id.into(),
            backing: Arc::new(Mutex::new(Backing::default())),
        }
    }

    /// A store for another chain identity sharing this store's backing map.
    pub fn for_chain(&self, chain_id: impl Into<ChainId>) -> Self {
        Self {
            chain_id: chain_id.into(),
            backing: Arc::clone(&self.backing),
        }
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    /// Make the next `save` fail at `point`.
    pub fn inject_fault(&self, point: FaultPoint) {
        self.lock().fault = Some(point);
    }

    /// Highest block number recorded in the log payloads, for payloads that
    /// carry a numeric `number` field. Test helper for atomicity checks.
    pub fn highest_logged_number(&self) -> Option<u64> {
        let backing = self.lock();
        backing
            .streams
            .get(&stream_key(self.chain_id.as_str()))?
            .iter()
            .filter_map(|e| serde_json::from_str::<serde_json::Value>(&e.data).ok())
            .filter_map(|v| v.get("number").and_then(|n| n.as_u64()))
            .max()
    }

    fn lock(&self) -> MutexGuard<'_, Backing> {
        self.backing.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn cursor(&self) -> Result<Option<u64>, ConnectorError> {
        let backing = self.lock();
        let raw = backing
            .records
            .get(&cursor_key(self.chain_id.as_str()))
            .and_then(|r| r.get(CURSOR_FIELD));
        match raw {
            None => Ok(None),
            Some(s) => s
                .parse::<u64>()
                .map(Some)
                .map_err(|e| ConnectorError::Storage(format!("corrupt cursor {s:?}: {e}"))),
        }
    }

    async fn save(&self, blocks: &[Block]) -> Result<u64, ConnectorError> {
        let (checkpoint, data) = prepare_batch(blocks)?;
        let mut backing = self.lock();
        let fault = backing.fault.take();

        if fault == Some(FaultPoint::BeforeWrite) {
            return Err(ConnectorError::Storage("injected fault before write".into()));
        }

        let staged_cursor = checkpoint.to_string();
        if fault == Some(FaultPoint::AfterCursor) {
            return Err(ConnectorError::Storage("injected fault after cursor update".into()));
        }

        let stream = stream_key(self.chain_id.as_str());
        let mut position = backing
            .streams
            .get(&stream)
            .and_then(|s| s.last())
            .map(|e| e.position)
            .unwrap_or(0);
        let mut staged_entries = Vec::with_capacity(data.len());
        for payload in data {
            position += 1;
            staged_entries.push(LogEntry { position, data: payload });
            if fault == Some(FaultPoint::MidAppend) {
                return Err(ConnectorError::Storage("injected fault during log append".into()));
            }
        }

        // Commit: both effects become visible together.
        backing
            .records
            .entry(cursor_key(self.chain_id.as_str()))
            .or_default()
            .insert(CURSOR_FIELD.to_string(), staged_cursor);
        backing.streams.entry(stream).or_default().extend(staged_entries);

        tracing::debug!(chain = %self.chain_id, cursor = checkpoint, "blocks saved");
        Ok(checkpoint)
    }

    async fn entries_after(
        &self,
        after: u64,
        limit: usize,
    ) -> Result<Vec<LogEntry>, ConnectorError> {
        let backing = self.lock();
        Ok(backing
            .streams
            .get(&stream_key(self.chain_id.as_str()))
            .map(|s| {
                s.iter()
                    .filter(|e| e.position > after)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn log_len(&self) -> Result<u64, ConnectorError> {
        let backing = self.lock();
        Ok(backing
            .streams
            .get(&stream_key(self.chain_id.as_str()))
            .map(|s| s.len() as u64)
            .unwrap_or(0))
    }
}
