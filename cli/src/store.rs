//! Store selection by URL scheme.
//!
//! - `memory:` — in-process, lost on exit
//! - `sqlite:<path>` — single file, created if missing
//! - `postgres://…` / `postgresql://…`

use anyhow::{bail, Context};
use async_trait::async_trait;
use url::Url;

use chainfeed_core::error::ConnectorError;
use chainfeed_core::store::{CursorStore, LogEntry};
use chainfeed_core::types::{Block, ChainId};
use chainfeed_storage::{InMemoryCursorStore, PostgresCursorStore, SqliteCursorStore};

/// Any configured cursor store backend.
pub enum AnyStore {
    Memory(InMemoryCursorStore),
    Sqlite(SqliteCursorStore),
    Postgres(PostgresCursorStore),
}

impl AnyStore {
    pub async fn open(url: &Url, chain_id: &ChainId) -> anyhow::Result<Self> {
        let store = match url.scheme() {
            "memory" => Self::Memory(InMemoryCursorStore::new(chain_id.clone())),
            "sqlite" => {
                let raw = url.as_str();
                let path = raw
                    .strip_prefix("sqlite://")
                    .or_else(|| raw.strip_prefix("sqlite:"))
                    .unwrap_or(raw);
                let path = path.split('?').next().unwrap_or(path);
                Self::Sqlite(
                    SqliteCursorStore::open(path, chain_id.clone())
                        .await
                        .with_context(|| format!("open sqlite store at {path}"))?,
                )
            }
            "postgres" | "postgresql" => Self::Postgres(
                PostgresCursorStore::connect(url.as_str(), chain_id.clone())
                    .await
                    .context("connect to postgres store")?,
            ),
            other => bail!("unsupported store scheme {other:?} (expected memory, sqlite, postgres)"),
        };
        tracing::debug!(backend = store.backend(), chain = %chain_id, "cursor store opened");
        Ok(store)
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Sqlite(_) => "sqlite",
            Self::Postgres(_) => "postgres",
        }
    }

    pub async fn close(&self) {
        match self {
            Self::Memory(_) => {}
            Self::Sqlite(s) => s.close().await,
            Self::Postgres(s) => s.close().await,
        }
    }
}

#[async_trait]
impl CursorStore for AnyStore {
    async fn cursor(&self) -> Result<Option<u64>, ConnectorError> {
        match self {
            Self::Memory(s) => s.cursor().await,
            Self::Sqlite(s) => s.cursor().await,
            Self::Postgres(s) => s.cursor().await,
        }
    }

    async fn save(&self, blocks: &[Block]) -> Result<u64, ConnectorError> {
        match self {
            Self::Memory(s) => s.save(blocks).await,
            Self::Sqlite(s) => s.save(blocks).await,
            Self::Postgres(s) => s.save(blocks).await,
        }
    }

    async fn entries_after(
        &self,
        after: u64,
        limit: usize,
    ) -> Result<Vec<LogEntry>, ConnectorError> {
        match self {
            Self::Memory(s) => s.entries_after(after, limit).await,
            Self::Sqlite(s) => s.entries_after(after, limit).await,
            Self::Postgres(s) => s.entries_after(after, limit).await,
        }
    }

    async fn log_len(&self) -> Result<u64, ConnectorError> {
        match self {
            Self::Memory(s) => s.log_len().await,
            Self::Sqlite(s) => s.log_len().await,
            Self::Postgres(s) => s.log_len().await,
        }
    }
}
