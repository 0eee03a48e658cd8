//! SQLite cursor store.
//!
//! Persists the cursor record and the block log to a single SQLite file using
//! `sqlx` with WAL mode. `save` runs the cursor upsert and every log insert in
//! one transaction, so a crash leaves either all of them or none.
//!
//! # Usage
//! ```rust,no_run
//! use chainfeed_storage::sqlite::SqliteCursorStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteCursorStore::open("./chainfeed.db", "eth-mainnet").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteCursorStore::in_memory("eth-mainnet").await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chainfeed_core::error::ConnectorError;
use chainfeed_core::keys::{cursor_key, stream_key};
use chainfeed_core::store::{prepare_batch, CursorStore, LogEntry};
use chainfeed_core::types::{Block, ChainId};

fn storage_err(e: sqlx::Error) -> ConnectorError {
    ConnectorError::Storage(e.to_string())
}

/// SQLite-backed cursor store for one chain identity.
#[derive(Clone)]
pub struct SqliteCursorStore {
    pool: SqlitePool,
    chain_id: ChainId,
    cursor_key: String,
    stream_key: String,
}

impl SqliteCursorStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./chainfeed.db"`) or a full
    /// SQLite URL (`"sqlite:./chainfeed.db?mode=rwc"`).
    pub async fn open(path: &str, chain_id: impl Into<ChainId>) -> Result<Self, ConnectorError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        Self::from_pool(pool, chain_id).await
    }

    /// Open an in-memory SQLite database.
    ///
    /// Uses a single connection so every query sees the same database.
    pub async fn in_memory(chain_id: impl Into<ChainId>) -> Result<Self, ConnectorError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;
        Self::from_pool(pool, chain_id).await
    }

    /// Bind a store to an existing pool (several chain identities may share one).
    pub async fn from_pool(
        pool: SqlitePool,
        chain_id: impl Into<ChainId>,
    ) -> Result<Self, ConnectorError> {
        let chain_id = chain_id.into();
        let store = Self {
            cursor_key: cursor_key(chain_id.as_str()),
            stream_key: stream_key(chain_id.as_str()),
            pool,
            chain_id,
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// A store for another chain identity over the same database.
    pub fn for_chain(&self, chain_id: impl Into<ChainId>) -> Self {
        let chain_id = chain_id.into();
        Self {
            pool: self.pool.clone(),
            cursor_key: cursor_key(chain_id.as_str()),
            stream_key: stream_key(chain_id.as_str()),
            chain_id,
        }
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), ConnectorError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS block_cursors (
                key        TEXT    PRIMARY KEY,
                cursor     TEXT    NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS block_log (
                position INTEGER PRIMARY KEY AUTOINCREMENT,
                stream   TEXT    NOT NULL,
                data     TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_block_log_stream ON block_log (stream, position);")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(())
    }
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    async fn cursor(&self) -> Result<Option<u64>, ConnectorError> {
        let row = sqlx::query("SELECT cursor FROM block_cursors WHERE key = ?")
            .bind(&self.cursor_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        match row {
            None => Ok(None),
            Some(r) => {
                let raw: String = r.get("cursor");
                raw.parse::<u64>()
                    .map(Some)
                    .map_err(|e| ConnectorError::Storage(format!("corrupt cursor {raw:?}: {e}")))
            }
        }
    }

    async fn save(&self, blocks: &[Block]) -> Result<u64, ConnectorError> {
        let (checkpoint, data) = prepare_batch(blocks)?;

        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        sqlx::query(
            "INSERT INTO block_cursors (key, cursor, updated_at) VALUES (?, ?, ?)
             ON CONFLICT (key) DO UPDATE SET
                cursor     = excluded.cursor,
                updated_at = excluded.updated_at",
        )
        .bind(&self.cursor_key)
        .bind(checkpoint.to_string())
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        for payload in &data {
            sqlx::query("INSERT INTO block_log (stream, data) VALUES (?, ?)")
                .bind(&self.stream_key)
                .bind(payload)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }

        tx.commit()
            .await
            .map_err(|e| ConnectorError::Storage(format!("commit batch: {e}")))?;

        debug!(chain = %self.chain_id, cursor = checkpoint, entries = data.len(), "blocks saved");
        Ok(checkpoint)
    }

    async fn entries_after(
        &self,
        after: u64,
        limit: usize,
    ) -> Result<Vec<LogEntry>, ConnectorError> {
        let rows = sqlx::query(
            "SELECT position, data FROM block_log
             WHERE stream = ? AND position > ?
             ORDER BY position LIMIT ?",
        )
        .bind(&self.stream_key)
        .bind(i64::try_from(after).unwrap_or(i64::MAX))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(rows
            .into_iter()
            .map(|r| LogEntry {
                position: r.get::<i64, _>("position") as u64,
                data: r.get("data"),
            })
            .collect())
    }

    async fn log_len(&self) -> Result<u64, ConnectorError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM block_log WHERE stream = ?")
            .bind(&self.stream_key)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;

        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }
}
