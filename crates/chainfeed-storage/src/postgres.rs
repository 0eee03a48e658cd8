//! PostgreSQL cursor store.
//!
//! Same layout and transaction discipline as the SQLite backend, over a
//! pooled `sqlx` connection for shared deployments.
//!
//! # Feature Flag
//! Requires the `postgres` feature:
//! ```toml
//! chainfeed-storage = { version = "0.2", features = ["postgres"] }
//! ```
//!
//! # Schema
//! Created automatically on first connect:
//! - `chainfeed_cursors` — one row per cursor key (`{chain}:block-cursor`)
//! - `chainfeed_block_log` — append-only payload log keyed by stream
//!   (`{chain}:block-stream`) and a `BIGSERIAL` position

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use chainfeed_core::error::ConnectorError;
use chainfeed_core::keys::{cursor_key, stream_key};
use chainfeed_core::store::{prepare_batch, CursorStore, LogEntry};
use chainfeed_core::types::{Block, ChainId};

fn storage_err(e: sqlx::Error) -> ConnectorError {
    ConnectorError::Storage(e.to_string())
}

/// Connection options for the Postgres backend.
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    /// Maximum number of connections in the pool (default: 4)
    pub max_connections: u32,
    /// Connection timeout in seconds (default: 30)
    pub connect_timeout_secs: u64,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            max_connections: 4,
            connect_timeout_secs: 30,
        }
    }
}

/// PostgreSQL-backed cursor store for one chain identity.
#[derive(Clone)]
pub struct PostgresCursorStore {
    pool: PgPool,
    chain_id: ChainId,
    cursor_key: String,
    stream_key: String,
}

impl PostgresCursorStore {
    /// Connect with default options and initialize the schema.
    ///
    /// `postgresql://[user[:password]@][host][:port][/dbname]`
    pub async fn connect(
        database_url: &str,
        chain_id: impl Into<ChainId>,
    ) -> Result<Self, ConnectorError> {
        Self::connect_with(database_url, chain_id, PostgresOptions::default()).await
    }

    pub async fn connect_with(
        database_url: &str,
        chain_id: impl Into<ChainId>,
        opts: PostgresOptions,
    ) -> Result<Self, ConnectorError> {
        let pool = PgPoolOptions::new()
            .max_connections(opts.max_connections)
            .acquire_timeout(std::time::Duration::from_secs(opts.connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(storage_err)?;

        let chain_id = chain_id.into();
        let store = Self {
            cursor_key: cursor_key(chain_id.as_str()),
            stream_key: stream_key(chain_id.as_str()),
            pool,
            chain_id,
        };
        store.init_schema().await?;
        info!(chain = %store.chain_id, "postgres cursor store ready");
        Ok(store)
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    /// Close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn init_schema(&self) -> Result<(), ConnectorError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chainfeed_cursors (
                key        TEXT        PRIMARY KEY,
                cursor     TEXT        NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chainfeed_block_log (
                position BIGSERIAL PRIMARY KEY,
                stream   TEXT      NOT NULL,
                data     TEXT      NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chainfeed_block_log_stream
             ON chainfeed_block_log (stream, position)",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }
}

#[async_trait]
impl CursorStore for PostgresCursorStore {
    async fn cursor(&self) -> Result<Option<u64>, ConnectorError> {
        let row = sqlx::query("SELECT cursor FROM chainfeed_cursors WHERE key = $1")
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
            "INSERT INTO chainfeed_cursors (key, cursor, updated_at) VALUES ($1, $2, $3)
             ON CONFLICT (key)
             DO UPDATE SET
                cursor     = EXCLUDED.cursor,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(&self.cursor_key)
        .bind(checkpoint.to_string())
        .bind(chrono::Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        for payload in &data {
            sqlx::query("INSERT INTO chainfeed_block_log (stream, data) VALUES ($1, $2)")
                .bind(&self.stream_key)
                .bind(payload)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }

        tx.commit()
            .await
            .map_err(|e| ConnectorError::Storage(format!("commit batch: {e}")))?;

        debug!(
            "blocks saved: chain={} cursor={} entries={}",
            self.chain_id,
            checkpoint,
            data.len()
        );
        Ok(checkpoint)
    }

    async fn entries_after(
        &self,
        after: u64,
        limit: usize,
    ) -> Result<Vec<LogEntry>, ConnectorError> {
        let rows = sqlx::query(
            "SELECT position, data FROM chainfeed_block_log
             WHERE stream = $1 AND position > $2
             ORDER BY position LIMIT $3",
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
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM chainfeed_block_log WHERE stream = $1")
            .bind(&self.stream_key)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;

        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }
}

#[cfg(test)]
mod tests {
    // Integration tests require a running PostgreSQL instance.
    // Example: DATABASE_URL=postgresql://localhost/chainfeed_test cargo test --features postgres

    use super::*;
    use serde_json::json;

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL to enable)"]
    async fn test_postgres_save_and_resume() {
        let url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set for integration tests");
        let chain = format!("test-{}", std::process::id());
        let store = PostgresCursorStore::connect(&url, chain.as_str()).await.unwrap();

        assert_eq!(store.cursor().await.unwrap(), None);
        store
            .save(&[Block::new(7, json!({"n": 7})), Block::new(8, json!({"n": 8}))])
            .await
            .unwrap();

        assert_eq!(store.cursor().await.unwrap(), Some(8));
        assert_eq!(store.log_len().await.unwrap(), 2);
        let entries = store.entries_after(0, 10).await.unwrap();
        assert_eq!(entries[0].data, r#"{"n":7}"#);

        assert_eq!(store.entries_after(0, usize::MAX).await.unwrap().len(), 2);
        assert!(store.entries_after(u64::MAX, 10).await.unwrap().is_empty());
    }
}
