//! The ingestion loop.
//!
//! # Lifecycle
//! `Starting → Subscribing → Initializing → CatchingUp ⇄ Waiting → Stopped`,
//! with `Failed` reachable from every non-terminal state.
//!
//! 1. Subscribe to new heads.
//! 2. Resolve the starting cursor, bootstrapping it from the latest block on
//!    an empty store.
//! 3. With cursor `c`: if `c + 1` is at or below the chain head, fetch and
//!    persist it immediately; otherwise wait for a head notification and
//!    re-check. A wakeup carries no block number, so the head is always
//!    re-queried.
//!
//! Every exit path unsubscribes (best-effort, bounded by
//! [`ConnectorConfig::unsubscribe_grace`]). Cancellation is a clean stop, not
//! an error.

use tokio_util::sync::CancellationToken;

use chainfeed_core::error::ConnectorError;
use chainfeed_core::source::BlockSource;
use chainfeed_core::state::ConnectorState;
use chainfeed_core::store::CursorStore;
use chainfeed_rpc::push::PushSink;

use crate::builder::ConnectorConfig;
use crate::head::HeadChannel;

/// Follows one chain identity's head and persists every block exactly once.
///
/// Owns its collaborators; [`Connector::into_parts`] hands them back for
/// release once `run` returns.
pub struct Connector<S, C, P: PushSink> {
    config: ConnectorConfig,
    source: S,
    store: C,
    head: HeadChannel<P>,
    state: ConnectorState,
}

impl<S, C, P> Connector<S, C, P>
where
    S: BlockSource,
    C: CursorStore,
    P: PushSink,
{
    pub fn new(config: ConnectorConfig, source: S, store: C, head: HeadChannel<P>) -> Self {
        Self {
            config,
            source,
            store,
            head,
            state: ConnectorState::Starting,
        }
    }

    pub fn state(&self) -> ConnectorState {
        self.state
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn head(&self) -> &HeadChannel<P> {
        &self.head
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    pub fn into_parts(self) -> (S, C, HeadChannel<P>) {
        (self.source, self.store, self.head)
    }

    /// Drive ingestion until `cancel` fires (`Ok`) or a fatal error occurs.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), ConnectorError> {
        let chain = self.config.chain_id.clone();
        tracing::info!(chain = %chain, "Starting connector");

        let outcome = self.drive(&cancel).await;
        self.teardown().await;

        match &outcome {
            Ok(()) => {
                self.state = ConnectorState::Stopped;
                tracing::info!(chain = %chain, "Connector stopped");
            }
            Err(e) => {
                self.state = ConnectorState::Failed;
                tracing::error!(chain = %chain, error = %e, bug = e.is_bug(), "Connector failed");
            }
        }
        outcome
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> Result<(), ConnectorError> {
        self.state = ConnectorState::Subscribing;
        self.head.subscribe(cancel).await?;
        if cancel.is_cancelled() {
            tracing::info!("Cancelled while subscribing");
            return Ok(());
        }

        self.state = ConnectorState::Initializing;
        let mut cursor = self.init_cursor().await?;
        tracing::info!(chain = %self.config.chain_id, cursor, "Starting from cursor");

        loop {
            if cancel.is_cancelled() {
                tracing::info!(cursor, "Cancellation requested; stopping");
                return Ok(());
            }

            let next = cursor.checked_add(1).ok_or_else(|| {
                ConnectorError::Invariant(format!("cursor {cursor} cannot advance"))
            })?;
            let height = tokio::select! {
                biased;
                _ = cancel.cancelled() => continue,
                h = self.source.latest_height() => h?,
            };

            if next > height {
                if self.state != ConnectorState::Waiting {
                    tracing::debug!(cursor, height, "At head; waiting for the next block");
                }
                self.state = ConnectorState::Waiting;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {}
                    woke = self.head.wait_for_next_block() => woke?,
                }
                continue;
            }

            self.state = ConnectorState::CatchingUp;
            let block = tokio::select! {
                biased;
                _ = cancel.cancelled() => continue,
                b = self.source.block(next) => b?,
            };
            let block = block.ok_or(ConnectorError::MissingBlock { number: next })?;

            let saved = self.store.save(std::slice::from_ref(&block)).await?;
            if saved != next {
                return Err(ConnectorError::Invariant(format!(
                    "store returned cursor {saved} after saving block {next}"
                )));
            }
            cursor = saved;
            tracing::info!(block = cursor, height, "Processed block");
        }
    }

    /// Stored cursor, or the latest block persisted as the first entry.
    async fn init_cursor(&mut self) -> Result<u64, ConnectorError> {
        if let Some(cursor) = self.store.cursor().await? {
            tracing::debug!(cursor, "Resuming from stored cursor");
            return Ok(cursor);
        }

        let block = match self.source.latest_block().await {
            Ok(Some(block)) => block,
            Ok(None) => {
                return Err(ConnectorError::Bootstrap(
                    "Failed to retrieve latest block".into(),
                ))
            }
            Err(e) => {
                return Err(ConnectorError::Bootstrap(format!(
                    "Failed to retrieve latest block: {e}"
                )))
            }
        };
        let number = block.number;
        let cursor = self.store.save(std::slice::from_ref(&block)).await?;
        tracing::info!(block = number, "Bootstrapped cursor from latest block");
        Ok(cursor)
    }

    /// Best-effort unsubscribe. Never fails.
    async fn teardown(&self) {
        let grace = CancellationToken::new();
        let unsubscribe = self.head.unsubscribe(&grace);
        tokio::pin!(unsubscribe);

        let result = tokio::select! {
            r = &mut unsubscribe => r,
            _ = tokio::time::sleep(self.config.unsubscribe_grace) => {
                tracing::warn!(
                    grace = ?self.config.unsubscribe_grace,
                    "Unsubscribe not acknowledged in time; abandoning"
                );
                grace.cancel();
                unsubscribe.await
            }
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Unsubscribe failed during teardown");
        }
    }
}
