//! Pull-based access to the chain.

use async_trait::async_trait;

use crate::error::ConnectorError;
use crate::types::Block;

/// Read access to a chain's RPC surface.
///
/// Transport failures surface as [`ConnectorError::Transport`].
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Current head height.
    async fn latest_height(&self) -> Result<u64, ConnectorError>;

    /// Block by number, or `None` if the source cannot serve it.
    async fn block(&self, number: u64) -> Result<Option<Block>, ConnectorError>;

    /// The current head block, used to bootstrap an empty store.
    async fn latest_block(&self) -> Result<Option<Block>, ConnectorError>;
}
