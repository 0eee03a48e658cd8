//! Error types for the ingestion pipeline.

use thiserror::Error;

/// Errors that stop the connector.
///
/// Every variant is fatal: the ingestion loop stops, teardown runs, and the
/// error reaches the caller of `Connector::run`. Cancellation is not an error
/// and has no variant here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    /// Unexpected or malformed frame from the push transport.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The durable store rejected an operation. No partial effect is visible.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The initial latest-block fetch failed on an empty store.
    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),

    /// The block source reported a height but could not serve a block within it.
    #[error("Block {number} is within the reported head but could not be fetched")]
    MissingBlock { number: u64 },

    /// Connection-level failure of the push or pull transport.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A persistence invariant was violated (e.g. empty batch, cursor gap).
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// A collaborator was driven outside its contract.
    #[error("Usage error: {0}")]
    Usage(String),
}

impl ConnectorError {
    /// Returns `true` if the error originated in the push transport's frame stream.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// Returns `true` if the error points at a programming mistake rather than
    /// an environmental failure.
    pub fn is_bug(&self) -> bool {
        matches!(self, Self::Invariant(_) | Self::Usage(_))
    }
}
