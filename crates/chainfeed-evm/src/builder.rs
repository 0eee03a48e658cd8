//! Fluent builder for connector configuration.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use chainfeed_evm::ConnectorConfig;
//!
//! let config = ConnectorConfig::builder()
//!     .chain_id("1")
//!     .unsubscribe_grace(Duration::from_secs(2))
//!     .build();
//! assert_eq!(config.chain_id.as_str(), "1");
//! ```

use std::time::Duration;

use chainfeed_core::types::ChainId;

/// Runtime settings for a [`Connector`](crate::Connector).
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Namespace for cursor and log keys; also tags every log line.
    pub chain_id: ChainId,
    /// Upper bound on waiting for the unsubscribe acknowledgment at shutdown.
    pub unsubscribe_grace: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            chain_id: ChainId::from("1"),
            unsubscribe_grace: Duration::from_secs(5),
        }
    }
}

impl ConnectorConfig {
    pub fn builder() -> ConnectorConfigBuilder {
        ConnectorConfigBuilder::default()
    }
}

/// Fluent builder for [`ConnectorConfig`].
#[derive(Default)]
pub struct ConnectorConfigBuilder {
    config: ConnectorConfig,
}

impl ConnectorConfigBuilder {
    /// Set the chain identity.
    pub fn chain_id(mut self, id: impl Into<ChainId>) -> Self {
        self.config.chain_id = id.into();
        self
    }

    /// Set how long shutdown waits for the unsubscribe acknowledgment.
    pub fn unsubscribe_grace(mut self, grace: Duration) -> Self {
        self.config.unsubscribe_grace = grace;
        self
    }

    pub fn build(self) -> ConnectorConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let cfg = ConnectorConfig::builder().build();
        assert_eq!(cfg.chain_id.as_str(), "1");
        assert_eq!(cfg.unsubscribe_grace, Duration::from_secs(5));
    }

    #[test]
    fn builder_custom() {
        let cfg = ConnectorConfig::builder()
            .chain_id("8453")
            .unsubscribe_grace(Duration::from_millis(250))
            .build();
        assert_eq!(cfg.chain_id, ChainId::from("8453"));
        assert_eq!(cfg.unsubscribe_grace, Duration::from_millis(250));
    }
}
