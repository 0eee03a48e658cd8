//! chainfeed-evm — follows an EVM chain's head and persists every block once.
//!
//! - [`frame`] — tagged decode of inbound push frames, in precedence order
//! - [`head`] — the head subscription protocol and one-shot wakeups
//! - [`fetcher`] — [`BlockSource`](chainfeed_core::BlockSource) over JSON-RPC
//! - [`connector`] — the ingestion loop
//! - [`builder`] — connector configuration

pub mod builder;
pub mod connector;
pub mod fetcher;
pub mod frame;
pub mod head;

pub use builder::{ConnectorConfig, ConnectorConfigBuilder};
pub use connector::Connector;
pub use fetcher::EvmBlockSource;
pub use frame::Frame;
pub use head::HeadChannel;
