//! chainfeed-core — foundation for the chain-head ingestion connector.
//!
//! # Architecture
//!
//! ```text
//! Connector
//!     ├── HeadChannel   (push subscription, wakeups)
//!     ├── BlockSource   (pull: head height, block by number)
//!     └── CursorStore   (cursor + append-only block log, one atomic write)
//! ```
//!
//! This crate holds the shared vocabulary: block and identity types, the
//! error taxonomy, the state machines, and the two collaborator traits the
//! connector drives.

pub mod error;
pub mod keys;
pub mod source;
pub mod state;
pub mod store;
pub mod types;

pub use error::ConnectorError;
pub use source::BlockSource;
pub use state::{ConnectorState, SubscriptionState};
pub use store::{CursorStore, LogEntry};
pub use types::{Block, ChainId, SubscriptionId};
