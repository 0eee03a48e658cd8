//! chainfeed-storage — cursor store backends for ChainFeed.
//!
//! Backends:
//! - [`memory`] — in-memory (dev/testing, fault injection, no persistence)
//! - `sqlite` — SQLite via `sqlx` (embedded, single-file persistence)
//! - `postgres` — PostgreSQL via `sqlx`
//!
//! Every backend implements [`chainfeed_core::CursorStore`] with the same
//! contract: the cursor update and the log append commit as one unit.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{FaultPoint, InMemoryCursorStore};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCursorStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresCursorStore;
