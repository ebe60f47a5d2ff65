//! # cms-rs-db-backends
//!
//! Database backends implementing the [`DbExecutor`](cms_rs_db::DbExecutor)
//! seam of the query engine.
//!
//! Supported backends:
//! - `SQLite` (feature `sqlite`, enabled by default)

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;
