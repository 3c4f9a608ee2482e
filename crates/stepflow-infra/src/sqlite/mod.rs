//! SQLite storage layer.
//!
//! The orchestrator's `Store` backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod pool;
mod rows;
pub mod store;

pub use pool::DatabasePool;
pub use store::SqliteStore;
