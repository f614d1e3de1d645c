//! chainhook-storage: storage backends for ChainHook.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryStorage;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
