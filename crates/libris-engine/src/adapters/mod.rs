//! # Port Adapters
//!
//! - [`SqliteStore`](sqlite::SqliteStore) - production, backed by libris-db
//! - [`MemoryStore`](memory::MemoryStore) - in-process, for tests and embedding

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
