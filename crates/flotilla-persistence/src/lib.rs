//! Flotilla Persistence - Transactional key-value storage
//!
//! This crate provides:
//! - The `KvStore` / `Transaction` abstraction the engine runs every operation in
//! - Typed JSON helpers and per-table ID sequences (`TransactionExt`)
//! - An in-memory backend for tests and ephemeral deployments
//! - An embedded RocksDB backend with one column family per table

pub mod embedded;
pub mod error;
pub mod memory;
pub mod model;
pub mod staged;
pub mod traits;

// Re-export persistence traits
pub use traits::{CommitHook, KvStore, StoreExt, Transaction, TransactionExt};

// Re-export backends
pub use embedded::EmbeddedStore;
pub use memory::MemoryStore;

pub use error::{StorageError, StorageResult};
pub use model::{StorageMode, Table};
