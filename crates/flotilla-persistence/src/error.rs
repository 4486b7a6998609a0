//! Storage error types

use flotilla_common::FlotillaError;

use crate::model::Table;

/// Result type alias using [`StorageError`].
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by storage backends
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("column family '{0}' not found")]
    MissingColumnFamily(&'static str),

    #[error("write to table '{0}' attempted in a read-only transaction")]
    ReadOnly(Table),

    #[error("commit hook registered on a read-only transaction")]
    ReadOnlyHook,

    #[error("corrupt sequence value in table '{0}'")]
    CorruptSequence(Table),
}

impl From<StorageError> for FlotillaError {
    fn from(value: StorageError) -> Self {
        FlotillaError::StorageFailure(value.to_string())
    }
}
