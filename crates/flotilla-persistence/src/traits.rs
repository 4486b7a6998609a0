//! Persistence traits for the transactional storage abstraction
//!
//! Every engine operation is written once against `&dyn Transaction` (reads)
//! or `&mut dyn Transaction` (writes). [`StoreExt::view`] and
//! [`StoreExt::update`] open the transaction, run the closure and commit, so
//! callers never deal with transaction handles directly.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{StorageError, StorageResult};
use crate::model::{StorageMode, Table};

/// Callback registered with [`Transaction::on_commit`]
pub type CommitHook = Box<dyn FnOnce() + Send>;

/// An open transaction over every table
///
/// Write transactions are serializable: only one is open at a time and its
/// writes become visible atomically on [`Transaction::commit`]. Dropping a
/// transaction without committing discards its writes.
pub trait Transaction {
    /// Whether this transaction accepts writes
    fn is_writable(&self) -> bool;

    /// Get the raw value stored under `key`
    fn get(&self, table: Table, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// All entries whose key starts with `prefix`, in key order
    fn scan_prefix(&self, table: Table, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>>;

    /// Stage a write of `value` under `key`
    fn put(&mut self, table: Table, key: &str, value: Vec<u8>) -> StorageResult<()>;

    /// Stage a deletion of `key`
    fn delete(&mut self, table: Table, key: &str) -> StorageResult<()>;

    /// Run `hook` once this transaction's writes are visible
    ///
    /// Hooks run in registration order after a successful commit and before
    /// the next write transaction can begin. A discarded transaction drops its
    /// hooks without running them.
    fn on_commit(&mut self, hook: CommitHook) -> StorageResult<()>;

    /// Make every staged write visible atomically
    fn commit(self: Box<Self>) -> StorageResult<()>;
}

/// A transactional key-value store
pub trait KvStore: Send + Sync {
    /// Open a read-only transaction
    fn begin_read(&self) -> StorageResult<Box<dyn Transaction + '_>>;

    /// Open a read-write transaction, waiting for any other writer to finish
    fn begin_write(&self) -> StorageResult<Box<dyn Transaction + '_>>;

    /// Backend kind
    fn storage_mode(&self) -> StorageMode;
}

/// Closure-based transaction helpers
pub trait StoreExt: KvStore {
    /// Run `f` inside a read transaction
    fn view<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&dyn Transaction) -> Result<R, E>,
        E: From<StorageError>,
    {
        let tx = self.begin_read()?;
        f(&*tx)
    }

    /// Run `f` inside a write transaction, committing when it returns `Ok`
    ///
    /// Any error returned by `f` discards every write it staged.
    fn update<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<R, E>,
        E: From<StorageError>,
    {
        let mut tx = self.begin_write()?;
        let out = f(&mut *tx)?;
        tx.commit()?;
        Ok(out)
    }
}

impl<S: KvStore + ?Sized> StoreExt for S {}

const SEQUENCE_PREFIX: &str = "seq:";

/// Typed helpers on top of the raw byte interface
pub trait TransactionExt: Transaction {
    /// Get and deserialize a JSON value
    fn get_json<T: DeserializeOwned>(&self, table: Table, key: &str) -> StorageResult<Option<T>> {
        match self.get(table, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Serialize and stage a JSON value
    fn put_json<T: Serialize>(&mut self, table: Table, key: &str, value: &T) -> StorageResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.put(table, key, bytes)
    }

    /// Deserialize every value under `prefix`
    fn scan_json<T: DeserializeOwned>(&self, table: Table, prefix: &str) -> StorageResult<Vec<T>> {
        self.scan_prefix(table, prefix)?
            .into_iter()
            .map(|(_, bytes)| serde_json::from_slice(&bytes).map_err(StorageError::from))
            .collect()
    }

    /// Whether `key` is present
    fn contains(&self, table: Table, key: &str) -> StorageResult<bool> {
        Ok(self.get(table, key)?.is_some())
    }

    /// Allocate the next identifier for `table`, starting at 1
    fn next_sequence(&mut self, table: Table) -> StorageResult<u32> {
        let key = format!("{}{}", SEQUENCE_PREFIX, table.name());
        let current = match self.get(Table::Meta, &key)? {
            Some(bytes) => {
                let raw: [u8; 4] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StorageError::CorruptSequence(table))?;
                u32::from_be_bytes(raw)
            }
            None => 0,
        };
        let next = current + 1;
        self.put(Table::Meta, &key, next.to_be_bytes().to_vec())?;
        Ok(next)
    }
}

impl<T: Transaction + ?Sized> TransactionExt for T {}
