//! Staged write transactions shared by every backend
//!
//! Backends only need to support point reads, prefix scans and applying a
//! batch of writes atomically. [`StagedStore`] layers serializable
//! transactions on top:
//!
//! - one writer at a time (`writer` mutex held for the transaction's lifetime)
//! - writes are staged in an overlay and read back by the same transaction
//! - commit applies the overlay as one batch while holding the commit gate
//!   exclusively, so read transactions (which hold the gate shared) never
//!   observe a half-applied commit
//! - commit hooks run after the batch is applied, still under the writer lock

use std::collections::BTreeMap;

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard};
use tracing::trace;

use crate::error::{StorageError, StorageResult};
use crate::model::{StorageMode, Table};
use crate::traits::{CommitHook, KvStore, Transaction};

/// A single staged mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedWrite {
    Put {
        table: Table,
        key: String,
        value: Vec<u8>,
    },
    Delete {
        table: Table,
        key: String,
    },
}

/// Minimal storage surface a backend has to provide
pub trait Backend: Send + Sync {
    fn read(&self, table: Table, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Entries whose key starts with `prefix`, in key order
    fn scan(&self, table: Table, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>>;

    /// Apply every write or none of them
    fn apply(&self, batch: Vec<StagedWrite>) -> StorageResult<()>;

    fn mode(&self) -> StorageMode;
}

/// Serializable transactions over a [`Backend`]
pub struct StagedStore<B> {
    backend: B,
    writer: Mutex<()>,
    gate: RwLock<()>,
}

impl<B: Backend> StagedStore<B> {
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend,
            writer: Mutex::new(()),
            gate: RwLock::new(()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: Backend> KvStore for StagedStore<B> {
    fn begin_read(&self) -> StorageResult<Box<dyn Transaction + '_>> {
        Ok(Box::new(ReadTransaction {
            backend: &self.backend,
            _gate: self.gate.read_recursive(),
        }))
    }

    fn begin_write(&self) -> StorageResult<Box<dyn Transaction + '_>> {
        Ok(Box::new(WriteTransaction {
            backend: &self.backend,
            gate: &self.gate,
            overlay: BTreeMap::new(),
            hooks: Vec::new(),
            _writer: self.writer.lock(),
        }))
    }

    fn storage_mode(&self) -> StorageMode {
        self.backend.mode()
    }
}

struct ReadTransaction<'a, B> {
    backend: &'a B,
    _gate: RwLockReadGuard<'a, ()>,
}

impl<B: Backend> Transaction for ReadTransaction<'_, B> {
    fn is_writable(&self) -> bool {
        false
    }

    fn get(&self, table: Table, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.backend.read(table, key)
    }

    fn scan_prefix(&self, table: Table, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        self.backend.scan(table, prefix)
    }

    fn put(&mut self, table: Table, _key: &str, _value: Vec<u8>) -> StorageResult<()> {
        Err(StorageError::ReadOnly(table))
    }

    fn delete(&mut self, table: Table, _key: &str) -> StorageResult<()> {
        Err(StorageError::ReadOnly(table))
    }

    fn on_commit(&mut self, _hook: CommitHook) -> StorageResult<()> {
        Err(StorageError::ReadOnlyHook)
    }

    fn commit(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}

struct WriteTransaction<'a, B> {
    backend: &'a B,
    gate: &'a RwLock<()>,
    /// `None` marks a staged deletion
    overlay: BTreeMap<(Table, String), Option<Vec<u8>>>,
    hooks: Vec<CommitHook>,
    _writer: MutexGuard<'a, ()>,
}

impl<B: Backend> Transaction for WriteTransaction<'_, B> {
    fn is_writable(&self) -> bool {
        true
    }

    fn get(&self, table: Table, key: &str) -> StorageResult<Option<Vec<u8>>> {
        match self.overlay.get(&(table, key.to_string())) {
            Some(staged) => Ok(staged.clone()),
            None => self.backend.read(table, key),
        }
    }

    fn scan_prefix(&self, table: Table, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        let mut merged: BTreeMap<String, Vec<u8>> =
            self.backend.scan(table, prefix)?.into_iter().collect();

        let start = (table, prefix.to_string());
        for ((staged_table, key), value) in self.overlay.range(start..) {
            if *staged_table != table || !key.starts_with(prefix) {
                break;
            }
            match value {
                Some(bytes) => {
                    merged.insert(key.clone(), bytes.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        Ok(merged.into_iter().collect())
    }

    fn put(&mut self, table: Table, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.overlay.insert((table, key.to_string()), Some(value));
        Ok(())
    }

    fn delete(&mut self, table: Table, key: &str) -> StorageResult<()> {
        self.overlay.insert((table, key.to_string()), None);
        Ok(())
    }

    fn on_commit(&mut self, hook: CommitHook) -> StorageResult<()> {
        self.hooks.push(hook);
        Ok(())
    }

    fn commit(self: Box<Self>) -> StorageResult<()> {
        let WriteTransaction {
            backend,
            gate,
            overlay,
            hooks,
            _writer,
        } = *self;

        if !overlay.is_empty() {
            let batch: Vec<StagedWrite> = overlay
                .into_iter()
                .map(|((table, key), value)| match value {
                    Some(value) => StagedWrite::Put { table, key, value },
                    None => StagedWrite::Delete { table, key },
                })
                .collect();

            trace!(writes = batch.len(), "Committing transaction");
            let _exclusive = gate.write();
            backend.apply(batch)?;
        }

        // Readers may see the new state here; the next writer may not start yet
        for hook in hooks {
            hook();
        }
        Ok(())
    }
}
