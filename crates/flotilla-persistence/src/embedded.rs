// Embedded persistence backend using RocksDB
// Provides standalone (single-node) storage without an external database

use std::path::Path;

use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use tracing::info;

use crate::error::{StorageError, StorageResult};
use crate::model::{StorageMode, Table};
use crate::staged::{Backend, StagedStore, StagedWrite};

/// RocksDB with one column family per [`Table`]
pub struct RocksBackend {
    db: DB,
}

impl RocksBackend {
    /// Open (or create) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        // Enable compression for storage efficiency
        db_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let mut cf_opts = Options::default();
        cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let cfs = Table::ALL
            .iter()
            .map(|table| ColumnFamilyDescriptor::new(table.name(), cf_opts.clone()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cfs)?;
        info!(path = %path.as_ref().display(), "RocksDB store opened");
        Ok(Self { db })
    }

    /// Get a column family handle
    fn cf(&self, table: Table) -> StorageResult<&ColumnFamily> {
        self.db
            .cf_handle(table.name())
            .ok_or(StorageError::MissingColumnFamily(table.name()))
    }
}

impl Backend for RocksBackend {
    fn read(&self, table: Table, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let cf = self.cf(table)?;
        Ok(self.db.get_cf(cf, key.as_bytes())?)
    }

    fn scan(&self, table: Table, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        let cf = self.cf(table)?;
        let iter = self.db.iterator_cf(
            cf,
            IteratorMode::From(prefix.as_bytes(), Direction::Forward),
        );

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item?;
            let key_str = String::from_utf8_lossy(&key);
            if !key_str.starts_with(prefix) {
                break;
            }
            entries.push((key_str.into_owned(), value.into_vec()));
        }
        Ok(entries)
    }

    fn apply(&self, batch: Vec<StagedWrite>) -> StorageResult<()> {
        let mut write_batch = WriteBatch::default();
        for write in batch {
            match write {
                StagedWrite::Put { table, key, value } => {
                    write_batch.put_cf(self.cf(table)?, key.as_bytes(), value);
                }
                StagedWrite::Delete { table, key } => {
                    write_batch.delete_cf(self.cf(table)?, key.as_bytes());
                }
            }
        }
        self.db.write(write_batch)?;
        Ok(())
    }

    fn mode(&self) -> StorageMode {
        StorageMode::Embedded
    }
}

/// Durable transactional store backed by RocksDB
pub type EmbeddedStore = StagedStore<RocksBackend>;

impl EmbeddedStore {
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        Ok(StagedStore::with_backend(RocksBackend::open(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{KvStore, StoreExt, TransactionExt};

    #[test]
    fn test_embedded_round_trip_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = EmbeddedStore::open(dir.path()).unwrap();
            assert_eq!(store.storage_mode(), StorageMode::Embedded);
            store
                .update(|tx| {
                    tx.put_json(Table::EdgeStacks, "0000000001", &"web")?;
                    tx.next_sequence(Table::EdgeStacks).map(|_| ())
                })
                .unwrap();
        }

        let store = EmbeddedStore::open(dir.path()).unwrap();
        let name: Option<String> = store
            .view(|tx| tx.get_json(Table::EdgeStacks, "0000000001"))
            .unwrap();
        assert_eq!(name.as_deref(), Some("web"));

        let next = store
            .update(|tx| tx.next_sequence(Table::EdgeStacks))
            .unwrap();
        assert_eq!(next, 2);
    }

    #[test]
    fn test_embedded_prefix_scan_stops_at_prefix_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let store = EmbeddedStore::open(dir.path()).unwrap();

        store
            .update(|tx| {
                tx.put(Table::EdgeStackStatus, "0000000001:0000000001", b"a".to_vec())?;
                tx.put(Table::EdgeStackStatus, "0000000001:0000000002", b"b".to_vec())?;
                tx.put(Table::EdgeStackStatus, "0000000002:0000000001", b"c".to_vec())
            })
            .unwrap();

        let entries = store
            .view(|tx| tx.scan_prefix(Table::EdgeStackStatus, "0000000001:"))
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].1, b"b".to_vec());
    }
}
