// In-memory persistence backend
// Keeps every table in a sorted map; contents are lost when the process exits

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use crate::error::StorageResult;
use crate::model::{StorageMode, Table};
use crate::staged::{Backend, StagedStore, StagedWrite};

/// Sorted maps per table
#[derive(Default)]
pub struct MemoryBackend {
    tables: RwLock<HashMap<Table, BTreeMap<String, Vec<u8>>>>,
}

impl Backend for MemoryBackend {
    fn read(&self, table: Table, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .tables
            .read()
            .get(&table)
            .and_then(|entries| entries.get(key).cloned()))
    }

    fn scan(&self, table: Table, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        let tables = self.tables.read();
        let Some(entries) = tables.get(&table) else {
            return Ok(Vec::new());
        };

        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn apply(&self, batch: Vec<StagedWrite>) -> StorageResult<()> {
        let mut tables = self.tables.write();
        for write in batch {
            match write {
                StagedWrite::Put { table, key, value } => {
                    tables.entry(table).or_default().insert(key, value);
                }
                StagedWrite::Delete { table, key } => {
                    if let Some(entries) = tables.get_mut(&table) {
                        entries.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    fn mode(&self) -> StorageMode {
        StorageMode::Memory
    }
}

/// Process-local transactional store
pub type MemoryStore = StagedStore<MemoryBackend>;

impl MemoryStore {
    pub fn new() -> Self {
        StagedStore::with_backend(MemoryBackend::default())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}
