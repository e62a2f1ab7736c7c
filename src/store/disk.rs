//! JSON-file backed entity store.
//!
//! Same semantics as [`MemStore`], plus persistence: each collection is
//! written to `<dir>/<collection>.json` when a transaction saves, and
//! existing files are loaded on open. Lets screens show cached data
//! immediately on a cold start, before any refresh completes.

use std::path::{Path, PathBuf};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::store::memory::{MemStore, MemTxn};
use crate::store::{Entity, EntityStore, Scope, StoreChange, StoreTxn};

pub struct DiskStore {
    mem: MemStore,
    dir: PathBuf,
}

impl DiskStore {
    /// Open the store, loading any collections already on disk.
    /// Files that fail to parse are skipped with a warning rather than
    /// failing the whole store.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::Io(e.to_string()))?;

        let mem = MemStore::new();
        let entries = std::fs::read_dir(&dir).map_err(|e| StoreError::Io(e.to_string()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(collection) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match load_collection(&path) {
                Ok(records) => {
                    debug!(collection = collection, count = records.len(), "Loaded cached collection");
                    mem.seed(collection, records);
                }
                Err(e) => {
                    warn!(collection = collection, error = %e, "Failed to load cached collection");
                }
            }
        }

        Ok(Self { mem, dir })
    }

    /// Write every collection out to its cache file
    pub fn flush(&self) -> Result<(), StoreError> {
        for collection in self.mem.collection_names() {
            persist_collection(&self.dir, &collection, &self.mem.collection_snapshot(&collection))?;
        }
        Ok(())
    }

    fn collection_path(dir: &Path, collection: &str) -> PathBuf {
        dir.join(format!("{}.json", collection))
    }
}

impl EntityStore for DiskStore {
    fn fetch(&self, scope: &Scope) -> Result<Vec<Entity>, StoreError> {
        self.mem.fetch(scope)
    }

    fn begin(&self) -> Box<dyn StoreTxn> {
        Box::new(DiskTxn {
            txn: self.mem.begin_txn(),
            mem: self.mem.clone(),
            dir: self.dir.clone(),
        })
    }

    fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.mem.changes()
    }
}

struct DiskTxn {
    txn: MemTxn,
    mem: MemStore,
    dir: PathBuf,
}

impl StoreTxn for DiskTxn {
    fn fetch(&self, scope: &Scope) -> Result<Vec<Entity>, StoreError> {
        self.txn.fetch(scope)
    }

    fn insert(&mut self, collection: &str, record: Entity) -> Result<(), StoreError> {
        self.txn.insert(collection, record)
    }

    fn delete_where(&mut self, collection: &str, predicate: &dyn Fn(&Entity) -> bool) -> usize {
        self.txn.delete_where(collection, predicate)
    }

    fn save(self: Box<Self>) -> Result<(), StoreError> {
        let touched = self.txn.touched_collections();
        Box::new(self.txn).save()?;
        for collection in touched {
            persist_collection(&self.dir, &collection, &self.mem.collection_snapshot(&collection))?;
        }
        Ok(())
    }
}

fn load_collection(path: &Path) -> Result<Vec<Entity>, StoreError> {
    let contents = std::fs::read_to_string(path).map_err(|e| StoreError::Io(e.to_string()))?;
    serde_json::from_str(&contents).map_err(|e| StoreError::Decode(e.to_string()))
}

fn persist_collection(dir: &Path, collection: &str, records: &[Entity]) -> Result<(), StoreError> {
    let path = DiskStore::collection_path(dir, collection);
    let contents =
        serde_json::to_string_pretty(records).map_err(|e| StoreError::Encode(e.to_string()))?;
    std::fs::write(&path, contents).map_err(|e| StoreError::Io(e.to_string()))
}
