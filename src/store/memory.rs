//! In-memory entity store.
//!
//! Records live in named collections as JSON values. All mutation goes
//! through a staged transaction: work is invisible to readers until
//! `save`, which replaces the touched collections in one step and emits a
//! change notification per collection. A transaction that is dropped
//! without saving leaves the store exactly as it was.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::debug;

use crate::error::StoreError;
use crate::store::{Entity, EntityStore, Scope, StoreChange, StoreTxn};

/// Buffer size for the store change channel.
/// 32 covers a full multi-dataset refresh with headroom.
const CHANGE_CHANNEL_BUFFER: usize = 32;

struct StoreInner {
    collections: RwLock<HashMap<String, Vec<Entity>>>,
    changes: broadcast::Sender<StoreChange>,
}

/// In-memory entity store.
/// Clone is cheap - collections are shared behind an `Arc`.
#[derive(Clone)]
pub struct MemStore {
    inner: Arc<StoreInner>,
}

impl MemStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_BUFFER);
        Self {
            inner: Arc::new(StoreInner {
                collections: RwLock::new(HashMap::new()),
                changes,
            }),
        }
    }

    /// Replace a collection wholesale without a transaction or a change
    /// notification. Used when seeding from disk before subscribers exist.
    pub(crate) fn seed(&self, collection: impl Into<String>, records: Vec<Entity>) {
        let mut collections = write_lock(&self.inner.collections);
        collections.insert(collection.into(), records);
    }

    /// Full contents of one collection, in insertion order
    pub(crate) fn collection_snapshot(&self, collection: &str) -> Vec<Entity> {
        let collections = read_lock(&self.inner.collections);
        collections.get(collection).cloned().unwrap_or_default()
    }

    /// Names of all non-empty collections
    pub(crate) fn collection_names(&self) -> Vec<String> {
        let collections = read_lock(&self.inner.collections);
        collections.keys().cloned().collect()
    }

    pub(crate) fn begin_txn(&self) -> MemTxn {
        MemTxn {
            store: self.clone(),
            staged: HashMap::new(),
            touched: HashSet::new(),
        }
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore for MemStore {
    fn fetch(&self, scope: &Scope) -> Result<Vec<Entity>, StoreError> {
        let collections = read_lock(&self.inner.collections);
        let mut records: Vec<Entity> = collections
            .get(&scope.collection)
            .map(|records| records.iter().filter(|r| scope.matches(r)).cloned().collect())
            .unwrap_or_default();
        drop(collections);
        scope.sort(&mut records);
        Ok(records)
    }

    fn begin(&self) -> Box<dyn StoreTxn> {
        Box::new(self.begin_txn())
    }

    fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.changes.subscribe()
    }
}

/// A staged transaction against a `MemStore`.
///
/// The first mutation of a collection copies its current records into the
/// transaction; reads within the transaction see the staged copy. `save`
/// swaps every touched collection back into the store atomically.
pub struct MemTxn {
    store: MemStore,
    staged: HashMap<String, Vec<Entity>>,
    touched: HashSet<String>,
}

impl MemTxn {
    fn staged_mut(&mut self, collection: &str) -> &mut Vec<Entity> {
        self.touched.insert(collection.to_string());
        match self.staged.entry(collection.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(self.store.collection_snapshot(collection)),
        }
    }

    pub(crate) fn touched_collections(&self) -> Vec<String> {
        self.touched.iter().cloned().collect()
    }
}

impl StoreTxn for MemTxn {
    fn fetch(&self, scope: &Scope) -> Result<Vec<Entity>, StoreError> {
        let mut records: Vec<Entity> = match self.staged.get(&scope.collection) {
            Some(staged) => staged.iter().filter(|r| scope.matches(r)).cloned().collect(),
            None => return self.store.fetch(scope),
        };
        scope.sort(&mut records);
        Ok(records)
    }

    fn insert(&mut self, collection: &str, record: Entity) -> Result<(), StoreError> {
        self.staged_mut(collection).push(record);
        Ok(())
    }

    fn delete_where(&mut self, collection: &str, predicate: &dyn Fn(&Entity) -> bool) -> usize {
        let records = self.staged_mut(collection);
        let before = records.len();
        records.retain(|r| !predicate(r));
        before - records.len()
    }

    fn save(self: Box<Self>) -> Result<(), StoreError> {
        if self.touched.is_empty() {
            return Ok(());
        }

        let mut collections = write_lock(&self.store.inner.collections);
        for (name, records) in self.staged {
            collections.insert(name, records);
        }
        drop(collections);

        for collection in &self.touched {
            let change = StoreChange {
                collection: collection.clone(),
            };
            if self.store.inner.changes.send(change).is_err() {
                debug!(collection = %collection, "no subscribers for store change");
            }
        }
        Ok(())
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
