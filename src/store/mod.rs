//! Local entity store boundary.
//!
//! The synchronization core treats persistence as an opaque collaborator:
//! typed records live in named collections, reads are scoped by predicate
//! and ordering, and all writes go through a staged transaction whose
//! `save` is the durability boundary. Two implementations are provided -
//! [`MemStore`] for in-process use and tests, and [`DiskStore`] which adds
//! JSON-file persistence per collection.

pub mod disk;
pub mod memory;
pub mod scope;

use tokio::sync::broadcast;

use crate::error::StoreError;

pub use disk::DiskStore;
pub use memory::MemStore;
pub use scope::Scope;

/// A stored record. The core is agnostic to what is being synchronized;
/// typed access deserializes at the subscription boundary.
pub type Entity = serde_json::Value;

/// Emitted once per touched collection when a transaction saves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub collection: String,
}

/// The persistence boundary consumed by the coordinator.
///
/// Implementations serialize access internally; work staged in a
/// transaction is invisible to `fetch` until the transaction saves.
pub trait EntityStore: Send + Sync {
    /// Read the records a scope governs, filtered and in display order
    fn fetch(&self, scope: &Scope) -> Result<Vec<Entity>, StoreError>;

    /// Open a staged transaction
    fn begin(&self) -> Box<dyn StoreTxn>;

    /// Subscribe to per-collection change notifications
    fn changes(&self) -> broadcast::Receiver<StoreChange>;
}

/// A staged transaction. Dropping it without `save` discards every
/// mutation, which is what makes reset+write atomic: a failure anywhere
/// in the pair leaves the store exactly as it was.
pub trait StoreTxn: Send {
    /// Read through the transaction, seeing staged mutations
    fn fetch(&self, scope: &Scope) -> Result<Vec<Entity>, StoreError>;

    /// Stage a record insert
    fn insert(&mut self, collection: &str, record: Entity) -> Result<(), StoreError>;

    /// Stage deletion of matching records, returning how many matched
    fn delete_where(&mut self, collection: &str, predicate: &dyn Fn(&Entity) -> bool) -> usize;

    /// Commit every staged mutation atomically and notify subscribers
    fn save(self: Box<Self>) -> Result<(), StoreError>;
}

/// Encode a typed record for insertion
pub fn to_entity<T: serde::Serialize>(record: &T) -> Result<Entity, StoreError> {
    serde_json::to_value(record).map_err(|e| StoreError::Encode(e.to_string()))
}
