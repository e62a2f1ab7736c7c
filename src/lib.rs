//! CourseCache - the local-cache synchronization core of an education
//! platform client.
//!
//! Screens declare what data they need as a [`FetchDefinition`] - a cache
//! key, a local read scope, and a remote request - and subscribe through
//! the [`SyncCoordinator`]. The coordinator shows locally persisted data
//! immediately, single-flights network refreshes per cache key, commits
//! each successful refresh as one atomic reset+write transaction against
//! the entity store, and tracks which keys may be trusted in the
//! [`CacheValidityRegistry`]. [`PagedList`] pages and searches the
//! resulting collections for display.
//!
//! The persistent store and the network transport are injected behind the
//! [`EntityStore`] and [`Transport`] traits; [`MemStore`], [`DiskStore`],
//! and [`HttpTransport`] are the bundled implementations.

pub mod config;
pub mod error;
pub mod paging;
pub mod store;
pub mod sync;
pub mod transport;
pub mod utils;

pub use config::Config;
pub use error::{StoreError, SyncError};
pub use paging::PagedList;
pub use store::{DiskStore, Entity, EntityStore, MemStore, Scope, StoreChange, StoreTxn};
pub use sync::{
    CacheKey, CacheValidityRegistry, FetchDefinition, LoadState, ObservableResult, RefreshOutcome,
    Section, Snapshot, SyncCoordinator, SyncEvent,
};
pub use transport::{HttpTransport, RequestDescriptor, Response, Transport, TransportError};
