//! The synchronization core.
//!
//! Screens declare what data they need as a [`FetchDefinition`] and
//! subscribe through the [`SyncCoordinator`]; the coordinator guarantees
//! that locally persisted data is shown immediately, that at most one
//! network refresh per cache key is in flight at any time, that a
//! successful refresh atomically replaces the stale subset of local data,
//! and that any collaborator can invalidate a cache key to force the next
//! access to re-fetch.

pub mod coordinator;
pub mod fetch;
pub mod observe;
pub mod registry;

pub use coordinator::{RefreshOutcome, SyncCoordinator, SyncEvent};
pub use fetch::FetchDefinition;
pub use observe::{LoadState, ObservableResult, Section, Snapshot};
pub use registry::{CacheKey, CacheValidityRegistry};
