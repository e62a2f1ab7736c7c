//! Fetch definitions.
//!
//! A `FetchDefinition` is the declarative description of one
//! synchronizable dataset: the cache key that names it, the local scope it
//! governs, the remote request that refreshes it, and the reset/write pair
//! the coordinator commits atomically on a successful refresh. A
//! definition is immutable once subscribed; a screen wanting different
//! parameters builds a new one.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::SyncError;
use crate::store::{to_entity, Scope, StoreTxn};
use crate::sync::CacheKey;
use crate::transport::{RequestDescriptor, Response};

type ResetFn = Arc<dyn Fn(&mut dyn StoreTxn) -> Result<(), SyncError> + Send + Sync>;
type WriteFn = Arc<dyn Fn(&[Response], &mut dyn StoreTxn) -> Result<(), SyncError> + Send + Sync>;

/// One synchronizable dataset.
/// Clone is cheap - the reset and write callbacks are shared.
#[derive(Clone)]
pub struct FetchDefinition {
    /// `None` means never considered cached: every access refreshes and
    /// the validity registry is never consulted or updated.
    pub cache_key: Option<CacheKey>,
    pub scope: Scope,
    pub request: RequestDescriptor,
    reset: ResetFn,
    write: WriteFn,
}

impl FetchDefinition {
    pub fn new(
        cache_key: Option<CacheKey>,
        scope: Scope,
        request: RequestDescriptor,
        reset: impl Fn(&mut dyn StoreTxn) -> Result<(), SyncError> + Send + Sync + 'static,
        write: impl Fn(&[Response], &mut dyn StoreTxn) -> Result<(), SyncError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            cache_key,
            scope,
            request,
            reset: Arc::new(reset),
            write: Arc::new(write),
        }
    }

    /// The dominant case: the remote endpoint returns a list of `T` per
    /// page. Reset deletes exactly the scope's records; write decodes
    /// every page and inserts the results.
    pub fn list<T>(cache_key: Option<CacheKey>, scope: Scope, request: RequestDescriptor) -> Self
    where
        T: DeserializeOwned + Serialize,
    {
        let reset_scope = scope.clone();
        let write_scope = scope.clone();
        Self::new(
            cache_key,
            scope,
            request,
            move |txn| {
                txn.delete_where(&reset_scope.collection, &|entity| reset_scope.matches(entity));
                Ok(())
            },
            move |pages, txn| {
                for page in pages {
                    let records: Vec<T> = serde_json::from_value(page.body.clone())
                        .map_err(|e| SyncError::Decode(e.to_string()))?;
                    for record in &records {
                        txn.insert(&write_scope.collection, to_entity(record)?)?;
                    }
                }
                Ok(())
            },
        )
    }

    /// Clear the stale subset this definition governs
    pub fn reset(&self, txn: &mut dyn StoreTxn) -> Result<(), SyncError> {
        (self.reset)(txn)
    }

    /// Persist the decoded response pages
    pub fn write(&self, pages: &[Response], txn: &mut dyn StoreTxn) -> Result<(), SyncError> {
        (self.write)(pages, txn)
    }
}

impl fmt::Debug for FetchDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchDefinition")
            .field("cache_key", &self.cache_key)
            .field("scope", &self.scope)
            .field("request", &self.request)
            .finish()
    }
}
