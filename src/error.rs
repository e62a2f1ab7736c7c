//! Error taxonomy for the synchronization core.
//!
//! A refresh can fail in three distinct ways: the transport round trip
//! failed, the response did not decode into the expected shape, or the
//! local store rejected the write. All three are cloneable so a single
//! refresh outcome can be delivered to every caller waiting on it.

use thiserror::Error;

/// Failure inside the local entity store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("failed to encode record: {0}")]
    Encode(String),

    #[error("failed to decode stored record: {0}")]
    Decode(String),

    #[error("cache file error: {0}")]
    Io(String),
}

/// Outcome of a failed refresh, as seen by every waiter on the same
/// in-flight ticket.
///
/// The coordinator never retries on its own; a `Transport` error is
/// surfaced as-is and the caller decides whether to invoke `refresh`
/// again. `Decode` and `Store` failures leave the local store untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("response did not match expected shape: {0}")]
    Decode(String),

    #[error("local store failure: {0}")]
    Store(#[from] StoreError),
}
