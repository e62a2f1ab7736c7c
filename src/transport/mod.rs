//! Network transport boundary.
//!
//! The coordinator describes what it needs as a [`RequestDescriptor`] and
//! consumes an opaque asynchronous `execute` call; it never interprets
//! HTTP status codes itself beyond treating an `Err` as a refresh failure.
//! [`HttpTransport`] is the bundled REST implementation; tests substitute
//! their own `Transport`.

pub mod error;
pub mod http;

use async_trait::async_trait;
use serde_json::Value;

pub use error::TransportError;
pub use http::HttpTransport;

/// A declarative description of one remote request.
///
/// `path` may be relative to the transport's base URL or a full URL (as
/// handed back in pagination links).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl RequestDescriptor {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// One page of a remote response.
///
/// `next` carries the continuation request when the collection spans
/// multiple pages; the coordinator drains the chain and hands the fetch
/// definition the full page set as a single unit.
#[derive(Debug, Clone)]
pub struct Response {
    pub body: Value,
    pub next: Option<RequestDescriptor>,
}

impl Response {
    pub fn single(body: Value) -> Self {
        Self { body, next: None }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &RequestDescriptor) -> Result<Response, TransportError>;
}
