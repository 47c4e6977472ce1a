//! Response cache contract.
//!
//! Storage lives outside the core. The gateway only looks at presence or
//! absence of a body, and treats every backend failure as a miss (reads) or
//! a logged no-op (writes).

use axum::http::{HeaderMap, Method, StatusCode, Uri};
use bytes::Bytes;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache read failed: {0}")]
    Read(String),
    #[error("cache write failed: {0}")]
    Write(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The parts of an incoming request that collaborators may inspect.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl RequestInfo {
    pub fn from_parts(parts: &axum::http::request::Parts) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
        }
    }

    pub fn get(uri: Uri) -> Self {
        Self {
            method: Method::GET,
            uri,
            headers: HeaderMap::new(),
        }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }
}

/// Status and headers of a response about to be stored.
#[derive(Debug, Clone)]
pub struct ResponseInfo {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Async key-value store for rendered pages, keyed by request path.
///
/// Implementations are shared by every request of a worker (and possibly
/// across worker processes) and must handle concurrent access themselves.
#[async_trait::async_trait]
pub trait Cache: Send + Sync {
    async fn fetch(&self, path: &str, request: &RequestInfo) -> Result<Option<Bytes>, CacheError>;

    async fn put(&self, path: &str, body: Bytes, response: &ResponseInfo)
    -> Result<(), CacheError>;
}
