//! Cache-aside stage.
//!
//! Runs as a route layer on the app routes. A hit answers the request from
//! the cache and the renderer never runs. A miss (or a failed read) records a
//! [`PendingResponse`]; once the inner stages produce a response, the pending
//! state is consumed and a successful render is written back in the
//! background.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tracing::{info, warn};

use crate::cache::{Cache, RequestInfo, ResponseInfo};

use super::routes::is_asset_path;

/// Longest body preview logged when a cache write fails.
const PREVIEW_CHARS: usize = 200;

/// Response extension marking the exact body produced by a successful render.
///
/// Static files and error pages never carry it, so they are never cached.
#[derive(Debug, Clone)]
pub struct RenderedBody(pub Bytes);

/// One-shot interception state for a request that missed the cache.
pub struct PendingResponse {
    cache: Arc<dyn Cache>,
    path: String,
}

impl PendingResponse {
    pub fn new(cache: Arc<dyn Cache>, path: impl Into<String>) -> Self {
        Self {
            cache,
            path: path.into(),
        }
    }

    /// Inspect the completed response. Spawns a cache write when it is a
    /// successful render; the response itself is left untouched.
    pub fn complete(self, response: &Response) {
        if !response.status().is_success() {
            return;
        }
        let Some(RenderedBody(body)) = response.extensions().get::<RenderedBody>().cloned() else {
            return;
        };
        let info = ResponseInfo {
            status: response.status(),
            headers: response.headers().clone(),
        };
        let Self { cache, path } = self;

        tokio::spawn(async move {
            match cache.put(&path, body.clone(), &info).await {
                Ok(()) => info!(%path, "stored in cache"),
                Err(e) => warn!(
                    %path,
                    error = %e,
                    body = %preview(&body),
                    "error storing cache"
                ),
            }
        });
    }
}

/// Body preview for logs: newlines stripped, cut at [`PREVIEW_CHARS`].
pub fn preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body).replace('\n', "");
    let truncated: String = text.chars().take(PREVIEW_CHARS).collect();
    format!("{truncated}...")
}

fn cached_response(body: Bytes) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        body,
    )
        .into_response()
}

pub async fn cache_stage(
    State(cache): State<Arc<dyn Cache>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if request.method() != Method::GET || is_asset_path(&path) {
        return next.run(request).await;
    }

    let info = RequestInfo {
        method: request.method().clone(),
        uri: request.uri().clone(),
        headers: request.headers().clone(),
    };

    match cache.fetch(&path, &info).await {
        Ok(Some(body)) => {
            info!(%path, "cache hit");
            return cached_response(body);
        }
        Ok(None) => info!(%path, "cache miss"),
        Err(e) => warn!(%path, error = %e, "cache read failed, rendering"),
    }

    let pending = PendingResponse::new(cache, path);
    let response = next.run(request).await;
    pending.complete(&response);
    response
}
