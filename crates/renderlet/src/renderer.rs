//! Rendering engine contract.
//!
//! A [`RendererFactory`] binds a renderer to a resolved bundle directory. The
//! gateway calls [`Renderer::render`] for every request that falls through the
//! cache and static stages; workers call [`Renderer::reload`] when the
//! supervisor broadcasts a reload for the same bundle.

use std::path::Path;
use std::sync::Arc;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::cache::RequestInfo;

/// Options passed through to the factory unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RendererOptions {
    /// Render errors degrade to the app shell instead of failing the request.
    pub resilient: bool,
}

/// Markup produced by a successful render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub status: StatusCode,
    pub body: String,
}

impl RenderedPage {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            body: body.into(),
        }
    }

    pub fn with_status(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// A failed render. Carries the status and body sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("render failed ({status}): {message}")]
pub struct RenderError {
    pub status: StatusCode,
    pub message: String,
}

impl RenderError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for RenderError {
    fn into_response(self) -> Response {
        (
            self.status,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            self.message,
        )
            .into_response()
    }
}

#[async_trait::async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, request: &RequestInfo) -> Result<RenderedPage, RenderError>;

    /// Re-read the bound bundle in place.
    async fn reload(&self) -> anyhow::Result<()>;
}

#[async_trait::async_trait]
pub trait RendererFactory: Send + Sync {
    async fn create(
        &self,
        dist_path: &Path,
        options: &RendererOptions,
    ) -> anyhow::Result<Arc<dyn Renderer>>;
}
