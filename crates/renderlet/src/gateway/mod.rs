//! Per-worker HTTP gateway.
//!
//! Stage order, outermost first:
//! before-hook → gzip → basic auth → cache lookup → static assets → render →
//! after-hook. Each stage after the before-hook is gated by configuration.

pub mod auth;
pub mod cache;
pub mod routes;
pub mod server;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use tokio::sync::RwLock;

use crate::cache::Cache;
use crate::config::GatewayConfig;
use crate::renderer::Renderer;

pub use routes::routes;
pub use server::{bind, serve};

/// Hook over the gateway router, used to add routes or layers.
pub type RouterHook = Arc<dyn Fn(Router) -> Router + Send + Sync>;

/// User hooks around the app routes.
///
/// `before` wraps the whole pipeline; `after` sees the router right after the
/// app routes are added, outside the cache stage.
#[derive(Clone, Default)]
pub struct RouterHooks {
    pub before: Option<RouterHook>,
    pub after: Option<RouterHook>,
}

impl RouterHooks {
    pub fn with_before(mut self, hook: impl Fn(Router) -> Router + Send + Sync + 'static) -> Self {
        self.before = Some(Arc::new(hook));
        self
    }

    pub fn with_after(mut self, hook: impl Fn(Router) -> Router + Send + Sync + 'static) -> Self {
        self.after = Some(Arc::new(hook));
        self
    }

    fn apply_before(&self, router: Router) -> Router {
        match &self.before {
            Some(hook) => hook(router),
            None => router,
        }
    }

    fn apply_after(&self, router: Router) -> Router {
        match &self.after {
            Some(hook) => hook(router),
            None => router,
        }
    }
}

impl std::fmt::Debug for RouterHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterHooks")
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .finish()
    }
}

/// A renderer bound to the bundle it was created from.
pub struct BoundApp {
    pub dist_path: PathBuf,
    pub renderer: Arc<dyn Renderer>,
}

impl BoundApp {
    pub fn new(dist_path: impl Into<PathBuf>, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            dist_path: dist_path.into(),
            renderer,
        }
    }
}

/// What the gateway currently answers app routes with.
#[derive(Clone, Default)]
pub enum Binding {
    /// No bundle; every app route gets the no-app page.
    #[default]
    NoApp,
    Serving(Arc<BoundApp>),
}

/// Shared gateway state. Cheap to clone; clones see the same binding.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    config: GatewayConfig,
    cache: Option<Arc<dyn Cache>>,
    hooks: RouterHooks,
    binding: RwLock<Binding>,
    last_error: RwLock<Option<String>>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_parts(config, None, RouterHooks::default())
    }

    pub fn with_parts(
        config: GatewayConfig,
        cache: Option<Arc<dyn Cache>>,
        hooks: RouterHooks,
    ) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                config,
                cache,
                hooks,
                binding: RwLock::new(Binding::NoApp),
                last_error: RwLock::new(None),
            }),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> Option<&Arc<dyn Cache>> {
        self.inner.cache.as_ref()
    }

    pub fn hooks(&self) -> &RouterHooks {
        &self.inner.hooks
    }

    /// Current binding. Requests hold the returned snapshot for their whole
    /// lifetime, so a rebind never affects a request already in flight.
    pub async fn binding(&self) -> Binding {
        self.inner.binding.read().await.clone()
    }

    /// The app currently served, if any.
    pub async fn app(&self) -> Option<Arc<BoundApp>> {
        match &*self.inner.binding.read().await {
            Binding::Serving(app) => Some(Arc::clone(app)),
            Binding::NoApp => None,
        }
    }

    pub async fn bind(&self, app: BoundApp) {
        *self.inner.binding.write().await = Binding::Serving(Arc::new(app));
    }

    pub async fn set_error(&self, error: impl Into<String>) {
        *self.inner.last_error.write().await = Some(error.into());
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.last_error.read().await.clone()
    }

    /// Build the full router for this gateway.
    pub fn router(&self) -> Router {
        routes(self.clone())
    }
}
