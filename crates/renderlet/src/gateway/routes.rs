//! App routes and pipeline assembly.

use std::path::Path;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::{StatusCode, header, request::Parts},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use tower::ServiceExt;
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::cache::RequestInfo;

use super::auth::basic_auth;
use super::cache::{RenderedBody, cache_stage};
use super::{Binding, BoundApp, Gateway};

const ASSETS_PREFIX: &str = "/assets";

pub(crate) fn is_asset_path(path: &str) -> bool {
    path == ASSETS_PREFIX
        || path
            .strip_prefix(ASSETS_PREFIX)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Assemble the gateway pipeline.
pub fn routes(gateway: Gateway) -> Router {
    let mut app = Router::new()
        .route("/", get(serve_app))
        .route("/{*path}", get(serve_app));

    if let Some(cache) = gateway.cache() {
        app = app.route_layer(middleware::from_fn_with_state(
            Arc::clone(cache),
            cache_stage,
        ));
    }

    let hooks = gateway.hooks().clone();
    let credentials = gateway.config().credentials.clone();
    let gzip = gateway.config().gzip;

    let mut router = hooks.apply_after(app.with_state(gateway));

    if let Some(credentials) = credentials {
        tracing::info!(
            username = credentials.username.as_deref().unwrap_or_default(),
            "Adding basic auth"
        );
        router = router.layer(middleware::from_fn_with_state(
            Arc::new(credentials),
            basic_auth,
        ));
    }

    if gzip {
        router = router.layer(CompressionLayer::new());
    }

    hooks
        .apply_before(router)
        .layer(TraceLayer::new_for_http())
}

async fn serve_app(State(gateway): State<Gateway>, request: Request) -> Response {
    let app = match gateway.binding().await {
        Binding::Serving(app) => app,
        Binding::NoApp => return no_app_page(gateway.last_error().await.as_deref()),
    };

    let (parts, _body) = request.into_parts();
    let path = parts.uri.path();

    if path != "/" {
        if let Some(response) = serve_static(&app.dist_path, &parts).await {
            return response;
        }
        if is_asset_path(path) {
            return StatusCode::NOT_FOUND.into_response();
        }
    }

    render(&app, &RequestInfo::from_parts(&parts)).await
}

/// Serve a file from the bundle directory. `None` when nothing matches.
async fn serve_static(dist_path: &Path, parts: &Parts) -> Option<Response> {
    let mut request = Request::new(Body::empty());
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = parts.uri.clone();
    *request.headers_mut() = parts.headers.clone();

    let service = ServeDir::new(dist_path).append_index_html_on_directories(false);
    let response = match service.oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };

    if response.status() == StatusCode::NOT_FOUND {
        return None;
    }
    Some(response.map(Body::new))
}

async fn render(app: &BoundApp, request: &RequestInfo) -> Response {
    match app.renderer.render(request).await {
        Ok(page) => {
            let body = Bytes::from(page.body);
            let mut response = (
                page.status,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                body.clone(),
            )
                .into_response();
            if page.status.is_success() {
                response.extensions_mut().insert(RenderedBody(body));
            }
            response
        }
        Err(e) => {
            tracing::warn!(path = request.path(), status = %e.status, "Render failed");
            e.into_response()
        }
    }
}

/// Fixed page served while no bundle is bound.
pub fn no_app_page(error: Option<&str>) -> Response {
    let mut html = String::from("<h1>No Application Found</h1>");
    if let Some(error) = error {
        html.push_str("<pre style=\"color: red\">");
        html.push_str(&escape_html(error));
        html.push_str("</pre>");
    }
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
        .into_response()
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use crate::cache::Cache;
    use crate::cache::tests::MemoryCache;
    use crate::config::{Credentials, GatewayConfig};
    use crate::gateway::RouterHooks;
    use crate::renderer::tests::StaticFactory;
    use crate::renderer::{RenderError, RendererFactory, RendererOptions};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use http_body_util::BodyExt;
    use std::sync::atomic::Ordering;

    async fn response_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    async fn serving(
        config: GatewayConfig,
        cache: Option<Arc<dyn Cache>>,
        hooks: RouterHooks,
        factory: &StaticFactory,
        dist: &Path,
    ) -> Gateway {
        let gateway = Gateway::with_parts(config, cache, hooks);
        let renderer = factory
            .create(dist, &RendererOptions::default())
            .await
            .unwrap();
        gateway.bind(BoundApp::new(dist, renderer)).await;
        gateway
    }

    fn bundle() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("assets")).unwrap();
        std::fs::write(dir.path().join("assets/app.js"), "console.log(1)").unwrap();
        std::fs::write(dir.path().join("robots.txt"), "User-agent: *").unwrap();
        std::fs::write(dir.path().join("index.html"), "<html>shell</html>").unwrap();
        dir
    }

    #[test]
    fn asset_paths() {
        assert!(is_asset_path("/assets"));
        assert!(is_asset_path("/assets/app.js"));
        assert!(!is_asset_path("/assetsfoo"));
        assert!(!is_asset_path("/widgets/assets/x"));
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html("<b>\"x\" & 'y'</b>"),
            "&lt;b&gt;&quot;x&quot; &amp; &#39;y&#39;&lt;/b&gt;"
        );
    }

    #[tokio::test]
    async fn no_app_page_without_error() {
        let gateway = Gateway::new(GatewayConfig::default());
        let response = routes(gateway).oneshot(get_request("/anything")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response_text(response).await,
            "<h1>No Application Found</h1>"
        );
    }

    #[tokio::test]
    async fn no_app_page_shows_escaped_error() {
        let gateway = Gateway::new(GatewayConfig::default());
        gateway.set_error("AppNotFoundError: <none>").await;

        let response = routes(gateway).oneshot(get_request("/")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response_text(response).await,
            "<h1>No Application Found</h1><pre style=\"color: red\">AppNotFoundError: &lt;none&gt;</pre>"
        );
    }

    #[tokio::test]
    async fn root_always_renders() {
        let dist = bundle();
        let factory = StaticFactory::new("<p>rendered</p>");
        let gateway = serving(
            GatewayConfig::default(),
            None,
            RouterHooks::default(),
            &factory,
            dist.path(),
        )
        .await;

        let response = routes(gateway).oneshot(get_request("/")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_text(response).await, "<p>rendered</p>");
        assert_eq!(factory.render_count(), 1);
    }

    #[tokio::test]
    async fn static_files_bypass_renderer() {
        let dist = bundle();
        let factory = StaticFactory::new("<p>rendered</p>");
        let gateway = serving(
            GatewayConfig::default(),
            None,
            RouterHooks::default(),
            &factory,
            dist.path(),
        )
        .await;
        let router = routes(gateway);

        let response = router.clone().oneshot(get_request("/robots.txt")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_text(response).await, "User-agent: *");

        let response = router.oneshot(get_request("/assets/app.js")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_text(response).await, "console.log(1)");

        assert_eq!(factory.render_count(), 0);
    }

    #[tokio::test]
    async fn missing_asset_is_404_without_render() {
        let dist = bundle();
        let factory = StaticFactory::new("<p>rendered</p>");
        let gateway = serving(
            GatewayConfig::default(),
            None,
            RouterHooks::default(),
            &factory,
            dist.path(),
        )
        .await;

        let response = routes(gateway)
            .oneshot(get_request("/assets/missing.js"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(factory.render_count(), 0);
    }

    #[tokio::test]
    async fn unknown_path_falls_back_to_render() {
        let dist = bundle();
        let factory = StaticFactory::new("<p>widgets</p>");
        let gateway = serving(
            GatewayConfig::default(),
            None,
            RouterHooks::default(),
            &factory,
            dist.path(),
        )
        .await;

        let response = routes(gateway).oneshot(get_request("/widgets/7")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/html; charset=utf-8"
        );
        assert_eq!(response_text(response).await, "<p>widgets</p>");
    }

    #[tokio::test]
    async fn render_error_carries_status_and_body() {
        let dist = bundle();
        let factory = StaticFactory::new("unused")
            .failing(RenderError::not_found("<h1>No route</h1>"));
        let gateway = serving(
            GatewayConfig::default(),
            None,
            RouterHooks::default(),
            &factory,
            dist.path(),
        )
        .await;

        let response = routes(gateway).oneshot(get_request("/nope")).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response_text(response).await, "<h1>No route</h1>");
    }

    #[tokio::test]
    async fn cache_hit_skips_renderer() {
        let dist = bundle();
        let factory = StaticFactory::new("fresh");
        let cache = Arc::new(MemoryCache::new().with_entry("/widgets", "cached"));
        let gateway = serving(
            GatewayConfig::default(),
            Some(cache.clone()),
            RouterHooks::default(),
            &factory,
            dist.path(),
        )
        .await;

        let response = routes(gateway).oneshot(get_request("/widgets")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/html; charset=utf-8"
        );
        assert_eq!(response_text(response).await, "cached");
        assert_eq!(factory.render_count(), 0);
        assert!(cache.puts().is_empty());
    }

    #[tokio::test]
    async fn cache_miss_renders_once_and_stores_sent_body() {
        let dist = bundle();
        let factory = StaticFactory::new("B");
        let cache = Arc::new(MemoryCache::new());
        let gateway = serving(
            GatewayConfig::default(),
            Some(cache.clone()),
            RouterHooks::default(),
            &factory,
            dist.path(),
        )
        .await;
        let router = routes(gateway);

        let response = router.clone().oneshot(get_request("/widgets")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_text(response).await, "B");
        cache.wait_for_puts(1).await;
        assert_eq!(
            cache.puts(),
            vec![("/widgets".to_string(), Bytes::from_static(b"B"))]
        );

        let response = router.oneshot(get_request("/widgets")).await.unwrap();
        assert_eq!(response_text(response).await, "B");
        assert_eq!(factory.render_count(), 1);
        assert_eq!(cache.puts().len(), 1);
    }

    #[tokio::test]
    async fn failing_cache_read_falls_through_to_render() {
        let dist = bundle();
        let factory = StaticFactory::new("B");
        let cache = Arc::new(MemoryCache::new().failing_reads());
        let gateway = serving(
            GatewayConfig::default(),
            Some(cache.clone()),
            RouterHooks::default(),
            &factory,
            dist.path(),
        )
        .await;

        let response = routes(gateway).oneshot(get_request("/widgets")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_text(response).await, "B");
        assert_eq!(factory.render_count(), 1);
    }

    #[tokio::test]
    async fn failing_cache_write_leaves_response_intact() {
        let dist = bundle();
        let factory = StaticFactory::new("B");
        let cache = Arc::new(MemoryCache::new().failing_writes());
        let gateway = serving(
            GatewayConfig::default(),
            Some(cache.clone()),
            RouterHooks::default(),
            &factory,
            dist.path(),
        )
        .await;

        let response = routes(gateway).oneshot(get_request("/widgets")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_text(response).await, "B");
        cache.wait_for_puts(1).await;
        assert_eq!(cache.puts().len(), 1);
    }

    #[tokio::test]
    async fn cache_skips_assets_and_static_files() {
        let dist = bundle();
        let factory = StaticFactory::new("B");
        let cache = Arc::new(MemoryCache::new());
        let gateway = serving(
            GatewayConfig::default(),
            Some(cache.clone()),
            RouterHooks::default(),
            &factory,
            dist.path(),
        )
        .await;
        let router = routes(gateway);

        router.clone().oneshot(get_request("/assets/app.js")).await.unwrap();
        assert_eq!(cache.fetches.load(Ordering::SeqCst), 0);

        let response = router.oneshot(get_request("/robots.txt")).await.unwrap();
        assert_eq!(response_text(response).await, "User-agent: *");
        tokio::task::yield_now().await;
        assert!(cache.puts().is_empty());
    }

    #[tokio::test]
    async fn auth_challenges_missing_or_wrong_credentials() {
        let dist = bundle();
        let factory = StaticFactory::new("B");
        let config = GatewayConfig {
            credentials: Some(Credentials::new("tomster", "zoey")),
            ..Default::default()
        };
        let gateway = serving(config, None, RouterHooks::default(), &factory, dist.path()).await;
        let router = routes(gateway);

        let response = router.clone().oneshot(get_request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()[header::WWW_AUTHENTICATE],
            "Basic realm=Authorization Required"
        );
        assert_eq!(response_text(response).await, "Unauthorized");

        let wrong = format!("Basic {}", STANDARD.encode("tomster:nope"));
        let response = router
            .clone()
            .oneshot(
                Request::get("/")
                    .header(header::AUTHORIZATION, wrong)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let right = format!("Basic {}", STANDARD.encode("tomster:zoey"));
        let response = router
            .oneshot(
                Request::get("/")
                    .header(header::AUTHORIZATION, right)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_text(response).await, "B");
        assert_eq!(factory.render_count(), 1);
    }

    #[tokio::test]
    async fn auth_runs_before_cache() {
        let dist = bundle();
        let factory = StaticFactory::new("B");
        let cache = Arc::new(MemoryCache::new().with_entry("/widgets", "cached"));
        let config = GatewayConfig {
            credentials: Some(Credentials::new("tomster", "zoey")),
            ..Default::default()
        };
        let gateway = serving(
            config,
            Some(cache.clone()),
            RouterHooks::default(),
            &factory,
            dist.path(),
        )
        .await;

        let response = routes(gateway).oneshot(get_request("/widgets")).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(cache.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn gzip_compresses_when_enabled() {
        let dist = bundle();
        let factory = StaticFactory::new(&"<p>widget</p>".repeat(200));
        let config = GatewayConfig {
            gzip: true,
            ..Default::default()
        };
        let gateway = serving(config, None, RouterHooks::default(), &factory, dist.path()).await;

        let response = routes(gateway)
            .oneshot(
                Request::get("/widgets")
                    .header(header::ACCEPT_ENCODING, "gzip")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");
    }

    #[tokio::test]
    async fn gzip_disabled_by_default() {
        let dist = bundle();
        let factory = StaticFactory::new(&"<p>widget</p>".repeat(200));
        let gateway = serving(
            GatewayConfig::default(),
            None,
            RouterHooks::default(),
            &factory,
            dist.path(),
        )
        .await;

        let response = routes(gateway)
            .oneshot(
                Request::get("/widgets")
                    .header(header::ACCEPT_ENCODING, "gzip")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
    }

    #[tokio::test]
    async fn before_hook_routes_bypass_auth() {
        let dist = bundle();
        let factory = StaticFactory::new("B");
        let config = GatewayConfig {
            credentials: Some(Credentials::new("tomster", "zoey")),
            ..Default::default()
        };
        let hooks = RouterHooks::default()
            .with_before(|router| router.route("/health", get(|| async { "ok" })));
        let gateway = serving(config, None, hooks, &factory, dist.path()).await;

        let response = routes(gateway).oneshot(get_request("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_text(response).await, "ok");
        assert_eq!(factory.render_count(), 0);
    }

    #[tokio::test]
    async fn after_hook_routes_skip_cache() {
        let dist = bundle();
        let factory = StaticFactory::new("B");
        let cache = Arc::new(MemoryCache::new());
        let hooks = RouterHooks::default()
            .with_after(|router| router.route("/status", get(|| async { "up" })));
        let gateway = serving(
            GatewayConfig::default(),
            Some(cache.clone()),
            hooks,
            &factory,
            dist.path(),
        )
        .await;

        let response = routes(gateway).oneshot(get_request("/status")).await.unwrap();

        assert_eq!(response_text(response).await, "up");
        assert_eq!(cache.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(factory.render_count(), 0);
    }

    #[tokio::test]
    async fn rebind_swaps_renderer_for_new_requests() {
        let dist = bundle();
        let first = StaticFactory::new("v1");
        let second = StaticFactory::new("v2");
        let gateway = serving(
            GatewayConfig::default(),
            None,
            RouterHooks::default(),
            &first,
            dist.path(),
        )
        .await;
        let router = routes(gateway.clone());

        let response = router.clone().oneshot(get_request("/")).await.unwrap();
        assert_eq!(response_text(response).await, "v1");

        let renderer = second
            .create(dist.path(), &RendererOptions::default())
            .await
            .unwrap();
        gateway.bind(BoundApp::new(dist.path(), renderer)).await;

        let response = router.oneshot(get_request("/")).await.unwrap();
        assert_eq!(response_text(response).await, "v2");
    }
}
