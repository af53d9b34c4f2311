//! Router Kernel (C9, §4.9): registers routes, dispatches by verb+path,
//! runs middleware chains, and exposes a handler a listener can serve.

pub mod middleware;
pub mod params;
pub mod route;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use axum::body::Body;
use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::MethodRouter;
use axum::Router;
use regex::Regex;
use tower::Service;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::deployment::{ReverseProxyConfig, SpaMount, StaticMount};
use middleware::MiddlewareRegistry;
pub use route::RouteMeta;

#[derive(Debug)]
pub enum KernelError {
    DuplicateRoute { verb: Method, path: String },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::DuplicateRoute { verb, path } => write!(f, "duplicate route: {verb} {path}"),
        }
    }
}

impl std::error::Error for KernelError {}

/// A prefix + inherited middleware + opt-out flag (spec §4.9 "groups").
#[derive(Clone, Default)]
pub struct RouteGroup {
    pub prefix: String,
    pub middleware: Vec<String>,
}

/// Builds the route table for one app. Reverse proxies, business routes,
/// SPA mounts, and static mounts are merged in that priority order (spec
/// §4.9; the Open Question is resolved in `SPEC_FULL.md` §4 — reverse
/// proxies win).
#[derive(Default)]
pub struct RouterKernel {
    routes: Vec<(RouteMeta, MethodRouter)>,
    seen: HashSet<(Method, String)>,
    reverse_proxies: Vec<ReverseProxyConfig>,
    statics: Vec<StaticMount>,
    spas: Vec<SpaMount>,
    global_middleware: Vec<String>,
}

impl RouterKernel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global_middleware(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.global_middleware = names.into_iter().map(Into::into).collect();
        self
    }

    /// Register a single route. Errors on a duplicate `(verb, path)` unless
    /// `overwrite` is set (spec §3 invariant: "duplicate registration is an
    /// error unless explicitly overwritten").
    pub fn route(
        &mut self,
        meta: RouteMeta,
        handler: MethodRouter,
        overwrite: bool,
    ) -> Result<(), KernelError> {
        let key = meta.canonical_key();
        if self.seen.contains(&key) && !overwrite {
            return Err(KernelError::DuplicateRoute { verb: key.0, path: key.1 });
        }
        self.seen.insert(key);
        self.routes.push((meta, handler));
        Ok(())
    }

    /// Register every route in `group` with `prefix` prepended to each
    /// template and `middleware` appended ahead of each route's own list
    /// (spec §4.9 groups, §4.5 step 6 middleware precedence).
    pub fn group(
        &mut self,
        group: &RouteGroup,
        mut entries: Vec<(RouteMeta, MethodRouter)>,
        overwrite: bool,
    ) -> Result<(), KernelError> {
        for (mut meta, handler) in entries.drain(..) {
            meta.path_template = format!("{}{}", group.prefix, meta.path_template);
            if !meta.skip_parent_middleware {
                let mut combined = group.middleware.clone();
                combined.extend(meta.middleware);
                meta.middleware = combined;
            }
            self.route(meta, handler, overwrite)?;
        }
        Ok(())
    }

    pub fn mount_reverse_proxy(&mut self, cfg: ReverseProxyConfig) {
        self.reverse_proxies.push(cfg);
    }

    pub fn mount_static(&mut self, cfg: StaticMount) {
        self.statics.push(cfg);
    }

    pub fn mount_spa(&mut self, cfg: SpaMount) {
        self.spas.push(cfg);
    }

    /// Materialize the registered routes/mounts into a servable
    /// [`KernelService`].
    pub fn build(self, registry: &MiddlewareRegistry) -> KernelService {
        let mut router: Router = Router::new();

        // Business routes, each with its own (group+type+route) middleware
        // chain already folded into `meta.middleware`.
        for (meta, handler) in &self.routes {
            let path = route::to_axum_path(&meta.path_template);
            let handler = handler.clone();
            let sub = Router::new().route(&path, handler);
            let sub = registry.apply(sub, &meta.middleware);
            router = router.merge(sub);
        }

        // SPA mounts: serve the directory, fall back to index.html.
        for spa in &self.spas {
            let index = format!("{}/{}", spa.dir.trim_end_matches('/'), spa.index_file);
            let serve_dir = ServeDir::new(&spa.dir).not_found_service(ServeFile::new(index));
            router = router.fallback_service(serve_dir);
        }

        // Static mounts: serve a directory under a fixed prefix.
        for mount in &self.statics {
            let prefix = format!("{}/{{*rest}}", mount.prefix.trim_end_matches('/'));
            router = router.nest_service(&prefix, ServeDir::new(&mount.dir));
        }

        let router = registry.apply(router, &self.global_middleware);
        let router = router.layer(TraceLayer::new_for_http());

        let mut reverse_proxies: Vec<CompiledProxy> = self
            .reverse_proxies
            .iter()
            .map(|cfg| CompiledProxy {
                prefix: cfg.prefix.clone(),
                target: cfg.target.clone(),
                strip_prefix: cfg.strip_prefix,
                rewrite: cfg
                    .rewrite
                    .as_ref()
                    .and_then(|(from, to)| Regex::new(from).ok().map(|re| (re, to.clone()))),
            })
            .collect();
        // Longest prefix first, so overlapping proxy prefixes pick the most
        // specific one.
        reverse_proxies.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));

        KernelService {
            inner: router,
            reverse_proxies: Arc::new(reverse_proxies),
            client: reqwest::Client::new(),
        }
    }
}

struct CompiledProxy {
    prefix: String,
    target: String,
    strip_prefix: bool,
    rewrite: Option<(Regex, String)>,
}

/// The servable handler produced by [`RouterKernel::build`]: reverse
/// proxies are checked first (highest mount priority), everything else
/// falls through to the merged business/SPA/static router.
#[derive(Clone)]
pub struct KernelService {
    inner: Router,
    reverse_proxies: Arc<Vec<CompiledProxy>>,
    client: reqwest::Client,
}

impl KernelService {
    fn matching_proxy(&self, path: &str) -> Option<&CompiledProxy> {
        self.reverse_proxies.iter().find(|p| path.starts_with(&p.prefix))
    }

    async fn forward(proxy_target: String, strip_prefix: bool, prefix_len: usize, rewrite: Option<(Regex, String)>, client: reqwest::Client, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let mut path = parts.uri.path().to_string();
        if strip_prefix {
            path = path[prefix_len.min(path.len())..].to_string();
            if !path.starts_with('/') {
                path = format!("/{path}");
            }
        }
        if let Some((re, to)) = &rewrite {
            path = re.replace(&path, to.as_str()).into_owned();
        }
        let query = parts.uri.query().map(|q| format!("?{q}")).unwrap_or_default();
        let url = format!("{}{}{}", proxy_target.trim_end_matches('/'), path, query);

        let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(b) => b,
            Err(e) => return (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
        };

        let mut req = client.request(parts.method.clone(), &url);
        for (name, value) in parts.headers.iter() {
            req = req.header(name, value);
        }
        req = req.body(body_bytes);

        match req.send().await {
            Ok(resp) => {
                let status = resp.status();
                let headers = resp.headers().clone();
                let bytes = resp.bytes().await.unwrap_or_default();
                let mut builder = Response::builder().status(status);
                if let Some(h) = builder.headers_mut() {
                    *h = headers;
                }
                builder.body(Body::from(bytes)).unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
            }
            Err(e) => (StatusCode::BAD_GATEWAY, format!("upstream error: {e}")).into_response(),
        }
    }
}

impl Service<Request> for KernelService {
    type Response = Response;
    type Error = std::convert::Infallible;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let path = request.uri().path().to_string();
        if let Some(proxy) = self.matching_proxy(&path) {
            let target = proxy.target.clone();
            let strip_prefix = proxy.strip_prefix;
            let prefix_len = proxy.prefix.len();
            let rewrite = proxy.rewrite.clone();
            let client = self.client.clone();
            return Box::pin(async move {
                Ok(Self::forward(target, strip_prefix, prefix_len, rewrite, client, request).await)
            });
        }

        let mut inner = self.inner.clone();
        Box::pin(async move { Ok(inner.call(request).await.unwrap_or_else(|e: std::convert::Infallible| match e {})) })
    }
}

/// A plain 404 handler used by routes registered with no explicit fallback.
pub async fn not_found() -> impl IntoResponse {
    StatusCode::NOT_FOUND
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn dispatches_registered_route() {
        let mut kernel = RouterKernel::new();
        kernel
            .route(RouteMeta::new(Method::GET, "/ping"), get(|| async { "pong" }), false)
            .unwrap();
        let registry = MiddlewareRegistry::new();
        let mut service = kernel.build(&registry);

        let response = service.call(Request::builder().uri("/ping").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"pong");
    }

    #[test]
    fn duplicate_route_without_overwrite_errors() {
        let mut kernel = RouterKernel::new();
        kernel.route(RouteMeta::new(Method::GET, "/ping"), get(|| async { "pong" }), false).unwrap();
        let err = kernel.route(RouteMeta::new(Method::GET, "/ping"), get(|| async { "pong2" }), false).unwrap_err();
        assert!(matches!(err, KernelError::DuplicateRoute { .. }));
    }

    #[test]
    fn duplicate_route_with_overwrite_succeeds() {
        let mut kernel = RouterKernel::new();
        kernel.route(RouteMeta::new(Method::GET, "/ping"), get(|| async { "pong" }), false).unwrap();
        kernel.route(RouteMeta::new(Method::GET, "/ping"), get(|| async { "pong2" }), true).unwrap();
    }

    #[tokio::test]
    async fn group_prefixes_paths_and_inherits_middleware() {
        let mut kernel = RouterKernel::new();
        let group = RouteGroup { prefix: "/api".to_string(), middleware: vec!["request-id".to_string()] };
        kernel
            .group(&group, vec![(RouteMeta::new(Method::GET, "/ping"), get(|| async { "pong" }))], false)
            .unwrap();

        let registry = MiddlewareRegistry::new();
        let mut service = kernel.build(&registry);
        let response =
            service.call(Request::builder().uri("/api/ping").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(middleware::REQUEST_ID_HEADER).is_some());
    }
}
