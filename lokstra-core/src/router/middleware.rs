//! The middleware plug-in contract (spec §3, §4.5 step 6, §9).
//!
//! A middleware is a named constructor producing a `tower::Layer` that
//! wraps an `axum::Router`. Precedence is global -> app -> group ->
//! service-type -> route (`SPEC_FULL.md` §4's Open Question resolution),
//! with a per-route `skip_parent_middleware` opt-out.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

/// A named middleware constructor: applies itself to a router and hands
/// back the wrapped router (mirrors the teacher's `LayerFn` shape).
pub type MiddlewareFn = Arc<dyn Fn(Router) -> Router + Send + Sync>;

/// Global, name-addressed registry of middleware constructors
/// (spec §4.3 `register_middleware`).
#[derive(Default)]
pub struct MiddlewareRegistry {
    entries: RwLock<HashMap<String, MiddlewareFn>>,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        let registry = Self::default();
        registry.register("request-id", Arc::new(|r| r.layer(middleware::from_fn(request_id_middleware))));
        registry.register("secure-headers", Arc::new(|r| r.layer(middleware::from_fn(secure_headers_middleware))));
        registry.register("panic-recovery", Arc::new(|r| r.layer(CatchPanicLayer::new())));
        registry.register("cors", Arc::new(|r| r.layer(permissive_cors())));
        registry
    }

    pub fn register(&self, name: impl Into<String>, factory: MiddlewareFn) {
        self.entries.write().expect("middleware registry poisoned").insert(name.into(), factory);
    }

    pub fn get(&self, name: &str) -> Option<MiddlewareFn> {
        self.entries.read().expect("middleware registry poisoned").get(name).cloned()
    }

    /// Apply `names` to `router` in order, skipping any name that isn't
    /// registered (a route referencing a middleware that was never
    /// registered is a startup configuration mistake the caller should
    /// have caught; the kernel itself just no-ops).
    pub fn apply(&self, router: Router, names: &[String]) -> Router {
        names.iter().fold(router, |r, name| match self.get(name) {
            Some(factory) => factory(r),
            None => r,
        })
    }
}

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Generates an `X-Request-Id` if the caller didn't send one, and always
/// echoes it back on the response (spec §7: "headers preserve
/// `X-Request-Id`").
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// The request-id extracted by [`request_id_middleware`], readable from
/// request extensions by handlers and the proxy.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// A minimal reference implementation of a secure-headers middleware
/// (spec §3 "secure-headers", carried as a trivial reference implementation
/// per `SPEC_FULL.md` §3, not a full middleware ecosystem).
pub async fn secure_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("referrer-policy", HeaderValue::from_static("no-referrer"));
    response
}

/// A permissive reference CORS layer; production deployments register
/// their own stricter `cors` middleware under the same name.
pub fn permissive_cors() -> CorsLayer {
    CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::routing::get;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn request_id_is_generated_when_absent() {
        let router: Router = Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(middleware::from_fn(request_id_middleware));

        let response = router.oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(REQUEST_ID_HEADER).is_some());
    }

    #[tokio::test]
    async fn request_id_is_echoed_back_when_present() {
        let router: Router = Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(middleware::from_fn(request_id_middleware));

        let response = router
            .oneshot(
                Request::builder().uri("/ping").header(REQUEST_ID_HEADER, "abc-123").body(Body::empty()).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers().get(REQUEST_ID_HEADER).unwrap(), "abc-123");
    }

    #[tokio::test]
    async fn registry_applies_named_middleware_in_order() {
        let registry = MiddlewareRegistry::new();
        let router = Router::new().route("/ping", get(|| async { "pong" }));
        let router = registry.apply(router, &["request-id".to_string(), "secure-headers".to_string()]);

        let response = router.oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap()).await.unwrap();
        assert!(response.headers().get(REQUEST_ID_HEADER).is_some());
        assert!(response.headers().get("x-frame-options").is_some());
        let _ = response.into_body().collect().await;
    }
}
