//! Auto-Router (C5, §4.5): given a service instance and its type metadata,
//! synthesizes routes via convention + overrides and binds handler
//! parameters.
//!
//! Rust has no runtime method reflection, so a service type exposes its
//! routable methods through [`AutoRouted::method_descriptors`] instead of
//! being inspected at registration time (spec §9's explicit allowance for
//! "an explicit per-route descriptor built at registration time"). Each
//! [`MethodDescriptor`] already knows how to bind its own signature
//! category; building routes is then pure data-flow: convention/override
//! resolution, prefixing, and middleware attachment.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query};
use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use axum::routing::{on, MethodFilter, MethodRouter};
use serde::Serialize;
use serde_json::Value;

use crate::convention::ConventionRegistry;
use crate::error::AppError;
use crate::formatter::{default_formatter, EnvelopeMeta};
use crate::registry::ServiceType;
use crate::router::middleware::RequestId;
use crate::router::params::{bind, BindSource, BindableParams};
use crate::router::route::RouteMeta;

/// Request-scoped helpers available to `(Context) -> …` and
/// `(Context, *Params) -> …` handlers (spec §4.5 step 4).
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub request_id: Option<String>,
    pub path_params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
}

/// The four return shapes a service method may produce (spec §4.5 step 5
/// "Interprets the return").
pub enum HandlerReturn {
    Json(Value),
    Api(ApiHelper),
    Raw(Response),
}

impl HandlerReturn {
    pub fn json(value: impl Serialize) -> Self {
        HandlerReturn::Json(serde_json::to_value(value).unwrap_or(Value::Null))
    }

    fn into_response(self) -> Response {
        match self {
            HandlerReturn::Json(data) => default_formatter().render_success(data, None, None),
            HandlerReturn::Api(api) => default_formatter().render_success(api.data, api.message, api.meta),
            HandlerReturn::Raw(response) => response,
        }
    }
}

/// Builder for a success envelope with an optional message/pagination meta
/// (spec's "ApiHelper" return shape).
pub struct ApiHelper {
    data: Value,
    message: Option<String>,
    meta: Option<EnvelopeMeta>,
}

impl ApiHelper {
    pub fn ok(data: impl Serialize) -> Self {
        Self { data: serde_json::to_value(data).unwrap_or(Value::Null), message: None, meta: None }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn meta(mut self, meta: EnvelopeMeta) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Which of the four handler signature shapes a method uses (spec §4.5
/// step 4). Carried for introspection/diagnostics; dispatch itself is
/// determined by which `route_*` constructor built the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCategory {
    Plain,
    Context,
    Params,
    ContextParams,
}

/// One routable method on a service type `T`, built at registration time.
pub struct MethodDescriptor<T> {
    pub name: &'static str,
    pub category: SignatureCategory,
    build: Arc<dyn Fn(Arc<T>, Method) -> MethodRouter + Send + Sync>,
}

impl<T: Send + Sync + 'static> MethodDescriptor<T> {
    /// `() -> Result<HandlerReturn, AppError>` (spec §4.5 step 4, plain).
    pub fn plain<Fut>(name: &'static str, func: fn(Arc<T>) -> Fut) -> Self
    where
        Fut: Future<Output = Result<HandlerReturn, AppError>> + Send + 'static,
    {
        Self {
            name,
            category: SignatureCategory::Plain,
            build: Arc::new(move |instance, verb| {
                let handler = move || {
                    let instance = instance.clone();
                    async move { dispatch(func(instance)).await }
                };
                on(method_filter(&verb), handler)
            }),
        }
    }

    /// `(Context) -> Result<HandlerReturn, AppError>`.
    pub fn context<Fut>(name: &'static str, func: fn(Arc<T>, HandlerContext) -> Fut) -> Self
    where
        Fut: Future<Output = Result<HandlerReturn, AppError>> + Send + 'static,
    {
        Self {
            name,
            category: SignatureCategory::Context,
            build: Arc::new(move |instance, verb| {
                let handler = move |Path(path_params): Path<HashMap<String, String>>,
                                     Query(query): Query<HashMap<String, String>>,
                                     headers: HeaderMap| {
                    let instance = instance.clone();
                    async move {
                        let ctx = HandlerContext {
                            request_id: request_id_from_headers(&headers),
                            path_params,
                            query,
                            headers,
                        };
                        dispatch(func(instance, ctx)).await
                    }
                };
                on(method_filter(&verb), handler)
            }),
        }
    }

    /// `(*Params) -> Result<HandlerReturn, AppError>`.
    pub fn params<P, Fut>(name: &'static str, func: fn(Arc<T>, P) -> Fut) -> Self
    where
        P: BindableParams,
        Fut: Future<Output = Result<HandlerReturn, AppError>> + Send + 'static,
    {
        Self {
            name,
            category: SignatureCategory::Params,
            build: Arc::new(move |instance, verb| {
                let handler = move |Path(path_params): Path<HashMap<String, String>>,
                                     Query(query): Query<HashMap<String, String>>,
                                     headers: HeaderMap,
                                     body: Bytes| {
                    let instance = instance.clone();
                    async move {
                        let params = match bind_body::<P>(&path_params, &query, &headers, &body) {
                            Ok(p) => p,
                            Err(e) => return e.into_response(),
                        };
                        dispatch(func(instance, params)).await
                    }
                };
                on(method_filter(&verb), handler)
            }),
        }
    }

    /// `(Context, *Params) -> Result<HandlerReturn, AppError>`.
    pub fn context_params<P, Fut>(name: &'static str, func: fn(Arc<T>, HandlerContext, P) -> Fut) -> Self
    where
        P: BindableParams,
        Fut: Future<Output = Result<HandlerReturn, AppError>> + Send + 'static,
    {
        Self {
            name,
            category: SignatureCategory::ContextParams,
            build: Arc::new(move |instance, verb| {
                let handler = move |Path(path_params): Path<HashMap<String, String>>,
                                     Query(query): Query<HashMap<String, String>>,
                                     headers: HeaderMap,
                                     body: Bytes| {
                    let instance = instance.clone();
                    async move {
                        let params = match bind_body::<P>(&path_params, &query, &headers, &body) {
                            Ok(p) => p,
                            Err(e) => return e.into_response(),
                        };
                        let ctx = HandlerContext {
                            request_id: request_id_from_headers(&headers),
                            path_params,
                            query,
                            headers,
                        };
                        dispatch(func(instance, ctx, params)).await
                    }
                };
                on(method_filter(&verb), handler)
            }),
        }
    }
}

fn method_filter(verb: &Method) -> MethodFilter {
    MethodFilter::try_from(verb.clone()).unwrap_or(MethodFilter::GET)
}

async fn dispatch<Fut>(fut: Fut) -> Response
where
    Fut: Future<Output = Result<HandlerReturn, AppError>>,
{
    match fut.await {
        Ok(result) => result.into_response(),
        Err(err) => err.into_response(),
    }
}

fn bind_body<P: BindableParams>(
    path_params: &HashMap<String, String>,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<P, AppError> {
    let json_body: Value = if body.is_empty() { Value::Object(Default::default()) } else {
        serde_json::from_slice(body).unwrap_or(Value::Null)
    };
    let source = BindSource { path_params, query, headers, body: &json_body };
    bind::<P>(&source).map_err(AppError::Validation)
}

fn request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(crate::router::middleware::REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// A service type whose methods are known at registration time (spec §9's
/// reflection substitute). Implemented once per service struct.
pub trait AutoRouted: Send + Sync + Sized + 'static {
    fn method_descriptors() -> Vec<MethodDescriptor<Self>>;
}

/// Synthesize the route table for one published service instance (spec
/// §4.5 steps 1-3, 6). Group/app-level prefixing and middleware are
/// layered on by the caller via [`crate::router::RouteGroup`].
pub fn build_routes<T: AutoRouted>(
    instance: Arc<T>,
    service_type: &ServiceType,
    conventions: &ConventionRegistry,
) -> Vec<(RouteMeta, MethodRouter)> {
    let resource = &service_type.resource;
    let plural = service_type.resource_plural();
    let mut out = Vec::new();

    for descriptor in T::method_descriptors() {
        if service_type.hidden.iter().any(|h| h == descriptor.name) {
            continue;
        }

        let (verb, path) = if let Some((verb, path)) = service_type.overrides.get(descriptor.name) {
            (verb.clone(), path.clone())
        } else {
            match conventions.resolve(&service_type.convention, descriptor.name, resource, &plural) {
                Some(m) => (m.verb, m.path_template),
                None => continue,
            }
        };

        let full_path = format!("{}{}", service_type.prefix, path);
        let handler = (descriptor.build)(instance.clone(), verb.clone());
        let mut meta = RouteMeta::new(verb, full_path);
        meta.route_name = Some(descriptor.name.to_string());
        meta.middleware = service_type.middleware.clone();
        out.push((meta, handler));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ServiceType;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde::Deserialize;
    use tower::ServiceExt;

    struct Users;

    #[derive(Deserialize)]
    struct GetUserParams {
        id: String,
    }

    impl BindableParams for GetUserParams {
        fn specs() -> Vec<crate::router::params::ParamSpec> {
            vec![crate::router::params::ParamSpec::new(
                "id",
                crate::router::params::ParamSource::Path("id"),
            )]
        }
    }

    impl Users {
        async fn list(_this: Arc<Users>) -> Result<HandlerReturn, AppError> {
            Ok(HandlerReturn::json(serde_json::json!(["a", "b"])))
        }

        async fn get(_this: Arc<Users>, params: GetUserParams) -> Result<HandlerReturn, AppError> {
            Ok(HandlerReturn::json(serde_json::json!({ "id": params.id })))
        }
    }

    impl AutoRouted for Users {
        fn method_descriptors() -> Vec<MethodDescriptor<Self>> {
            vec![
                MethodDescriptor::plain("List", Users::list),
                MethodDescriptor::params("Get", Users::get),
            ]
        }
    }

    #[tokio::test]
    async fn synthesizes_rest_routes_from_convention() {
        let service_type = ServiceType::builder("users")
            .resource("user", Some("users".to_string()))
            .build();
        let conventions = ConventionRegistry::new();
        let routes = build_routes(Arc::new(Users), &service_type, &conventions);

        let paths: Vec<_> = routes.iter().map(|(m, _)| (m.verb.clone(), m.path_template.clone())).collect();
        assert!(paths.contains(&(Method::GET, "/users".to_string())));
        assert!(paths.contains(&(Method::GET, "/users/{id}".to_string())));
    }

    #[tokio::test]
    async fn params_route_binds_path_param() {
        let service_type = ServiceType::builder("users").resource("user", Some("users".to_string())).build();
        let conventions = ConventionRegistry::new();
        let routes = build_routes(Arc::new(Users), &service_type, &conventions);
        let (_, handler) = routes.into_iter().find(|(m, _)| m.route_name.as_deref() == Some("Get")).unwrap();

        let router = axum::Router::new().route("/users/{id}", handler);
        let response = router
            .oneshot(Request::builder().uri("/users/42").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["data"]["id"], "42");
    }
}
