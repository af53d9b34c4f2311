//! Proxy Service (C6, §4.6): the client side of a service — translates
//! method calls into HTTP requests using the same convention/overrides as
//! the local auto-router, and parses the response back into an envelope.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Request};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tower::Service;

use crate::convention::ConventionRegistry;
use crate::error::AppError;
use crate::formatter::{DecodedEnvelope, Formatter};
use crate::registry::ServiceType;
use crate::router::params::{BindableParams, ParamSource};
use crate::router::route;
use crate::router::KernelService;

/// Default per-call timeout, overridable per service (spec §5: "Proxy
/// calls have a default 30-second timeout that may be overridden per
/// service").
pub const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum ProxyError {
    HiddenMethod { method: String },
    NoRouteForMethod { method: String },
    UnresolvedPathParam { name: String },
    Transport(String),
    Timeout,
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::HiddenMethod { method } => write!(f, "method is hidden: {method}"),
            ProxyError::NoRouteForMethod { method } => write!(f, "no route resolved for method: {method}"),
            ProxyError::UnresolvedPathParam { name } => write!(f, "unresolved path parameter: {name}"),
            ProxyError::Transport(msg) => write!(f, "transport error: {msg}"),
            ProxyError::Timeout => write!(f, "proxy call timed out"),
        }
    }
}

impl std::error::Error for ProxyError {}

impl From<ProxyError> for AppError {
    fn from(err: ProxyError) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// How a [`ProxyService`] actually executes a call (spec §4.6 "Router-proxy
/// variant").
enum Target {
    /// Over the network, to another process's base URL.
    Http { base_url: String, client: reqwest::Client },
    /// In-process, against a [`KernelService`] — used when a deployment
    /// colocates the caller and callee so they can skip the network while
    /// still honoring the same error-to-envelope conversion (spec §4.6).
    Local(KernelService),
}

/// Satisfies a service interface by issuing requests to a remote server,
/// or an in-process router, behind the exact contract a local
/// implementation would present (GLOSSARY "Proxy Service").
pub struct ProxyService {
    target: Target,
    service_type: Arc<ServiceType>,
    conventions: Arc<ConventionRegistry>,
    timeout: Duration,
    formatter: Arc<dyn Formatter>,
}

impl ProxyService {
    pub fn new(base_url: String, service_type: Arc<ServiceType>, conventions: Arc<ConventionRegistry>) -> Self {
        Self {
            target: Target::Http { base_url, client: reqwest::Client::new() },
            service_type,
            conventions,
            timeout: DEFAULT_PROXY_TIMEOUT,
            formatter: Arc::new(crate::formatter::DefaultFormatter),
        }
    }

    pub fn new_local(router: KernelService, service_type: Arc<ServiceType>, conventions: Arc<ConventionRegistry>) -> Self {
        Self {
            target: Target::Local(router),
            service_type,
            conventions,
            timeout: DEFAULT_PROXY_TIMEOUT,
            formatter: Arc::new(crate::formatter::DefaultFormatter),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_conventions(mut self, conventions: Arc<ConventionRegistry>) -> Self {
        self.conventions = conventions;
        self
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn Formatter>) -> Self {
        self.formatter = formatter;
        self
    }

    /// Resolve `(verb, path_template)` the same way the auto-router would
    /// (spec §4.6 step 1, §4.5 steps 2a-2c).
    fn resolve_route(&self, method_name: &str) -> Result<(axum::http::Method, String), ProxyError> {
        if self.service_type.hidden.iter().any(|h| h == method_name) {
            return Err(ProxyError::HiddenMethod { method: method_name.to_string() });
        }
        if let Some((verb, path)) = self.service_type.overrides.get(method_name) {
            return Ok((verb.clone(), path.clone()));
        }
        let plural = self.service_type.resource_plural();
        self.conventions
            .resolve(&self.service_type.convention, method_name, &self.service_type.resource, &plural)
            .map(|m| (m.verb, m.path_template))
            .ok_or_else(|| ProxyError::NoRouteForMethod { method: method_name.to_string() })
    }

    /// Invoke `method_name` with `params`, returning the decoded envelope
    /// (spec §4.6 `call`).
    pub async fn call<P: BindableParams>(
        &self,
        method_name: &str,
        params: &P,
        caller_headers: Option<&HeaderMap>,
    ) -> Result<DecodedEnvelope, AppError> {
        let (verb, path_template) = self.resolve_route(method_name).map_err(AppError::from)?;
        let specs = P::specs();
        let body_value = serde_json::to_value(params).unwrap_or(Value::Null);

        let mut path_values: HashMap<String, String> = HashMap::new();
        for spec in &specs {
            if let ParamSource::Path(name) = &spec.source {
                if let Some(v) = field_as_string(&body_value, spec.field) {
                    path_values.insert((*name).to_string(), v);
                }
            }
        }
        let path = route::render(&path_template, &path_values)
            .map_err(|name| AppError::from(ProxyError::UnresolvedPathParam { name }))?;

        let is_body_verb =
            matches!(verb, axum::http::Method::POST | axum::http::Method::PUT | axum::http::Method::PATCH);

        let mut query_pairs: Vec<(String, String)> = Vec::new();
        let mut json_body = serde_json::Map::new();
        for spec in &specs {
            match &spec.source {
                ParamSource::JsonField(name) if is_body_verb => {
                    if let Some(v) = body_value.get(spec.field) {
                        json_body.insert((*name).to_string(), v.clone());
                    }
                }
                ParamSource::JsonBody if is_body_verb => {
                    if let Value::Object(map) = &body_value {
                        json_body = map.clone();
                    }
                }
                ParamSource::Query(name) if !is_body_verb => {
                    if let Some(v) = field_as_string(&body_value, spec.field) {
                        query_pairs.push(((*name).to_string(), v));
                    }
                }
                _ => {}
            }
        }

        let mut url = path;
        if !query_pairs.is_empty() {
            let qs: String = query_pairs.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&");
            url = format!("{url}?{qs}");
        }

        let body_bytes = if is_body_verb {
            serde_json::to_vec(&Value::Object(json_body)).unwrap_or_default()
        } else {
            Vec::new()
        };

        let (status, bytes) = self.execute(verb, &url, caller_headers, body_bytes).await?;
        Ok(self.formatter.decode(status, &bytes))
    }

    /// Typed variant of [`Self::call`] (spec §4.6 step 5).
    pub async fn call_with_data<T: DeserializeOwned, P: BindableParams>(
        &self,
        method_name: &str,
        params: &P,
        caller_headers: Option<&HeaderMap>,
    ) -> Result<T, AppError> {
        let data = self.call(method_name, params, caller_headers).await?.into_data()?;
        serde_json::from_value(data).map_err(|e| AppError::Internal(format!("response did not match expected type: {e}")))
    }

    async fn execute(
        &self,
        verb: axum::http::Method,
        path_and_query: &str,
        caller_headers: Option<&HeaderMap>,
        body: Vec<u8>,
    ) -> Result<(axum::http::StatusCode, Vec<u8>), AppError> {
        match &self.target {
            Target::Http { base_url, client } => {
                let url = format!("{}{}", base_url.trim_end_matches('/'), path_and_query);
                let mut request = client.request(verb, &url).timeout(self.timeout);
                if let Some(headers) = caller_headers {
                    for (name, value) in headers.iter() {
                        request = request.header(name, value);
                    }
                }
                if !body.is_empty() {
                    request = request.header("content-type", "application/json").body(body);
                }
                let response = request
                    .send()
                    .await
                    .map_err(|e| AppError::from(ProxyError::Transport(e.to_string())))?;
                let status = response.status();
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| AppError::from(ProxyError::Transport(e.to_string())))?;
                Ok((status, bytes.to_vec()))
            }
            Target::Local(router) => {
                let mut builder = Request::builder().method(verb).uri(path_and_query);
                if let Some(headers) = caller_headers {
                    for (name, value) in headers.iter() {
                        builder = builder.header(name, value);
                    }
                }
                let request = builder
                    .body(Body::from(body))
                    .map_err(|e| AppError::Internal(e.to_string()))?;

                let mut router = router.clone();
                let response = router
                    .call(request)
                    .await
                    .unwrap_or_else(|e: std::convert::Infallible| match e {});
                let status = response.status();
                let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                    .await
                    .map_err(|e| AppError::Internal(e.to_string()))?;
                Ok((status, bytes.to_vec()))
            }
        }
    }
}

fn field_as_string(value: &Value, field: &str) -> Option<String> {
    match value.get(field)? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::middleware::MiddlewareRegistry;
    use crate::router::params::ParamSpec;
    use crate::router::route::RouteMeta;
    use crate::router::RouterKernel;
    use axum::routing::get;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct GetUser {
        id: String,
    }

    impl BindableParams for GetUser {
        fn specs() -> Vec<ParamSpec> {
            vec![ParamSpec::new("id", ParamSource::Path("id"))]
        }
    }

    fn local_router() -> KernelService {
        let mut kernel = RouterKernel::new();
        kernel
            .route(
                RouteMeta::new(axum::http::Method::GET, "/users/{id}"),
                get(|axum::extract::Path(id): axum::extract::Path<String>| async move {
                    axum::Json(serde_json::json!({"status": "success", "data": {"id": id}}))
                }),
                false,
            )
            .unwrap();
        kernel.build(&MiddlewareRegistry::new())
    }

    #[tokio::test]
    async fn local_proxy_resolves_path_and_decodes_envelope() {
        let service_type = Arc::new(
            ServiceType::builder("users").resource("user", Some("users".to_string())).build(),
        );
        let proxy = ProxyService::new_local(local_router(), service_type, Arc::new(ConventionRegistry::new()));
        let result = proxy.call_with_data::<Value, _>("Get", &GetUser { id: "42".to_string() }, None).await.unwrap();
        assert_eq!(result["id"], "42");
    }

    #[tokio::test]
    async fn hidden_method_errors() {
        let service_type = Arc::new(
            ServiceType::builder("users")
                .resource("user", Some("users".to_string()))
                .hidden(["Get"])
                .build(),
        );
        let proxy = ProxyService::new_local(local_router(), service_type, Arc::new(ConventionRegistry::new()));
        let err = proxy.call("Get", &GetUser { id: "1".to_string() }, None).await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }
}
