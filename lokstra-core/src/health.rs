//! Health endpoints (`/health`, `/health/live`, `/health/ready`) mounted
//! into the router kernel. Not named in spec.md, but a shippable
//! deployment shell always carries liveness/readiness the way the
//! teacher's own process-health plugins do.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

/// A single named health check. Liveness indicators should only fail when
/// the process itself is unrecoverable; readiness indicators may fail
/// while a dependency (database, upstream service) is temporarily down.
#[async_trait]
pub trait HealthIndicator: Send + Sync {
    fn name(&self) -> &str;
    async fn check(&self) -> Result<(), String>;
}

/// An indicator backed by a plain closure, for trivial checks that don't
/// warrant a dedicated type.
pub struct ClosureIndicator<F> {
    name: String,
    check: F,
}

impl<F> ClosureIndicator<F> {
    pub fn new(name: impl Into<String>, check: F) -> Self {
        Self { name: name.into(), check }
    }
}

#[async_trait]
impl<F> HealthIndicator for ClosureIndicator<F>
where
    F: Fn() -> Result<(), String> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> Result<(), String> {
        (self.check)()
    }
}

#[derive(Default)]
pub struct HealthBuilder {
    live: Vec<Arc<dyn HealthIndicator>>,
    ready: Vec<Arc<dyn HealthIndicator>>,
}

impl HealthBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_liveness(mut self, indicator: Arc<dyn HealthIndicator>) -> Self {
        self.live.push(indicator);
        self
    }

    pub fn with_readiness(mut self, indicator: Arc<dyn HealthIndicator>) -> Self {
        self.ready.push(indicator);
        self
    }

    /// Build the `axum::Router` to mount at the app's root (spec.md §4.9
    /// router composition: this merges like any other business route).
    pub fn build(self) -> Router {
        let state = Arc::new(HealthState { live: self.live, ready: self.ready });
        Router::new()
            .route("/health", get(health_summary))
            .route("/health/live", get(liveness))
            .route("/health/ready", get(readiness))
            .with_state(state)
    }
}

struct HealthState {
    live: Vec<Arc<dyn HealthIndicator>>,
    ready: Vec<Arc<dyn HealthIndicator>>,
}

async fn run_checks(indicators: &[Arc<dyn HealthIndicator>]) -> (bool, serde_json::Value) {
    let mut ok = true;
    let mut details = serde_json::Map::new();
    for indicator in indicators {
        match indicator.check().await {
            Ok(()) => {
                details.insert(indicator.name().to_string(), json!("ok"));
            }
            Err(message) => {
                ok = false;
                details.insert(indicator.name().to_string(), json!(message));
            }
        }
    }
    (ok, serde_json::Value::Object(details))
}

async fn liveness(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let (ok, details) = run_checks(&state.live).await;
    let status = if ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(json!({"status": if ok {"up"} else {"down"}, "checks": details})))
}

async fn readiness(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let (ok, details) = run_checks(&state.ready).await;
    let status = if ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(json!({"status": if ok {"ready"} else {"not-ready"}, "checks": details})))
}

async fn health_summary(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let (live_ok, live_details) = run_checks(&state.live).await;
    let (ready_ok, ready_details) = run_checks(&state.ready).await;
    let status = if live_ok && ready_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(json!({
            "status": if live_ok && ready_ok {"up"} else {"degraded"},
            "live": live_details,
            "ready": ready_details,
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn liveness_reports_up_with_no_indicators() {
        let app = HealthBuilder::new().build();
        let response = app.oneshot(Request::builder().uri("/health/live").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_fails_when_an_indicator_errors() {
        let failing = Arc::new(ClosureIndicator::new("db", || Err("unreachable".to_string())));
        let app = HealthBuilder::new().with_readiness(failing).build();
        let response = app.oneshot(Request::builder().uri("/health/ready").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["checks"]["db"], "unreachable");
    }
}
