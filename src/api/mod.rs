//! HTTP surface over [`DevPulse`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::config::username_filter;
use crate::error::{Error, Result};
use crate::{DevPulse, DeveloperMetrics};

pub const WELCOME: &str = "Welcome to the productivity metric API!";
pub const MISSING_PARAMETERS: &str =
    "Both Github username and repository name are required. Please provide one.";
pub const MISSING_REPOSITORY: &str = "A repository name is required.";

#[derive(Debug, Default, Deserialize)]
pub struct MetricsParams {
    pub username: Option<String>,
    pub repository: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportParams {
    /// Comma-separated; all users when absent.
    pub usernames: Option<String>,
    pub repository: Option<String>,
}

pub fn router(dw: Arc<DevPulse>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/metrics", get(get_metrics))
        .route("/report", get(get_report))
        .with_state(dw)
}

/// Bind `addr` and serve until the process exits.
pub async fn serve(dw: Arc<DevPulse>, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Config(format!("cannot bind {addr}: {e}")))?;
    log::info!("Serving metrics API on http://{addr}");
    axum::serve(listener, router(dw))
        .await
        .map_err(|e| Error::Other(e.to_string()))
}

async fn index() -> &'static str {
    WELCOME
}

/// Cached metrics for one developer.
///
/// Missing parameters answer 200 with an `error` body. Generation failures are
/// reported inside `metrics`; storage failures answer 500.
pub async fn get_metrics(
    State(dw): State<Arc<DevPulse>>,
    headers: HeaderMap,
    Query(params): Query<MetricsParams>,
) -> Response {
    let (Some(username), Some(repository)) = (
        non_blank(params.username.as_deref()),
        non_blank(params.repository.as_deref()),
    ) else {
        return Json(json!({ "error": MISSING_PARAMETERS })).into_response();
    };
    let token = bearer_token(&headers).or_else(|| non_blank(params.token.as_deref()));

    match dw.metrics(username, repository, token).await {
        Ok(metrics) => Json(DeveloperMetrics {
            developer: username.to_string(),
            metrics,
        })
        .into_response(),
        Err(e) if e.is_persistence() => {
            log::error!("Metrics lookup for {username} failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))).into_response()
        }
        Err(e) => Json(json!({
            "developer": username,
            "metrics": { "error": e.to_string() },
        }))
        .into_response(),
    }
}

/// PDF report over the historical snapshots of a repository.
pub async fn get_report(
    State(dw): State<Arc<DevPulse>>,
    Query(params): Query<ReportParams>,
) -> Response {
    let Some(repository) = non_blank(params.repository.as_deref()) else {
        return Json(json!({ "error": MISSING_REPOSITORY })).into_response();
    };
    let usernames = username_filter(params.usernames.as_deref());

    match dw.report(repository, usernames.as_deref()).await {
        Ok(pdf) => (
            [
                (CONTENT_TYPE, "application/pdf"),
                (CONTENT_DISPOSITION, "attachment; filename=report.pdf"),
            ],
            pdf,
        )
            .into_response(),
        Err(e) => {
            log::error!("Report for {repository} failed: {e}");
            Json(json!({ "error": e.to_string() })).into_response()
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Token from an `Authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    non_blank(Some(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::fixture::{FixtureFactory, FixtureSource};
    use crate::storage::Database;
    use axum::body::to_bytes;
    use axum::http::HeaderValue;
    use serde_json::Value;

    async fn state(source: FixtureSource) -> (Arc<DevPulse>, Arc<FixtureSource>) {
        let db = Database::open_memory().await.unwrap();
        let source = Arc::new(source);
        let dw = DevPulse::new(db, Arc::new(FixtureFactory(source.clone())));
        (Arc::new(dw), source)
    }

    async fn body_json(response: Response) -> (StatusCode, Value) {
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn params(username: Option<&str>, repository: Option<&str>) -> MetricsParams {
        MetricsParams {
            username: username.map(String::from),
            repository: repository.map(String::from),
            token: None,
        }
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer ghp_abc"));
        assert_eq!(bearer_token(&headers), Some("ghp_abc"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(bearer_token(&headers), None);
    }

    #[tokio::test]
    async fn test_missing_parameters_answer_200_with_error() {
        let (dw, source) = state(FixtureSource::new()).await;
        for p in [params(None, Some("demo")), params(Some("alice"), None), params(Some(" "), Some("demo"))] {
            let response = get_metrics(State(dw.clone()), HeaderMap::new(), Query(p)).await;
            let (status, body) = body_json(response).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, json!({ "error": MISSING_PARAMETERS }));
        }
        assert_eq!(source.calls("repository"), 0);
    }

    #[tokio::test]
    async fn test_metrics_success_shape() {
        let (dw, _) = state(FixtureSource::new()).await;
        let response = get_metrics(State(dw), HeaderMap::new(), Query(params(Some("alice"), Some("demo")))).await;
        let (status, body) = body_json(response).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["developer"], "alice");
        assert_eq!(body["metrics"]["repository"], "demo");
        assert_eq!(body["metrics"]["counters"]["commits"], 0);
        assert!(body["metrics"]["last_modified"].is_string());
    }

    #[tokio::test]
    async fn test_generation_failure_is_reported_in_metrics() {
        let mut source = FixtureSource::new();
        source.failing = vec!["issue_count"];
        let (dw, _) = state(source).await;
        let response = get_metrics(State(dw), HeaderMap::new(), Query(params(Some("alice"), Some("demo")))).await;
        let (status, body) = body_json(response).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["developer"], "alice");
        assert!(body["metrics"]["error"].as_str().unwrap().contains("issue_count"));
        assert!(body["metrics"].get("counters").is_none());
    }

    #[tokio::test]
    async fn test_report_returns_pdf_attachment() {
        let (dw, _) = state(FixtureSource::new()).await;
        let query = ReportParams {
            usernames: Some("alice,bob".into()),
            repository: Some("demo".into()),
        };
        let response = get_report(State(dw), Query(query)).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/pdf");
        assert!(response.headers()[CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .starts_with("attachment"));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.starts_with(b"%PDF-1.4"));
    }

    #[tokio::test]
    async fn test_report_without_repository_is_an_error_body() {
        let (dw, _) = state(FixtureSource::new()).await;
        let response = get_report(State(dw), Query(ReportParams::default())).await;
        let (status, body) = body_json(response).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "error": MISSING_REPOSITORY }));
    }
}
