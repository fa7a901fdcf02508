//! HTTP server side: the peer protocol, the public API and ops endpoints

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{decode_key, Error};
use crate::group::{Group, GroupRegistry};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

const OCTET_STREAM: &str = "application/octet-stream";
const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4";

/// Shared state of the peer router
#[derive(Clone)]
pub struct PeerState {
    pub registry: Arc<GroupRegistry>,
    pub self_url: String,
    pub base_path: String,
}

/// Router serving `{base_path}/{group}/{key}`, `/health` and `/metrics`
pub fn create_router(state: PeerState) -> Router {
    let base_path = state.base_path.trim_end_matches('/').to_string();

    Router::new()
        .route(&format!("{}/*rest", base_path), get(serve_peer))
        .route(&format!("{}/", base_path), get(malformed_peer_path))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .fallback(not_found)
        .layer(middleware::from_fn(request_tracing_middleware))
        .with_state(state)
}

/// Router serving `GET /api?key=` for a single group
pub fn api_router(group: Arc<Group>) -> Router {
    Router::new()
        .route("/api", get(serve_api))
        .route("/health", get(api_health))
        .fallback(not_found)
        .layer(middleware::from_fn(request_tracing_middleware))
        .with_state(group)
}

/// `GET {base_path}/{group}/{key}` from another node
async fn serve_peer(State(state): State<PeerState>, uri: Uri) -> Response {
    // Work on the raw path: decoding first would turn an escaped '/' in a
    // key into a separator.
    let rest = uri
        .path()
        .strip_prefix(state.base_path.trim_end_matches('/'))
        .and_then(|p| p.strip_prefix('/'))
        .unwrap_or_default();

    let Some((group_name, key)) = rest.split_once('/') else {
        return malformed_peer_path().await.into_response();
    };

    let (group_name, key) = match (decode_key(group_name), decode_key(key)) {
        (Ok(group_name), Ok(key)) => (group_name, key),
        _ => return (StatusCode::BAD_REQUEST, "bad request: undecodable path").into_response(),
    };

    let Some(group) = state.registry.get(&group_name) else {
        debug!(group = %group_name, "request for unknown group");
        return StatusCode::NO_CONTENT.into_response();
    };
    group.record_server_request();

    match group.get(&key).await {
        Ok(value) => ([(header::CONTENT_TYPE, OCTET_STREAM)], value.bytes()).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn malformed_peer_path() -> impl IntoResponse {
    (StatusCode::BAD_REQUEST, "bad request: expected {group}/{key}")
}

#[derive(Debug, Deserialize)]
struct ApiQuery {
    #[serde(default)]
    key: String,
}

/// `GET /api?key=` from end users
async fn serve_api(State(group): State<Arc<Group>>, Query(query): Query<ApiQuery>) -> Response {
    match group.get(&query.key).await {
        Ok(value) => ([(header::CONTENT_TYPE, OCTET_STREAM)], value.bytes()).into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(e: Error) -> Response {
    (e.to_http_status(), e.to_string()).into_response()
}

async fn health(State(state): State<PeerState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "node": state.self_url,
        "groups": state.registry.names(),
        "version": crate::VERSION,
    }))
}

async fn api_health(State(group): State<Arc<Group>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "group": group.name(),
        "cached_keys": group.cache_len(),
    }))
}

async fn metrics(State(state): State<PeerState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_TEXT)],
        state.registry.to_prometheus(),
    )
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::DEFAULT_BASE_PATH;
    use crate::group::{GetterFn, GroupBuilder};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn scores() -> Group {
        GroupBuilder::new(
            "scores",
            GetterFn::new(|key: &str| match key {
                "Tom" => Ok(b"630".to_vec()),
                "a/b c" => Ok(b"slashed".to_vec()),
                _ => Err(anyhow::anyhow!("{} not exist", key)),
            }),
        )
        .cache_bytes(2 << 10)
        .build()
        .unwrap()
    }

    fn router() -> (Router, Arc<Group>) {
        let registry = Arc::new(GroupRegistry::new());
        let group = registry.register(scores()).unwrap();
        let router = create_router(PeerState {
            registry,
            self_url: "http://localhost:8001".into(),
            base_path: DEFAULT_BASE_PATH.into(),
        });
        (router, group)
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn test_peer_get_ok() {
        let (router, group) = router();
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/_cache/scores/Tom")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            OCTET_STREAM
        );
        assert!(response.headers().contains_key("x-request-id"));
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"630");
        assert_eq!(group.stats().server_requests, 1);
    }

    #[tokio::test]
    async fn test_peer_get_escaped_key() {
        let (router, _) = router();
        let (status, body) = get(router, "/_cache/scores/a%2Fb%20c").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "slashed");
    }

    #[tokio::test]
    async fn test_peer_unknown_group() {
        let (router, _) = router();
        let (status, _) = get(router, "/_cache/avatars/Tom").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_peer_loader_error() {
        let (router, _) = router();
        let (status, body) = get(router, "/_cache/scores/unknown").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "unknown not exist");
    }

    #[tokio::test]
    async fn test_peer_malformed_path() {
        let (router, _) = router();
        let (status, _) = get(router.clone(), "/_cache/scores").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = get(router, "/_cache/").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_peer_undecodable_key() {
        let (router, group) = router();
        let (status, _) = get(router, "/_cache/scores/%FF%FE").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(group.stats().gets, 0);
    }

    #[tokio::test]
    async fn test_outside_base_path() {
        let (router, _) = router();
        let (status, _) = get(router, "/other/scores/Tom").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let (router, group) = router();
        group.get("Tom").await.unwrap();

        let (status, body) = get(router.clone(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        let health: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(health["node"], "http://localhost:8001");
        assert_eq!(health["groups"][0], "scores");

        let (status, body) = get(router, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("peercache_local_loads_total{group=\"scores\"} 1"));
    }

    #[tokio::test]
    async fn test_api_endpoint() {
        let group = Arc::new(scores());
        let router = api_router(group);

        let (status, body) = get(router.clone(), "/api?key=Tom").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "630");

        let (status, _) = get(router.clone(), "/api?key=").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = get(router.clone(), "/api").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = get(router, "/api?key=Sam").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Sam not exist");
    }
}
