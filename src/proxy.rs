//! Proxy engine (spec §4.G): the axum handler dispatching
//! `/{service_name}/mcp` to the registered upstream.
//!
//! Grounded in `turbomcp-proxy`'s `proxy/backends/http.rs` for the
//! request/response bridging shape, generalized here to a single wildcard
//! route consulting the in-memory registry instead of per-route handler
//! registration (spec §9: "dynamic route surgery avoided").

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap as AxumHeaderMap, Method as AxumMethod, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{HeaderMap, Method};
use serde_json::json;

use crate::error::GuardianError;
use crate::registry::RouteRegistry;
use crate::upstream::{filter_forward_headers, UpstreamClient, UpstreamResponse};

/// Shared state the proxy handler dispatches against.
#[derive(Clone)]
pub struct ProxyState {
    pub registry: std::sync::Arc<RouteRegistry>,
    pub upstream: UpstreamClient,
}

/// `POST | GET | DELETE /{service_name}/mcp`.
pub async fn handle(
    State(state): State<ProxyState>,
    Path(service_name): Path<String>,
    method: AxumMethod,
    headers: AxumHeaderMap,
    body: Bytes,
) -> Response {
    let entry = match state.registry.lookup(&service_name) {
        None => {
            return error_response(
                StatusCode::NOT_FOUND,
                "Service not configured",
            )
        }
        Some(entry) if !entry.enabled => {
            return error_response(
                StatusCode::FORBIDDEN,
                "Service disabled pending review",
            )
        }
        Some(entry) => entry,
    };

    let forward_headers = axum_headers_to_http(&headers);
    let filtered = filter_forward_headers(&forward_headers);
    let upstream_method = axum_method_to_http(&method);

    let result = state
        .upstream
        .forward_request(&entry.upstream_url, upstream_method, filtered, body)
        .await;

    match result {
        Ok(UpstreamResponse::Json { status, headers, body }) => {
            let mut response = Response::builder().status(status.as_u16());
            for (name, value) in headers.iter() {
                if !crate::upstream::is_hop_by_hop(name.as_str()) {
                    response = response.header(name.as_str(), value.as_bytes());
                }
            }
            response.body(Body::from(body)).unwrap().into_response()
        }
        Ok(UpstreamResponse::Stream { status, headers, body }) => {
            let mut response = Response::builder().status(status.as_u16());
            for (name, value) in headers.iter() {
                if !crate::upstream::is_hop_by_hop(name.as_str()) {
                    response = response.header(name.as_str(), value.as_bytes());
                }
            }
            let stream = body.bytes_stream();
            response.body(Body::from_stream(stream)).unwrap().into_response()
        }
        Err(GuardianError::UpstreamTimeout(_)) => {
            error_response(StatusCode::GATEWAY_TIMEOUT, "Upstream timed out")
        }
        Err(GuardianError::UpstreamUnreachable(_)) => {
            error_response(StatusCode::BAD_GATEWAY, "Upstream unreachable")
        }
        Err(other) => error_response(StatusCode::BAD_GATEWAY, &other.to_string()),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(json!({ "error": message }))).into_response()
}

fn axum_headers_to_http(headers: &AxumHeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        out.insert(name.clone(), value.clone());
    }
    out
}

fn axum_method_to_http(method: &AxumMethod) -> Method {
    Method::from_bytes(method.as_str().as_bytes()).unwrap_or(Method::GET)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::any;
    use axum::Router;
    use serde_json::json;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn router(state: ProxyState) -> Router {
        Router::new()
            .route("/{service_name}/mcp", any(handle))
            .with_state(state)
    }

    #[tokio::test]
    async fn unknown_service_is_404() {
        let state = ProxyState {
            registry: std::sync::Arc::new(RouteRegistry::new()),
            upstream: UpstreamClient::default(),
        };
        let response = router(state)
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/unknown/mcp")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn disabled_service_is_403() {
        let registry = std::sync::Arc::new(RouteRegistry::new());
        let repo = crate::repository::InMemoryRepository::new();
        repo.create_service("svc1", "http://localhost:1/mcp", false, 5)
            .await
            .unwrap();
        registry.reload(&repo).await.unwrap();

        let state = ProxyState {
            registry,
            upstream: UpstreamClient::default(),
        };
        let response = router(state)
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/svc1/mcp")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn enabled_service_proxies_json_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": {}}))
                    .insert_header("Mcp-Session-Id", "abc123"),
            )
            .mount(&server)
            .await;

        let registry = std::sync::Arc::new(RouteRegistry::new());
        let repo = crate::repository::InMemoryRepository::new();
        repo.create_service("svc1", &format!("{}/mcp", server.uri()), true, 5)
            .await
            .unwrap();
        registry.reload(&repo).await.unwrap();

        let state = ProxyState {
            registry,
            upstream: UpstreamClient::default(),
        };
        let response = router(state)
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/svc1/mcp")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("mcp-session-id").unwrap(),
            "abc123"
        );
    }
}
