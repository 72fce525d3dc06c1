//! Thin JSON-RPC client for MCP over Streamable HTTP (spec §4.B).
//!
//! Grounded in `turbomcp-proxy`'s `HttpBackend`
//! (`crates/turbomcp-proxy/src/proxy/backends/http.rs` in the teacher
//! repo): a `reqwest::Client` with pooling and a fixed client identity,
//! issuing hand-rolled JSON-RPC 2.0 envelopes rather than pulling in the
//! full `turbomcp-protocol`/`turbomcp-client` type stack, which models far
//! more of MCP (sampling, elicitation, tasks...) than this proxy ever
//! inspects.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{GuardianError, GuardianResult};

/// MCP protocol version this proxy claims on `initialize`.
pub const CLIENT_PROTOCOL_VERSION: &str = "2025-06-18";

/// Client identity advertised on `initialize`.
pub const CLIENT_NAME: &str = "mcp-guardian";
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Headers that both directions of the proxy must forward unmodified.
pub const FORWARD_HEADERS: &[&str] = &[
    "mcp-protocol-version",
    "mcp-session-id",
    "last-event-id",
    "accept",
    "content-type",
    "authorization",
];

/// Hop-by-hop headers that must never be forwarded in either direction.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "upgrade",
];

/// Whether `name` is a hop-by-hop header that must never be forwarded.
pub fn is_hop_by_hop(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    HOP_BY_HOP_HEADERS.contains(&lower.as_str()) || lower.starts_with("proxy-")
}

/// Filter a header map for forwarding in either direction: drop hop-by-hop
/// headers, pass everything else through untouched (including, but not
/// limited to, the headers named in [`FORWARD_HEADERS`]).
pub fn filter_forward_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name.as_str()) {
            out.insert(name.clone(), value.clone());
        }
    }
    out
}

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: i64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorBody>,
}

#[derive(Deserialize)]
struct JsonRpcErrorBody {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Result of a successful `initialize` call.
#[derive(Debug, Clone)]
pub struct InitResult {
    pub protocol_version: String,
    pub capabilities: Value,
    pub server_info: Value,
}

/// Either a buffered JSON body or a raw streaming body, depending on the
/// upstream's `Content-Type`.
pub enum UpstreamResponse {
    Json {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
    Stream {
        status: StatusCode,
        headers: HeaderMap,
        body: reqwest::Response,
    },
}

/// JSON-RPC client bound to one upstream MCP server.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    next_id: std::sync::Arc<AtomicI64>,
    first_byte_timeout: Duration,
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl UpstreamClient {
    /// Build a client with the given first-byte request deadline. Per spec
    /// §4.G/§5, this deadline governs only waiting for the first response
    /// byte; once a response (including an SSE stream) starts, no further
    /// deadline is enforced by this client. Applied per-request on the
    /// buffered JSON-RPC `call()` path (`initialize`/`list`), which always
    /// awaits a complete response body; `forward_request` and `open_sse`
    /// never set it, since a proxied SSE read must be allowed to outlive it.
    pub fn new(first_byte_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(first_byte_timeout)
            .pool_max_idle_per_host(10)
            .build()
            .expect("reqwest client with sane defaults always builds");
        Self {
            http,
            next_id: std::sync::Arc::new(AtomicI64::new(1)),
            first_byte_timeout,
        }
    }

    fn next_message_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn call(&self, url: &str, method: &str, params: Option<Value>) -> GuardianResult<Value> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_message_id(),
            method,
            params,
        };

        let response = self
            .http
            .post(url)
            .timeout(self.first_byte_timeout)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GuardianError::UpstreamTimeout(self.first_byte_timeout)
                } else {
                    GuardianError::from(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GuardianError::UpstreamProtocolError(format!(
                "HTTP {status} calling {method}: {body}"
            )));
        }

        let parsed: JsonRpcResponse = response.json().await?;
        match (parsed.result, parsed.error) {
            (Some(result), None) => Ok(result),
            (None, Some(err)) => Err(GuardianError::JsonRpcError {
                code: err.code,
                message: err.message,
                data: err.data,
            }),
            _ => Err(GuardianError::UpstreamProtocolError(format!(
                "malformed JSON-RPC response for {method}: neither result nor error present"
            ))),
        }
    }

    /// `initialize` — fixed client identity, required for every snapshot.
    pub async fn initialize(&self, url: &str) -> GuardianResult<InitResult> {
        let params = json!({
            "protocolVersion": CLIENT_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": CLIENT_NAME, "version": CLIENT_VERSION },
        });
        let result = self.call(url, "initialize", Some(params)).await?;

        let protocol_version = result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(CLIENT_PROTOCOL_VERSION)
            .to_string();
        let capabilities = result.get("capabilities").cloned().unwrap_or(json!({}));
        let server_info = result.get("serverInfo").cloned().unwrap_or(json!({}));

        Ok(InitResult {
            protocol_version,
            capabilities,
            server_info,
        })
    }

    /// Exhaust a paginated `*/list` method, following `nextCursor` until
    /// absent. A JSON-RPC "method not found" (-32601) is surfaced as an
    /// error so callers (the snapshotter) can decide whether that method is
    /// optional.
    pub async fn list(&self, url: &str, method: &str) -> GuardianResult<Vec<Value>> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor
                .as_ref()
                .map(|c| json!({ "cursor": c }))
                .or(Some(json!({})));
            let result = self.call(url, method, params).await?;

            let key = list_result_key(method);
            let page = result
                .get(key)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            items.extend(page);

            cursor = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            if cursor.is_none() {
                break;
            }
        }

        Ok(items)
    }

    /// Raw byte passthrough of a client request to the upstream, per
    /// spec §4.G step 2-4. The response is either buffered (JSON) or
    /// returned as a live stream (SSE), decided by the upstream's
    /// `Content-Type`; SSE bytes are never parsed or re-encoded here, so
    /// frame boundaries (including `id:` lines) survive untouched.
    pub async fn forward_request(
        &self,
        url: &str,
        method: Method,
        headers: HeaderMap,
        body: Bytes,
    ) -> GuardianResult<UpstreamResponse> {
        let mut req = self.http.request(method, url);
        for (name, value) in &headers {
            req = req.header(name, value);
        }
        if !body.is_empty() {
            req = req.body(body);
        }

        let response = req.send().await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_string();

        if content_type.starts_with("text/event-stream") {
            let headers = response.headers().clone();
            Ok(UpstreamResponse::Stream {
                status,
                headers,
                body: response,
            })
        } else {
            let headers = response.headers().clone();
            let body = response.bytes().await?;
            Ok(UpstreamResponse::Json {
                status,
                headers,
                body,
            })
        }
    }

    /// GET-initiated server-push SSE stream (spec §4.B `open_sse`).
    pub async fn open_sse(&self, url: &str, headers: HeaderMap) -> GuardianResult<reqwest::Response> {
        let mut req = self.http.get(url);
        for (name, value) in &headers {
            req = req.header(name, value);
        }
        Ok(req.send().await?)
    }
}

fn list_result_key(method: &str) -> &'static str {
    match method {
        "tools/list" => "tools",
        "resources/list" => "resources",
        "resources/templates/list" => "resourceTemplates",
        "prompts/list" => "prompts",
        _ => "items",
    }
}
