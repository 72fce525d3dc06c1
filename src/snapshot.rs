//! Capability-surface snapshotter (spec §4.C).
//!
//! Orchestrates one full probe of an upstream — `initialize` then the four
//! `*/list` methods — and reduces the result to the normalized, fixed-key
//! object the canonicalizer hashes. Grounded in the sequencing
//! `turbomcp-proxy`'s `HttpBackend::health_check`/capability-discovery path
//! uses to call `initialize` before anything else.

use serde_json::{json, Map, Value};

use crate::canonical::fingerprint;
use crate::error::{GuardianError, GuardianResult};
use crate::upstream::UpstreamClient;

// Listed items (tools, resources, templates, prompts) are hashed as-is.
// Unknown keys upstream adds to an item are retained verbatim rather than
// pruned to a known schema, so those additions still flip the fingerprint.

/// Fields dropped from `serverInfo` because they fluctuate without a
/// semantic change to the capability surface.
const VOLATILE_SERVER_INFO_FIELDS: &[&str] = &["build", "buildTime", "uptime", "instructions"];

/// The result of one successful snapshot attempt: the normalized payload
/// (stored verbatim, so diffs stay reproducible) and its hash.
pub struct SnapshotResult {
    pub payload: Value,
    pub hash: String,
}

/// Probe `upstream_url` and reduce its capability surface to a normalized,
/// hashed payload. Any failure at any step (including `initialize`) fails
/// the whole attempt — no partial snapshot is ever produced, matching the
/// Repository contract that snapshots are append-only, whole rows.
pub async fn snapshot(client: &UpstreamClient, upstream_url: &str) -> GuardianResult<SnapshotResult> {
    let init = client.initialize(upstream_url).await?;

    let tools = client.list(upstream_url, "tools/list").await?;
    let resources = client.list(upstream_url, "resources/list").await?;
    let resource_templates = match client.list(upstream_url, "resources/templates/list").await {
        Ok(items) => items,
        Err(GuardianError::JsonRpcError { code, .. }) if code == -32601 => Vec::new(),
        Err(e) => return Err(e),
    };
    let prompts = client.list(upstream_url, "prompts/list").await?;

    let tools = sort_and_check(tools, "name", "tools")?;
    let resources = sort_and_check(resources, "uri", "resources")?;
    let resource_templates = sort_and_check(resource_templates, "uriTemplate", "resourceTemplates")?;
    let prompts = sort_and_check(prompts, "name", "prompts")?;

    let server_info = strip_fields(&init.server_info, VOLATILE_SERVER_INFO_FIELDS);

    let mut payload = Map::new();
    payload.insert("protocolVersion".into(), json!(init.protocol_version));
    payload.insert("capabilities".into(), init.capabilities);
    payload.insert("serverInfo".into(), server_info);
    payload.insert("tools".into(), json!(tools));
    payload.insert("resources".into(), json!(resources));
    payload.insert("resource_templates".into(), json!(resource_templates));
    payload.insert("prompts".into(), json!(prompts));

    let payload = Value::Object(payload);
    let hash = fingerprint(&payload)?;

    Ok(SnapshotResult { payload, hash })
}

/// Sort `items` ascending by the string field `key`, rejecting the listing
/// as `SnapshotAmbiguous` if two items share a key value (spec §4.C: "ties
/// in the sort key cause SnapshotAmbiguous").
fn sort_and_check(mut items: Vec<Value>, key: &str, listing: &str) -> GuardianResult<Vec<Value>> {
    items.sort_by(|a, b| sort_key(a, key).cmp(&sort_key(b, key)));
    for pair in items.windows(2) {
        let a = sort_key(&pair[0], key);
        let b = sort_key(&pair[1], key);
        if !a.is_empty() && a == b {
            return Err(GuardianError::SnapshotAmbiguous(format!(
                "{listing}: duplicate {key} {a:?}"
            )));
        }
    }
    Ok(items)
}

fn sort_key(item: &Value, key: &str) -> String {
    item.get(key).and_then(Value::as_str).unwrap_or("").to_string()
}

fn strip_fields(value: &Value, fields: &[&str]) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                if !fields.contains(&k.as_str()) {
                    out.insert(k.clone(), v.clone());
                }
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn init_response() -> Value {
        json!({
            "jsonrpc": "2.0", "id": 1,
            "result": {
                "protocolVersion": "2025-06-18",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "demo", "version": "1.0", "build": "abc123", "uptime": 42}
            }
        })
    }

    #[tokio::test]
    async fn snapshot_strips_volatile_server_info_and_sorts_tools() {
        let server = MockServer::start().await;
        let url = format!("{}/mcp", server.uri());

        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(move |req: &wiremock::Request| {
                let body: Value = serde_json::from_slice(&req.body).unwrap();
                match body["method"].as_str().unwrap() {
                    "initialize" => ResponseTemplate::new(200).set_body_json(init_response()),
                    "tools/list" => ResponseTemplate::new(200).set_body_json(json!({
                        "jsonrpc": "2.0", "id": 2,
                        "result": {"tools": [{"name": "zeta"}, {"name": "alpha"}]}
                    })),
                    "resources/list" => ResponseTemplate::new(200).set_body_json(json!({
                        "jsonrpc": "2.0", "id": 3, "result": {"resources": []}
                    })),
                    "resources/templates/list" => ResponseTemplate::new(200).set_body_json(json!({
                        "jsonrpc": "2.0", "id": 4,
                        "error": {"code": -32601, "message": "Method not found"}
                    })),
                    "prompts/list" => ResponseTemplate::new(200).set_body_json(json!({
                        "jsonrpc": "2.0", "id": 5, "result": {"prompts": []}
                    })),
                    other => panic!("unexpected method {other}"),
                }
            })
            .mount(&server)
            .await;

        let client = UpstreamClient::default();
        let result = snapshot(&client, &url).await.unwrap();

        let tools = result.payload.get("tools").unwrap().as_array().unwrap();
        assert_eq!(tools[0]["name"], "alpha");
        assert_eq!(tools[1]["name"], "zeta");

        let server_info = result.payload.get("serverInfo").unwrap();
        assert!(server_info.get("build").is_none());
        assert!(server_info.get("uptime").is_none());
        assert_eq!(server_info.get("name").unwrap(), "demo");

        assert_eq!(result.payload.get("resource_templates").unwrap(), &json!([]));
        assert!(!result.hash.is_empty());
    }

    #[tokio::test]
    async fn duplicate_tool_names_are_ambiguous() {
        let server = MockServer::start().await;
        let url = format!("{}/mcp", server.uri());

        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(move |req: &wiremock::Request| {
                let body: Value = serde_json::from_slice(&req.body).unwrap();
                match body["method"].as_str().unwrap() {
                    "initialize" => ResponseTemplate::new(200).set_body_json(init_response()),
                    "tools/list" => ResponseTemplate::new(200).set_body_json(json!({
                        "jsonrpc": "2.0", "id": 2,
                        "result": {"tools": [{"name": "dup"}, {"name": "dup"}]}
                    })),
                    "resources/list" | "prompts/list" => {
                        ResponseTemplate::new(200).set_body_json(json!({
                            "jsonrpc": "2.0", "id": 3, "result": {}
                        }))
                    }
                    "resources/templates/list" => ResponseTemplate::new(200).set_body_json(json!({
                        "jsonrpc": "2.0", "id": 4, "result": {}
                    })),
                    other => panic!("unexpected method {other}"),
                }
            })
            .mount(&server)
            .await;

        let client = UpstreamClient::default();
        let err = snapshot(&client, &url).await.unwrap_err();
        assert!(matches!(err, GuardianError::SnapshotAmbiguous(_)));
    }

    #[tokio::test]
    async fn initialize_failure_fails_whole_snapshot() {
        let server = MockServer::start().await;
        let url = format!("{}/mcp", server.uri());

        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = UpstreamClient::default();
        let err = snapshot(&client, &url).await.unwrap_err();
        assert!(matches!(err, GuardianError::UpstreamProtocolError(_)));
    }
}
