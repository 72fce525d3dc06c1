//! Admin operation surface ([AMBIENT-ADMIN]; spec §6's Admin API table).
//!
//! The admin HTTP router is out of scope (spec §1); this type is the
//! callable surface such a router would dispatch to, and is exercised
//! directly by this crate's own tests in lieu of that router. Grounded in
//! `turbomcp-proxy`'s `cli/commands/serve.rs`, which wires a single
//! top-level service object over the repository/registry rather than
//! scattering admin logic across route handlers.

use serde_json::Value;

use crate::diff::{self, Change};
use crate::error::{GuardianError, GuardianResult};
use crate::model::{Service, ServicePatch, Snapshot, SnapshotStatus};
use crate::registry::RouteRegistry;
use crate::repository::Repository;
use crate::snapshot as snapshotter;
use crate::upstream::UpstreamClient;

/// Callable admin operations bound to one repository/registry/upstream
/// client triple.
pub struct AdminService {
    repo: std::sync::Arc<dyn Repository>,
    registry: std::sync::Arc<RouteRegistry>,
    upstream: UpstreamClient,
    min_check_frequency: u32,
}

impl AdminService {
    pub fn new(
        repo: std::sync::Arc<dyn Repository>,
        registry: std::sync::Arc<RouteRegistry>,
        upstream: UpstreamClient,
        min_check_frequency: u32,
    ) -> Self {
        Self {
            repo,
            registry,
            upstream,
            min_check_frequency,
        }
    }

    /// Validate, snapshot, insert service + `user_approved` snapshot,
    /// reload registry (spec §6 Admin API: create service).
    pub async fn create_service(
        &self,
        name: &str,
        upstream_url: &str,
        enabled: bool,
        check_frequency_minutes: u32,
    ) -> GuardianResult<Service> {
        if !crate::model::is_valid_service_name(name) {
            return Err(GuardianError::validation(format!(
                "invalid service name: {name}"
            )));
        }
        if check_frequency_minutes > 0 && check_frequency_minutes < self.min_check_frequency {
            return Err(GuardianError::validation(format!(
                "check_frequency_minutes below floor of {}",
                self.min_check_frequency
            )));
        }

        let result = snapshotter::snapshot(&self.upstream, upstream_url).await?;
        let service = self
            .repo
            .create_service(name, upstream_url, enabled, check_frequency_minutes)
            .await?;
        self.repo
            .insert_snapshot(
                service.id,
                result.payload,
                result.hash,
                SnapshotStatus::UserApproved,
            )
            .await?;
        self.registry.reload(self.repo.as_ref()).await?;
        Ok(service)
    }

    /// Service rows with their latest snapshot status (spec §6: list
    /// services).
    pub async fn list_services(&self) -> GuardianResult<Vec<(Service, Option<SnapshotStatus>)>> {
        self.repo.list_services().await
    }

    /// Service plus its recent snapshots (spec §6: get service).
    pub async fn get_service(
        &self,
        name: &str,
        snapshot_limit: usize,
    ) -> GuardianResult<(Service, Vec<Snapshot>)> {
        let service = self.repo.get_service(name).await?;
        let snapshots = self.repo.list_snapshots(service.id, snapshot_limit).await?;
        Ok((service, snapshots))
    }

    /// Mutate service fields; reload registry. The caller, not this method,
    /// is responsible for re-snapshotting and re-approving after an
    /// `upstream_url` change (spec §4.E).
    pub async fn update_service(&self, name: &str, patch: ServicePatch) -> GuardianResult<Service> {
        if let Some(freq) = patch.check_frequency_minutes {
            if freq > 0 && freq < self.min_check_frequency {
                return Err(GuardianError::validation(format!(
                    "check_frequency_minutes below floor of {}",
                    self.min_check_frequency
                )));
            }
        }
        let service = self.repo.update_service(name, patch).await?;
        self.registry.reload(self.repo.as_ref()).await?;
        Ok(service)
    }

    /// Cascade-delete a service; reload registry (spec §6: delete service).
    pub async fn delete_service(&self, name: &str) -> GuardianResult<()> {
        self.repo.delete_service(name).await?;
        self.registry.reload(self.repo.as_ref()).await?;
        Ok(())
    }

    /// Most-recent-first snapshot history (spec §6: list snapshots).
    pub async fn list_snapshots(&self, name: &str, limit: usize) -> GuardianResult<Vec<Snapshot>> {
        let service = self.repo.get_service(name).await?;
        self.repo.list_snapshots(service.id, limit).await
    }

    /// Structural diff between the latest approved and latest overall
    /// snapshot (spec §4.D, §6: diff).
    pub async fn diff(&self, name: &str) -> GuardianResult<Vec<Change>> {
        let service = self.repo.get_service(name).await?;
        let approved = self.repo.latest_approved_snapshot(service.id).await?;
        let latest = self.repo.latest_snapshot(service.id).await?;
        let old: Value = approved.map(|s| s.payload).unwrap_or(Value::Null);
        let new: Value = latest.map(|s| s.payload).unwrap_or(Value::Null);
        Ok(diff::diff(&old, &new))
    }

    /// Approve the latest snapshot and re-enable the service; reload
    /// registry. Idempotent (spec §4.H, §8 property 7).
    pub async fn approve_latest(&self, name: &str) -> GuardianResult<Service> {
        let service = self.repo.approve_latest(name).await?;
        self.registry.reload(self.repo.as_ref()).await?;
        Ok(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn empty_lists_response(result: Value) -> Value {
        json!({"jsonrpc": "2.0", "id": 1, "result": result})
    }

    async fn echo_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .respond_with(move |req: &wiremock::Request| {
                let body: Value = serde_json::from_slice(&req.body).unwrap();
                match body["method"].as_str().unwrap() {
                    "initialize" => ResponseTemplate::new(200).set_body_json(empty_lists_response(json!({
                        "protocolVersion": "2024-11-05",
                        "capabilities": {},
                        "serverInfo": {"name": "demo", "version": "1.0"}
                    }))),
                    "tools/list" => ResponseTemplate::new(200).set_body_json(empty_lists_response(json!({
                        "tools": [{"name": "echo", "inputSchema": {"type": "object"}}]
                    }))),
                    "resources/list" => ResponseTemplate::new(200)
                        .set_body_json(empty_lists_response(json!({"resources": []}))),
                    "resources/templates/list" => ResponseTemplate::new(200).set_body_json(json!({
                        "jsonrpc": "2.0", "id": 1,
                        "error": {"code": -32601, "message": "Method not found"}
                    })),
                    "prompts/list" => ResponseTemplate::new(200)
                        .set_body_json(empty_lists_response(json!({"prompts": []}))),
                    other => panic!("unexpected method {other}"),
                }
            })
            .mount(&server)
            .await;
        server
    }

    fn build_admin(repo: std::sync::Arc<InMemoryRepository>) -> AdminService {
        let registry = std::sync::Arc::new(RouteRegistry::new());
        AdminService::new(repo, registry, UpstreamClient::default(), 5)
    }

    #[tokio::test]
    async fn create_service_snapshots_and_enables() {
        let server = echo_server().await;
        let repo = std::sync::Arc::new(InMemoryRepository::new());
        let admin = build_admin(repo.clone());

        let service = admin
            .create_service("svc1", &format!("{}/mcp", server.uri()), true, 5)
            .await
            .unwrap();
        assert!(service.enabled);

        let (_, snapshots) = admin.get_service("svc1", 10).await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].status, SnapshotStatus::UserApproved);
    }

    #[tokio::test]
    async fn update_rejects_frequency_below_floor() {
        let repo = std::sync::Arc::new(InMemoryRepository::new());
        repo.create_service("svc1", "http://localhost:1/mcp", true, 10)
            .await
            .unwrap();
        let admin = build_admin(repo);

        let err = admin
            .update_service(
                "svc1",
                ServicePatch {
                    check_frequency_minutes: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GuardianError::Validation(_)));
    }

    #[tokio::test]
    async fn diff_reports_new_tool() {
        let repo = std::sync::Arc::new(InMemoryRepository::new());
        let admin = build_admin(repo.clone());
        let service = repo
            .create_service("svc1", "http://localhost:1/mcp", true, 5)
            .await
            .unwrap();
        repo.insert_snapshot(
            service.id,
            json!({"tools": [{"name": "echo"}]}),
            "h1".into(),
            SnapshotStatus::UserApproved,
        )
        .await
        .unwrap();
        repo.record_drift(
            service.id,
            json!({"tools": [{"name": "echo"}, {"name": "ping"}]}),
            "h2".into(),
        )
        .await
        .unwrap();

        let changes = admin.diff("svc1").await.unwrap();
        assert!(!changes.is_empty());
    }

    #[tokio::test]
    async fn approve_latest_reenables_service() {
        let repo = std::sync::Arc::new(InMemoryRepository::new());
        let admin = build_admin(repo.clone());
        let service = repo
            .create_service("svc1", "http://localhost:1/mcp", true, 5)
            .await
            .unwrap();
        repo.record_drift(service.id, json!({"a": 1}), "h2".into())
            .await
            .unwrap();

        let updated = admin.approve_latest("svc1").await.unwrap();
        assert!(updated.enabled);
    }
}
