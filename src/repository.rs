//! Repository contract (spec §4.E) and an in-memory implementation.
//!
//! The durable store is an out-of-scope collaborator per spec §1 — this
//! module defines the contract such a store must satisfy and ships the one
//! implementation this crate needs to be runnable and testable on its own.
//! Mirrors the `Arc<RwLock<..>>` shared-state idiom used throughout
//! `turbomcp-proxy` (e.g. `proxy/router.rs`'s `CapabilityRouter`), swapped
//! to `parking_lot` for the synchronous in-memory map.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{GuardianError, GuardianResult};
use crate::model::{Service, ServiceId, ServicePatch, Snapshot, SnapshotId, SnapshotStatus};

/// Durable storage contract. One implementation (`InMemoryRepository`)
/// ships here; a SQL-backed implementation is the out-of-scope persistence
/// layer named in spec §1.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn create_service(
        &self,
        name: &str,
        upstream_url: &str,
        enabled: bool,
        check_frequency_minutes: u32,
    ) -> GuardianResult<Service>;

    async fn get_service(&self, name: &str) -> GuardianResult<Service>;

    /// All services with the status of their most recent snapshot, if any.
    async fn list_services(&self) -> GuardianResult<Vec<(Service, Option<SnapshotStatus>)>>;

    async fn update_service(&self, name: &str, patch: ServicePatch) -> GuardianResult<Service>;

    async fn delete_service(&self, name: &str) -> GuardianResult<()>;

    async fn insert_snapshot(
        &self,
        service_id: ServiceId,
        payload: Value,
        hash: String,
        status: SnapshotStatus,
    ) -> GuardianResult<Snapshot>;

    async fn latest_snapshot(&self, service_id: ServiceId) -> GuardianResult<Option<Snapshot>>;

    async fn latest_approved_snapshot(
        &self,
        service_id: ServiceId,
    ) -> GuardianResult<Option<Snapshot>>;

    async fn list_snapshots(
        &self,
        service_id: ServiceId,
        limit: usize,
    ) -> GuardianResult<Vec<Snapshot>>;

    async fn services_due_for_check(&self, now: DateTime<Utc>) -> GuardianResult<Vec<Service>>;

    /// Idempotent creation used by startup seeding: a no-op if `name`
    /// already exists.
    async fn upsert_service_from_config(
        &self,
        name: &str,
        upstream_url: &str,
        enabled: bool,
        check_frequency_minutes: u32,
    ) -> GuardianResult<Service>;

    /// Atomically insert an `unapproved` snapshot and disable the service.
    /// The single operation readers must never observe half-applied
    /// (spec §4.E, testable property 4).
    async fn record_drift(
        &self,
        service_id: ServiceId,
        payload: Value,
        hash: String,
    ) -> GuardianResult<Snapshot>;

    /// Insert a `system_approved` snapshot (no service mutation).
    async fn record_match(
        &self,
        service_id: ServiceId,
        payload: Value,
        hash: String,
    ) -> GuardianResult<Snapshot> {
        self.insert_snapshot(service_id, payload, hash, SnapshotStatus::SystemApproved)
            .await
    }

    /// Flip the latest snapshot's status to `user_approved` and re-enable
    /// the service. The one snapshot mutation the spec sanctions (testable
    /// property 3/7). A no-op if the latest snapshot is already approved.
    async fn approve_latest(&self, name: &str) -> GuardianResult<Service>;
}

#[derive(Clone)]
struct ServiceRow {
    service: Service,
    snapshots: Vec<Snapshot>,
}

struct State {
    by_name: HashMap<String, ServiceRow>,
}

/// In-memory `Repository`. Single `parking_lot::Mutex` around the whole
/// table: the spec's "single-writer serialization suffices" (§5) makes this
/// the simplest implementation that satisfies the atomicity invariants,
/// matching the "simple POC design is sequential overall" language in §4.H.
pub struct InMemoryRepository {
    state: Mutex<State>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                by_name: HashMap::new(),
            }),
        }
    }
}

fn not_found(name: &str) -> GuardianError {
    GuardianError::not_found(format!("no such service: {name}"))
}

/// "Most recent by created_at, ties broken by insertion order" (spec §3):
/// since snapshots are only ever appended, the last matching element in
/// insertion order is always the correct answer.
fn last_matching<'a>(
    snapshots: &'a [Snapshot],
    pred: impl Fn(&Snapshot) -> bool,
) -> Option<&'a Snapshot> {
    snapshots.iter().rev().find(|s| pred(s))
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn create_service(
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
        let mut state = self.state.lock();
        if state.by_name.contains_key(name) {
            return Err(GuardianError::validation(format!(
                "service name already exists: {name}"
            )));
        }
        let now = Utc::now();
        let service = Service {
            id: Uuid::new_v4(),
            name: name.to_string(),
            upstream_url: upstream_url.to_string(),
            enabled,
            check_frequency_minutes,
            created_at: now,
            updated_at: now,
        };
        state.by_name.insert(
            name.to_string(),
            ServiceRow {
                service: service.clone(),
                snapshots: Vec::new(),
            },
        );
        Ok(service)
    }

    async fn get_service(&self, name: &str) -> GuardianResult<Service> {
        let state = self.state.lock();
        state
            .by_name
            .get(name)
            .map(|row| row.service.clone())
            .ok_or_else(|| not_found(name))
    }

    async fn list_services(&self) -> GuardianResult<Vec<(Service, Option<SnapshotStatus>)>> {
        let state = self.state.lock();
        Ok(state
            .by_name
            .values()
            .map(|row| (row.service.clone(), row.snapshots.last().map(|s| s.status)))
            .collect())
    }

    async fn update_service(&self, name: &str, patch: ServicePatch) -> GuardianResult<Service> {
        let mut state = self.state.lock();
        let row = state.by_name.get_mut(name).ok_or_else(|| not_found(name))?;
        if let Some(url) = patch.upstream_url {
            row.service.upstream_url = url;
        }
        if let Some(enabled) = patch.enabled {
            row.service.enabled = enabled;
        }
        if let Some(freq) = patch.check_frequency_minutes {
            row.service.check_frequency_minutes = freq;
        }
        row.service.updated_at = Utc::now();
        Ok(row.service.clone())
    }

    async fn delete_service(&self, name: &str) -> GuardianResult<()> {
        let mut state = self.state.lock();
        state
            .by_name
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }

    async fn insert_snapshot(
        &self,
        service_id: ServiceId,
        payload: Value,
        hash: String,
        status: SnapshotStatus,
    ) -> GuardianResult<Snapshot> {
        let mut state = self.state.lock();
        let row = find_row_by_id_mut(&mut state, service_id)?;
        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            service_id,
            payload,
            hash,
            status,
            created_at: Utc::now(),
        };
        row.snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn latest_snapshot(&self, service_id: ServiceId) -> GuardianResult<Option<Snapshot>> {
        let state = self.state.lock();
        let row = find_row_by_id(&state, service_id)?;
        Ok(row.snapshots.last().cloned())
    }

    async fn latest_approved_snapshot(
        &self,
        service_id: ServiceId,
    ) -> GuardianResult<Option<Snapshot>> {
        let state = self.state.lock();
        let row = find_row_by_id(&state, service_id)?;
        Ok(last_matching(&row.snapshots, |s| s.status.is_approved()).cloned())
    }

    async fn list_snapshots(
        &self,
        service_id: ServiceId,
        limit: usize,
    ) -> GuardianResult<Vec<Snapshot>> {
        let state = self.state.lock();
        let row = find_row_by_id(&state, service_id)?;
        Ok(row.snapshots.iter().rev().take(limit).cloned().collect())
    }

    async fn services_due_for_check(&self, now: DateTime<Utc>) -> GuardianResult<Vec<Service>> {
        let state = self.state.lock();
        Ok(state
            .by_name
            .values()
            .filter(|row| row.service.enabled && row.service.check_frequency_minutes > 0)
            .filter(|row| {
                let deadline = now
                    - ChronoDuration::minutes(row.service.check_frequency_minutes as i64);
                match row.snapshots.last() {
                    None => true,
                    Some(last) => last.created_at < deadline,
                }
            })
            .map(|row| row.service.clone())
            .collect())
    }

    async fn upsert_service_from_config(
        &self,
        name: &str,
        upstream_url: &str,
        enabled: bool,
        check_frequency_minutes: u32,
    ) -> GuardianResult<Service> {
        let mut state = self.state.lock();
        if let Some(row) = state.by_name.get(name) {
            return Ok(row.service.clone());
        }
        let now = Utc::now();
        let service = Service {
            id: Uuid::new_v4(),
            name: name.to_string(),
            upstream_url: upstream_url.to_string(),
            enabled,
            check_frequency_minutes,
            created_at: now,
            updated_at: now,
        };
        state.by_name.insert(
            name.to_string(),
            ServiceRow {
                service: service.clone(),
                snapshots: Vec::new(),
            },
        );
        Ok(service)
    }

    async fn record_drift(
        &self,
        service_id: ServiceId,
        payload: Value,
        hash: String,
    ) -> GuardianResult<Snapshot> {
        let mut state = self.state.lock();
        let row = find_row_by_id_mut(&mut state, service_id)?;
        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            service_id,
            payload,
            hash,
            status: SnapshotStatus::Unapproved,
            created_at: Utc::now(),
        };
        row.snapshots.push(snapshot.clone());
        row.service.enabled = false;
        row.service.updated_at = snapshot.created_at;
        Ok(snapshot)
    }

    async fn approve_latest(&self, name: &str) -> GuardianResult<Service> {
        let mut state = self.state.lock();
        let row = state.by_name.get_mut(name).ok_or_else(|| not_found(name))?;
        if let Some(last) = row.snapshots.last_mut() {
            if last.status == SnapshotStatus::Unapproved {
                last.status = SnapshotStatus::UserApproved;
            }
        }
        row.service.enabled = true;
        row.service.updated_at = Utc::now();
        Ok(row.service.clone())
    }
}

fn find_row_by_id(state: &State, service_id: ServiceId) -> GuardianResult<&ServiceRow> {
    state
        .by_name
        .values()
        .find(|row| row.service.id == service_id)
        .ok_or_else(|| GuardianError::not_found(format!("no such service id: {service_id}")))
}

fn find_row_by_id_mut(
    state: &mut State,
    service_id: ServiceId,
) -> GuardianResult<&mut ServiceRow> {
    state
        .by_name
        .values_mut()
        .find(|row| row.service.id == service_id)
        .ok_or_else(|| GuardianError::not_found(format!("no such service id: {service_id}")))
}
