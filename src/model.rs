//! Core data model: [`Service`], [`Snapshot`], and the derived [`RouteEntry`].
//!
//! See spec §3 for the field-level invariants; this module is just the
//! shapes, `Repository` (repository.rs) and `RouteRegistry` (registry.rs)
//! own the behavior.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque identifier for a registered service.
pub type ServiceId = Uuid;

/// Opaque identifier for a stored snapshot.
pub type SnapshotId = Uuid;

/// A registered upstream MCP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    pub upstream_url: String,
    pub enabled: bool,
    pub check_frequency_minutes: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The approval state of a stored snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    /// Set only by explicit admin action (create, or "approve latest").
    UserApproved,
    /// Set only by the scheduler when a new hash matches the last approved
    /// hash.
    SystemApproved,
    /// Set by the scheduler on a hash mismatch.
    Unapproved,
}

impl SnapshotStatus {
    /// Whether this status counts toward the service's "last approved hash".
    pub fn is_approved(self) -> bool {
        matches!(self, Self::UserApproved | Self::SystemApproved)
    }
}

/// A stored observation of an upstream's capability surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub service_id: ServiceId,
    pub payload: Value,
    pub hash: String,
    pub status: SnapshotStatus,
    pub created_at: DateTime<Utc>,
}

/// Derived, ephemeral route registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub upstream_url: String,
    pub enabled: bool,
}

/// Fields an admin caller may change on an existing service.
///
/// `upstream_url` changes are accepted here but, per spec §4.E, the admin
/// caller is expected to re-snapshot and re-approve afterward; this patch
/// does not do that implicitly.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServicePatch {
    pub upstream_url: Option<String>,
    pub enabled: Option<bool>,
    pub check_frequency_minutes: Option<u32>,
}

/// Name validation per spec §3: `[A-Za-z0-9_-]+`, length 1-64.
pub fn is_valid_service_name(name: &str) -> bool {
    (1..=64).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
