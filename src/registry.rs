//! Route registry (spec §4.F): the process-wide, read-optimized map the
//! proxy engine consults on every inbound request.
//!
//! Grounded in the teacher's root `Cargo.toml`, which pins `arc-swap` for
//! exactly this single-writer/many-reader hot-swap shape. `reload` builds a
//! whole new map and swaps it in atomically; readers never observe a
//! partially-built map and never block a writer.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::GuardianResult;
use crate::model::RouteEntry;
use crate::repository::Repository;

/// Wait-free-read map from service name to its current route entry.
pub struct RouteRegistry {
    table: ArcSwap<HashMap<String, RouteEntry>>,
}

impl Default for RouteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Look up a service by name. Wait-free in the common path: a single
    /// atomic load of the current map `Arc`, no locking.
    pub fn lookup(&self, name: &str) -> Option<RouteEntry> {
        self.table.load().get(name).cloned()
    }

    /// Rebuild the entire map from the repository and swap it in atomically.
    /// Proxy handlers consult the registry exactly once per request at
    /// dispatch time (spec §4.F contract); an in-flight SSE stream is
    /// unaffected by a reload that disables its service.
    pub async fn reload(&self, repo: &dyn Repository) -> GuardianResult<()> {
        let services = repo.list_services().await?;
        let mut table = HashMap::with_capacity(services.len());
        for (service, _status) in services {
            table.insert(
                service.name,
                RouteEntry {
                    upstream_url: service.upstream_url,
                    enabled: service.enabled,
                },
            );
        }
        self.table.store(Arc::new(table));
        Ok(())
    }
}
