//! Background schedulers (spec §4.H): the route poller and the check
//! scheduler, two cooperating long-lived loops started at boot and
//! cancelled together at shutdown.
//!
//! Grounded in `turbomcp-proxy/src/cli/commands/serve.rs`'s pattern of
//! spawning long-lived `tokio::task`s tied to a shared cancellation token
//! rather than request-scoped helpers (spec §9: "cooperative background
//! loops vs. request-scoped helpers").

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::model::SnapshotStatus;
use crate::registry::RouteRegistry;
use crate::repository::Repository;
use crate::snapshot as snapshotter;
use crate::upstream::UpstreamClient;

/// Reload the route registry from the repository on every tick.
/// Idempotent; exists so externally-made changes (e.g. by another admin
/// worker) eventually propagate (spec §4.H).
pub async fn run_route_poller(
    repo: Arc<dyn Repository>,
    registry: Arc<RouteRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("route poller shutting down");
                return;
            }
            _ = ticker.tick() => {
                if let Err(e) = registry.reload(repo.as_ref()).await {
                    error!(error = %e, "route poller: reload failed");
                }
            }
        }
    }
}

/// For each service due for a check: snapshot, compare against the last
/// approved hash, and either record a match or disable the service on
/// drift. Reload the registry once per tick if any service was disabled
/// (spec §4.H).
pub async fn run_check_scheduler(
    repo: Arc<dyn Repository>,
    registry: Arc<RouteRegistry>,
    upstream: UpstreamClient,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("check scheduler shutting down");
                return;
            }
            _ = ticker.tick() => {
                run_tick(repo.as_ref(), &registry, &upstream).await;
            }
        }
    }
}

/// Run exactly one check-scheduler tick against `repo`/`registry`. Exposed
/// so integration tests (and any caller wanting a manual "check now" action)
/// can drive the same logic `run_check_scheduler` loops on, without waiting
/// out a real interval.
pub async fn run_once(repo: &dyn Repository, registry: &RouteRegistry, upstream: &UpstreamClient) {
    run_tick(repo, registry, upstream).await;
}

async fn run_tick(repo: &dyn Repository, registry: &RouteRegistry, upstream: &UpstreamClient) {
    let due = match repo.services_due_for_check(Utc::now()).await {
        Ok(due) => due,
        Err(e) => {
            error!(error = %e, "check scheduler: failed to list due services");
            return;
        }
    };

    let span = info_span!("check_tick", due_count = due.len());
    async {
        let mut any_disabled = false;

        for service in due {
            let result = snapshotter::snapshot(upstream, &service.upstream_url).await;
            let snapshot = match result {
                Ok(s) => s,
                Err(e) => {
                    warn!(service = %service.name, error = %e, "snapshot failed, skipping this tick");
                    continue;
                }
            };

            let last_approved = match repo.latest_approved_snapshot(service.id).await {
                Ok(s) => s,
                Err(e) => {
                    error!(service = %service.name, error = %e, "storage error reading last approved snapshot");
                    continue;
                }
            };

            let matches = last_approved
                .as_ref()
                .map(|last| last.hash == snapshot.hash)
                .unwrap_or(false);

            let outcome = if matches {
                repo.record_match(service.id, snapshot.payload, snapshot.hash)
                    .await
                    .map(|_| false)
            } else {
                repo.record_drift(service.id, snapshot.payload, snapshot.hash)
                    .await
                    .map(|_| true)
            };

            match outcome {
                Ok(disabled) => {
                    if disabled {
                        warn!(service = %service.name, "drift detected, service disabled pending review");
                        any_disabled = true;
                    } else {
                        info!(service = %service.name, "capability surface unchanged");
                    }
                }
                Err(e) => error!(service = %service.name, error = %e, "storage error recording snapshot"),
            }
        }

        if any_disabled {
            if let Err(e) = registry.reload(repo).await {
                error!(error = %e, "check scheduler: reload after disable failed");
            }
        }
    }
    .instrument(span)
    .await;
}
