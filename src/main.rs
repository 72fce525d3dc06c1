//! MCP Guardian entry point: loads configuration, seeds services, spawns
//! the two background schedulers, and serves the proxy surface.
//!
//! Grounded in `turbomcp-proxy`'s `main.rs`/`cli/commands/serve.rs`: parse
//! CLI args, init tracing, build the long-lived collaborators, spawn
//! background workers against a shared cancellation token, serve until
//! Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::any;
use axum::Router;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mcp_guardian::admin::AdminService;
use mcp_guardian::config::Config;
use mcp_guardian::proxy::{self, ProxyState};
use mcp_guardian::registry::RouteRegistry;
use mcp_guardian::repository::{InMemoryRepository, Repository};
use mcp_guardian::scheduler::{run_check_scheduler, run_route_poller};
use mcp_guardian::upstream::UpstreamClient;

#[derive(Parser, Debug)]
#[command(name = "mcp-guardian", about = "Validating reverse proxy for MCP servers")]
struct Cli {
    /// Path to a YAML configuration file.
    #[arg(long, env = "MCP_GUARDIAN_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load(cli.config.as_deref())?;

    if config.admin.password.is_none() {
        info!(password = %config.resolve_admin_password(), "generated admin password");
    }

    let repo: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
    let registry = Arc::new(RouteRegistry::new());
    let upstream = UpstreamClient::new(Duration::from_secs(30));

    for seed in &config.services {
        repo.upsert_service_from_config(
            &seed.name,
            &seed.upstream_url,
            seed.enabled,
            seed.check_frequency_minutes,
        )
        .await?;
    }
    registry.reload(repo.as_ref()).await?;

    let _admin = AdminService::new(
        repo.clone(),
        registry.clone(),
        upstream.clone(),
        config.polling.min_check_frequency,
    );

    let cancel = CancellationToken::new();
    let interval = Duration::from_secs(config.polling.interval_seconds);

    let poller_handle = tokio::spawn(run_route_poller(
        repo.clone(),
        registry.clone(),
        interval,
        cancel.clone(),
    ));
    let checker_handle = tokio::spawn(run_check_scheduler(
        repo.clone(),
        registry.clone(),
        upstream.clone(),
        interval,
        cancel.clone(),
    ));

    let proxy_state = ProxyState {
        registry: registry.clone(),
        upstream,
    };
    let app = Router::new()
        .route("/{service_name}/mcp", any(proxy::handle))
        .with_state(proxy_state);

    let addr = config.bind_addr()?;
    info!(%addr, "mcp-guardian listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    let _ = tokio::join!(poller_handle, checker_handle);

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
