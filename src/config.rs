//! Configuration loading (spec §6, [AMBIENT-CFG]).
//!
//! Layered the way `turbomcp-proxy`'s `config.rs` loads its own settings:
//! built-in defaults, overlaid by an optional YAML file, overlaid by a
//! short list of environment overrides for the listener bind address.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use serde::Deserialize;

use crate::error::{GuardianError, GuardianResult};

fn default_interval_seconds() -> u64 {
    60
}

fn default_min_check_frequency() -> u32 {
    5
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// `admin.*` configuration (spec §6).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AdminConfig {
    /// Absent means a random password is generated and logged once at
    /// startup (see [`Config::resolve_admin_password`]).
    pub password: Option<String>,
    #[serde(default)]
    pub disable_ui: bool,
}

/// `polling.*` configuration (spec §6).
#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_min_check_frequency")]
    pub min_check_frequency: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            min_check_frequency: default_min_check_frequency(),
        }
    }
}

/// `database.*` configuration (spec §6). The connection string is accepted
/// here for the out-of-scope durable `Repository` implementation to
/// eventually consume; this crate's own `InMemoryRepository` ignores it.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
}

/// One seed entry from `services[]` (spec §6), upserted at startup via
/// `Repository::upsert_service_from_config`.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedService {
    pub name: String,
    pub upstream_url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub check_frequency_minutes: u32,
}

fn default_enabled() -> bool {
    true
}

/// Listener bind configuration, overridden by the `HOST`/`PORT`
/// environment variables per spec §6.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Top-level configuration, mirroring spec §6's enumerated keys.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub services: Vec<SeedService>,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from an optional YAML file, overlaid by `HOST`
    /// and `PORT` environment overrides for the listener bind address.
    pub fn load(path: Option<&Path>) -> GuardianResult<Self> {
        let mut builder = config::Config::builder()
            .set_default("polling.interval_seconds", default_interval_seconds() as i64)?
            .set_default("polling.min_check_frequency", default_min_check_frequency() as i64)?
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("admin.disable_ui", false)?;

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        builder = builder
            .add_source(config::Environment::default().prefix("").try_parsing(true).separator("__"));

        let raw = builder
            .build()
            .map_err(|e| GuardianError::validation(format!("config load failed: {e}")))?;
        let mut cfg: Config = raw
            .try_deserialize()
            .map_err(|e| GuardianError::validation(format!("config parse failed: {e}")))?;

        if let Ok(host) = std::env::var("HOST") {
            cfg.server.host = host;
        }
        if let Ok(port) = std::env::var("PORT") {
            cfg.server.port = port
                .parse()
                .map_err(|_| GuardianError::validation(format!("invalid PORT: {port}")))?;
        }

        Ok(cfg)
    }

    /// The socket address the HTTP listener should bind.
    pub fn bind_addr(&self) -> GuardianResult<SocketAddr> {
        let ip: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        Ok(SocketAddr::new(ip, self.server.port))
    }

    /// Resolve the effective admin password: the configured one, or a
    /// freshly generated random one (logged once by the caller).
    pub fn resolve_admin_password(&self) -> String {
        self.admin
            .password
            .clone()
            .unwrap_or_else(generate_random_password)
    }
}

fn generate_random_password() -> String {
    use uuid::Uuid;
    Uuid::new_v4().simple().to_string()
}
