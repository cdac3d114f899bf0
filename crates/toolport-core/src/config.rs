//! Configuration resolution for the toolport portal server.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Config file (`--config`, or `~/.toolport/server.toml` when present)
//! 3. Environment variables
//! 4. CLI arguments (applied by the binary, highest priority)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Runs a machine has not reported on for this long are failed by the lease
/// sweeper. Six hours.
pub const DEFAULT_MAX_RUNNING_SECS: i64 = 6 * 60 * 60;

/// A machine is considered online if it sent a heartbeat within this window.
pub const DEFAULT_ONLINE_THRESHOLD_SECS: i64 = 2 * 60;

/// Complete portal server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub dispatch: DispatchConfig,
}

/// Listener and persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP API listens on.
    pub addr: SocketAddr,
    /// Externally reachable base URL, used to build the callback address
    /// handed to runners at claim time.
    pub public_url: String,
    /// `SQLite` database file. Defaults to `~/.toolport/portal.db`.
    pub database_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            public_url: "http://localhost:3000".to_string(),
            database_path: None,
        }
    }
}

/// Credentials for the user-facing API and the ingestion webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for user/operator access tokens.
    pub jwt_secret: String,
    /// Access token TTL in seconds.
    pub access_ttl_secs: i64,
    /// Shared secret for the job ingestion webhooks. Ingestion answers 500
    /// until this is configured.
    pub webhook_secret: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dev-secret-change-me".to_string(),
            access_ttl_secs: 3600,
            webhook_secret: None,
        }
    }
}

/// Dispatch policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub online_threshold_secs: i64,
    /// Maximum time a claimed run may stay `running`. `0` disables the lease.
    pub max_running_secs: i64,
    /// How often the lease sweeper looks for expired runs.
    pub lease_sweep_interval_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            online_threshold_secs: DEFAULT_ONLINE_THRESHOLD_SECS,
            max_running_secs: DEFAULT_MAX_RUNNING_SECS,
            lease_sweep_interval_secs: 60,
        }
    }
}

impl PortalConfig {
    /// Address runners must call to finalize a run with its one-time token.
    pub fn callback_url(&self) -> String {
        format!(
            "{}/api/runs/callback",
            self.server.public_url.trim_end_matches('/')
        )
    }

    /// Resolved database path, falling back to `~/.toolport/portal.db`.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.server
            .database_path
            .clone()
            .or_else(|| toolport_home().map(|h| h.join("portal.db")))
    }
}

/// Load configuration with hierarchical resolution.
///
/// An explicitly given `path` must exist. Without one, the global config file
/// is read if present.
pub fn load_config(path: Option<&Path>) -> Result<PortalConfig> {
    let mut config = match path {
        Some(p) => load_config_file(p)?,
        None => match global_config_path() {
            Some(global) if global.exists() => load_config_file(&global)?,
            _ => PortalConfig::default(),
        },
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// `~/.toolport`
pub fn toolport_home() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".toolport"))
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    toolport_home().map(|h| h.join("server.toml"))
}

/// Parse a TOML config file. Missing sections fall back to defaults.
pub fn load_config_file(path: &Path) -> Result<PortalConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    parse_config(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config file {}: {e}", path.display())))
}

fn parse_config(content: &str) -> std::result::Result<PortalConfig, toml::de::Error> {
    toml::from_str(content)
}

/// Apply `TOOLPORT_*` environment overrides using the given lookup.
pub fn apply_env_overrides(config: &mut PortalConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("TOOLPORT_ADDR") {
        if let Ok(addr) = val.parse() {
            config.server.addr = addr;
        }
    }
    if let Some(val) = lookup("TOOLPORT_PUBLIC_URL") {
        config.server.public_url = val;
    }
    if let Some(val) = lookup("TOOLPORT_DB_PATH") {
        config.server.database_path = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("TOOLPORT_JWT_SECRET") {
        config.auth.jwt_secret = val;
    }
    if let Some(val) = lookup("TOOLPORT_WEBHOOK_SECRET") {
        if !val.is_empty() {
            config.auth.webhook_secret = Some(val);
        }
    }
    if let Some(val) = lookup("TOOLPORT_MAX_RUNNING_SECS") {
        if let Ok(n) = val.parse() {
            config.dispatch.max_running_secs = n;
        }
    }
}
