//! Runner configuration.
//!
//! Resolved as: built-in defaults, then the TOML file (`--config`, or
//! `~/.toolport/runner.toml` when present), then `TOOLPORT_*` environment
//! variables, then CLI flags (applied by the binary).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use toolport_core::config::toolport_home;
use toolport_core::{Error, Result};

/// Runtime configuration for one runner agent.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Portal base URL (e.g. "https://tools.example.com").
    pub portal_url: String,

    /// Plaintext machine key issued at registration.
    pub machine_key: String,

    /// Hostname reported with heartbeats.
    pub hostname: Option<String>,

    /// Sleep between claims when the queue is empty.
    pub poll_interval: Duration,

    pub heartbeat_interval: Duration,

    /// Per-request timeout for portal calls.
    pub request_timeout: Duration,

    /// Backoff applied while the portal is unreachable.
    pub reconnect: ReconnectPolicy,

    /// Interpreter used for `python_runner` tools.
    pub python_bin: PathBuf,

    /// When set, each run's output is written to `<log_dir>/<run_id>.log`.
    pub log_dir: Option<PathBuf>,
}

impl RunnerConfig {
    /// Create a config with required fields and defaults.
    pub fn new(portal_url: impl Into<String>, machine_key: impl Into<String>) -> Self {
        Self {
            portal_url: portal_url.into(),
            machine_key: machine_key.into(),
            hostname: None,
            poll_interval: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
            python_bin: PathBuf::from("python"),
            log_dir: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.portal_url.trim().is_empty() {
            return Err(Error::Config("portal_url is required".into()));
        }
        if !(self.portal_url.starts_with("http://") || self.portal_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "portal_url must start with http:// or https://, got {}",
                self.portal_url
            )));
        }
        if self.machine_key.trim().is_empty() {
            return Err(Error::Config("machine_key is required".into()));
        }
        Ok(())
    }
}

/// Exponential backoff policy for portal outages.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Consecutive failures tolerated before giving up (None = unlimited).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-indexed).
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt.min(64) as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    pub const fn should_retry(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }
}

/// On-disk shape of `runner.toml`. Durations are in seconds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RunnerFile {
    portal_url: Option<String>,
    machine_key: Option<String>,
    hostname: Option<String>,
    poll_interval_secs: Option<u64>,
    heartbeat_interval_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    python_bin: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    reconnect: ReconnectFile,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ReconnectFile {
    initial_delay_secs: Option<u64>,
    max_delay_secs: Option<u64>,
    max_attempts: Option<u32>,
}

impl RunnerFile {
    fn apply(self, config: &mut RunnerConfig) {
        if let Some(v) = self.portal_url {
            config.portal_url = v;
        }
        if let Some(v) = self.machine_key {
            config.machine_key = v;
        }
        if self.hostname.is_some() {
            config.hostname = self.hostname;
        }
        if let Some(v) = self.poll_interval_secs {
            config.poll_interval = Duration::from_secs(v);
        }
        if let Some(v) = self.heartbeat_interval_secs {
            config.heartbeat_interval = Duration::from_secs(v);
        }
        if let Some(v) = self.request_timeout_secs {
            config.request_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.python_bin {
            config.python_bin = v;
        }
        if self.log_dir.is_some() {
            config.log_dir = self.log_dir;
        }
        if let Some(v) = self.reconnect.initial_delay_secs {
            config.reconnect.initial_delay = Duration::from_secs(v);
        }
        if let Some(v) = self.reconnect.max_delay_secs {
            config.reconnect.max_delay = Duration::from_secs(v);
        }
        if self.reconnect.max_attempts.is_some() {
            config.reconnect.max_attempts = self.reconnect.max_attempts;
        }
    }
}

/// `~/.toolport/runner.toml`
pub fn default_config_path() -> Option<PathBuf> {
    toolport_home().map(|h| h.join("runner.toml"))
}

/// Load the runner config. An explicit `path` must exist.
pub fn load_runner_config(path: Option<&Path>) -> Result<RunnerConfig> {
    let mut config = RunnerConfig::new("", "");
    config.hostname = local_hostname();

    let file = match path {
        Some(p) => Some(p.to_path_buf()),
        None => default_config_path().filter(|p| p.exists()),
    };
    if let Some(file) = file {
        let content = std::fs::read_to_string(&file).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {e}", file.display()))
        })?;
        parse_runner_file(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file {}: {e}", file.display())))?
            .apply(&mut config);
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn parse_runner_file(content: &str) -> std::result::Result<RunnerFile, toml::de::Error> {
    toml::from_str(content)
}

/// Apply `TOOLPORT_*` environment overrides using the given lookup.
pub fn apply_env_overrides(config: &mut RunnerConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("TOOLPORT_PORTAL_URL") {
        config.portal_url = val;
    }
    if let Some(val) = lookup("TOOLPORT_MACHINE_KEY") {
        config.machine_key = val;
    }
    if let Some(val) = lookup("TOOLPORT_HOSTNAME").filter(|v| !v.is_empty()) {
        config.hostname = Some(val);
    }
    if let Some(secs) = lookup("TOOLPORT_POLL_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
        config.poll_interval = Duration::from_secs(secs);
    }
}

/// Best-effort hostname from the environment.
fn local_hostname() -> Option<String> {
    ["COMPUTERNAME", "HOSTNAME"]
        .into_iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
}
