use std::path::PathBuf;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TICK_MS: u64 = 1_000;
pub const DEFAULT_STATUS_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_LOW_LATENCY_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_API_PATTERN: &str = "phaas-.*-api";

/// Prefix for every exported override variable.
pub const OVERRIDE_ENV_PREFIX: &str = "PHAAS_OVERRIDE_";
/// Always exported to build-tool commands so they never prompt.
pub const DISABLE_INTERACTIVE_ENV: (&str, &str) = ("PHAAS_DOCKER_DISABLE_INTERACTIVE", "1");

/// Top-level config (localsvc.toml + LOCALSVC_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalSvcConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    /// Environment overrides handed to every build-tool invocation.
    #[serde(default)]
    pub env_params: Vec<EnvParam>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory whose immediate children are service checkouts.
    #[serde(default = "default_repos_dir")]
    pub repos_dir: String,
    /// Root for per-service data (log files).
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            repos_dir: default_repos_dir(),
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    #[serde(default = "default_shell")]
    pub executable: String,
    /// Sourced once at startup to verify the shell environment is usable.
    pub init_file: Option<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            executable: default_shell(),
            init_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    #[serde(default = "default_docker_binary")]
    pub binary: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: default_docker_binary(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Directory names matching this pattern are managed as API services.
    #[serde(default = "default_api_pattern")]
    pub api_pattern: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            api_pattern: default_api_pattern(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Scheduler tick granularity.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Steady status watcher cadence.
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
    /// Cadence of the transient watcher registered by a start.
    #[serde(default = "default_low_latency_interval_ms")]
    pub low_latency_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            tick_ms: DEFAULT_TICK_MS,
            status_interval_secs: DEFAULT_STATUS_INTERVAL_SECS,
            low_latency_interval_ms: DEFAULT_LOW_LATENCY_INTERVAL_MS,
        }
    }
}

/// A single `{key, value, enabled}` override triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvParam {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub enabled: bool,
}

impl EnvParam {
    /// The `PHAAS_OVERRIDE_<KEY>` entry for this param, or `None` when disabled.
    pub fn env_entry(&self) -> Option<(String, String)> {
        if !self.enabled {
            return None;
        }
        Some((
            format!("{OVERRIDE_ENV_PREFIX}{}", self.key.to_uppercase()),
            self.value.clone(),
        ))
    }
}

impl LocalSvcConfig {
    /// Load config from a TOML file with LOCALSVC_* env var overrides.
    ///
    /// Nested keys use a double underscore: `LOCALSVC_PATHS__REPOS_DIR`.
    /// A missing file is not an error; every section has defaults.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: LocalSvcConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("LOCALSVC_").split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        tracing::debug!(path = %path, "configuration loaded");
        Ok(config)
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        let intervals = [
            ("watch.tick_ms", self.watch.tick_ms),
            ("watch.status_interval_secs", self.watch.status_interval_secs),
            ("watch.low_latency_interval_ms", self.watch.low_latency_interval_ms),
        ];
        for (key, value) in intervals {
            if value == 0 {
                return Err(crate::error::CoreError::Config(format!(
                    "{key} must be greater than zero"
                )));
            }
        }
        Ok(())
    }

    /// Discovery root with `~` expanded.
    pub fn repos_dir(&self) -> PathBuf {
        expand_home(&self.paths.repos_dir)
    }

    /// Per-service data root with `~` expanded.
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.paths.data_dir)
    }

    /// Environment entries for enabled overrides only, in declaration order.
    pub fn override_env(&self) -> Vec<(String, String)> {
        self.env_params.iter().filter_map(EnvParam::env_entry).collect()
    }
}

/// Expand a leading `~` using `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix('~') {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(format!("{home}{rest}"))
        }
        None => PathBuf::from(path),
    }
}

fn default_repos_dir() -> String {
    "~/code".to_string()
}
fn default_data_dir() -> String {
    "~/.localsvc/data".to_string()
}
fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}
fn default_docker_binary() -> String {
    "docker".to_string()
}
fn default_api_pattern() -> String {
    DEFAULT_API_PATTERN.to_string()
}
fn default_tick_ms() -> u64 {
    DEFAULT_TICK_MS
}
fn default_status_interval_secs() -> u64 {
    DEFAULT_STATUS_INTERVAL_SECS
}
fn default_low_latency_interval_ms() -> u64 {
    DEFAULT_LOW_LATENCY_INTERVAL_MS
}

fn default_config_path() -> String {
    std::env::var("LOCALSVC_CONFIG").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/.localsvc/localsvc.toml", home)
    })
}
