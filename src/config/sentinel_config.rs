//! Sentinel configuration: every tunable as a TOML value.
//!
//! Each section implements `Default` with the values from
//! [`super::defaults`], so a missing file or a partial file behaves the
//! same as a fully spelled-out one.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use super::defaults;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "SENTINEL_CONFIG";

/// Environment variable overriding `server.addr`.
pub const SERVER_ADDR_ENV: &str = "SENTINEL_SERVER_ADDR";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "sentinel.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration.
///
/// Load with `SentinelConfig::load()` which searches:
/// 1. `$SENTINEL_CONFIG`
/// 2. `./sentinel.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SentinelConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub observer: ObserverConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub activity: ActivityConfig,
}

impl SentinelConfig {
    /// Load configuration using the standard search order. A file that
    /// fails to load is logged and skipped.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from {}", CONFIG_ENV);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate TOML text. Unknown keys are logged, not rejected.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SENTINEL_SERVER_ADDR` if set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var(SERVER_ADDR_ENV) {
            if !addr.trim().is_empty() {
                self.server.addr = addr;
            }
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check every section, collecting all violations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.server.addr.parse::<SocketAddr>().is_err() {
            errors.push(format!("server.addr '{}' is not a socket address", self.server.addr));
        }

        let rt = &self.runtime;
        if rt.monitor_label.trim().is_empty() {
            errors.push("runtime.monitor_label must not be empty".to_string());
        }
        if rt.service_label.trim().is_empty() {
            errors.push("runtime.service_label must not be empty".to_string());
        }
        if rt.request_timeout_ms == 0 {
            errors.push("runtime.request_timeout_ms must be > 0".to_string());
        }

        let o = &self.observer;
        if o.poll_interval_ms == 0 {
            errors.push("observer.poll_interval_ms must be > 0".to_string());
        }
        if o.health_timeout_ms == 0 {
            errors.push("observer.health_timeout_ms must be > 0".to_string());
        }
        if o.cycle_timeout_ms < o.health_timeout_ms {
            errors.push(format!(
                "observer.cycle_timeout_ms ({}) must be >= health_timeout_ms ({})",
                o.cycle_timeout_ms, o.health_timeout_ms
            ));
        }
        if o.max_concurrency == 0 {
            errors.push("observer.max_concurrency must be > 0".to_string());
        }

        let p = &self.policy;
        if p.restart_threshold == 0 {
            errors.push("policy.restart_threshold must be >= 1".to_string());
        }
        if p.recreate_threshold <= p.restart_threshold {
            errors.push(format!(
                "policy.recreate_threshold ({}) must be > restart_threshold ({})",
                p.recreate_threshold, p.restart_threshold
            ));
        }
        if p.cooldown_multiplier == 0 {
            errors.push("policy.cooldown_multiplier must be >= 1".to_string());
        }
        if !p.load_high_watermark.is_finite() || p.load_high_watermark <= 0.0 {
            errors.push(format!(
                "policy.load_high_watermark must be a finite number > 0 (got {})",
                p.load_high_watermark
            ));
        }
        if p.load_sustain_polls == 0 {
            errors.push("policy.load_sustain_polls must be >= 1".to_string());
        }
        if p.scale_step == 0 {
            errors.push("policy.scale_step must be >= 1".to_string());
        }
        if p.scale_step > p.max_scale_step {
            errors.push(format!(
                "policy.scale_step ({}) must be <= max_scale_step ({})",
                p.scale_step, p.max_scale_step
            ));
        }

        let e = &self.executor;
        if e.action_timeout_ms == 0 {
            errors.push("executor.action_timeout_ms must be > 0".to_string());
        }
        if e.recreate_suffix.is_empty() {
            errors.push("executor.recreate_suffix must not be empty".to_string());
        }
        if e.max_replicas == 0 {
            errors.push("executor.max_replicas must be >= 1".to_string());
        }
        if e.min_replicas > e.max_replicas {
            errors.push(format!(
                "executor.min_replicas ({}) must be <= max_replicas ({})",
                e.min_replicas, e.max_replicas
            ));
        }

        if self.activity.capacity == 0 {
            errors.push("activity.capacity must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Config parse error ({}): {}", .0.display(), .1)]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config validation failed:\n{}", format_violations(.0))]
    Validation(Vec<String>),
}

fn format_violations(errors: &[String]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Server
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_server_addr")]
    pub addr: String,
}

fn default_server_addr() -> String {
    defaults::SERVER_ADDR.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
        }
    }
}

// ============================================================================
// Runtime
// ============================================================================

/// Which runtime gateway the daemon drives
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeBackend {
    #[default]
    Docker,
    /// Simulated runtime seeded with demo units
    Memory,
}

impl std::fmt::Display for RuntimeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeBackend::Docker => write!(f, "docker"),
            RuntimeBackend::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub backend: RuntimeBackend,

    /// Empty means the local default socket
    #[serde(default)]
    pub docker_host: String,

    #[serde(default = "default_monitor_label")]
    pub monitor_label: String,

    #[serde(default = "default_service_label")]
    pub service_label: String,

    /// Also watch swarm services carrying the monitor label
    #[serde(default = "default_true")]
    pub include_services: bool,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_monitor_label() -> String {
    defaults::MONITOR_LABEL.to_string()
}
fn default_service_label() -> String {
    defaults::SERVICE_LABEL.to_string()
}
fn default_true() -> bool {
    true
}
fn default_request_timeout_ms() -> u64 {
    defaults::REQUEST_TIMEOUT_MS
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backend: RuntimeBackend::default(),
            docker_host: String::new(),
            monitor_label: default_monitor_label(),
            service_label: default_service_label(),
            include_services: true,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl RuntimeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn unit_filter(&self) -> crate::runtime::UnitFilter {
        crate::runtime::UnitFilter {
            label: self.monitor_label.clone(),
            service_label: self.service_label.clone(),
            include_services: self.include_services,
        }
    }
}

// ============================================================================
// Observer
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObserverConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_health_timeout_ms")]
    pub health_timeout_ms: u64,

    #[serde(default = "default_cycle_timeout_ms")]
    pub cycle_timeout_ms: u64,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_poll_interval_ms() -> u64 {
    defaults::POLL_INTERVAL_MS
}
fn default_health_timeout_ms() -> u64 {
    defaults::HEALTH_TIMEOUT_MS
}
fn default_cycle_timeout_ms() -> u64 {
    defaults::CYCLE_TIMEOUT_MS
}
fn default_max_concurrency() -> usize {
    defaults::MAX_CONCURRENCY
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            health_timeout_ms: default_health_timeout_ms(),
            cycle_timeout_ms: default_cycle_timeout_ms(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl ObserverConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_millis(self.cycle_timeout_ms)
    }
}

// ============================================================================
// Policy
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyConfig {
    /// Failing streak at which a restart is issued
    #[serde(default = "default_restart_threshold")]
    pub restart_threshold: u32,

    /// Failing streak at which a recreate is considered
    #[serde(default = "default_recreate_threshold")]
    pub recreate_threshold: u32,

    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,

    #[serde(default = "default_cooldown_multiplier")]
    pub cooldown_multiplier: u32,

    #[serde(default = "default_max_cooldown_secs")]
    pub max_cooldown_secs: u64,

    #[serde(default = "default_fault_override_ttl_secs")]
    pub fault_override_ttl_secs: u64,

    #[serde(default = "default_load_high_watermark")]
    pub load_high_watermark: f64,

    #[serde(default = "default_load_sustain_polls")]
    pub load_sustain_polls: u32,

    #[serde(default = "default_scale_step")]
    pub scale_step: u32,

    #[serde(default = "default_max_scale_step")]
    pub max_scale_step: u32,
}

fn default_restart_threshold() -> u32 {
    defaults::RESTART_THRESHOLD
}
fn default_recreate_threshold() -> u32 {
    defaults::RECREATE_THRESHOLD
}
fn default_grace_period_secs() -> u64 {
    defaults::GRACE_PERIOD_SECS
}
fn default_cooldown_multiplier() -> u32 {
    defaults::COOLDOWN_MULTIPLIER
}
fn default_max_cooldown_secs() -> u64 {
    defaults::MAX_COOLDOWN_SECS
}
fn default_fault_override_ttl_secs() -> u64 {
    defaults::FAULT_OVERRIDE_TTL_SECS
}
fn default_load_high_watermark() -> f64 {
    defaults::LOAD_HIGH_WATERMARK
}
fn default_load_sustain_polls() -> u32 {
    defaults::LOAD_SUSTAIN_POLLS
}
fn default_scale_step() -> u32 {
    defaults::SCALE_STEP
}
fn default_max_scale_step() -> u32 {
    defaults::MAX_SCALE_STEP
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            restart_threshold: default_restart_threshold(),
            recreate_threshold: default_recreate_threshold(),
            grace_period_secs: default_grace_period_secs(),
            cooldown_multiplier: default_cooldown_multiplier(),
            max_cooldown_secs: default_max_cooldown_secs(),
            fault_override_ttl_secs: default_fault_override_ttl_secs(),
            load_high_watermark: default_load_high_watermark(),
            load_sustain_polls: default_load_sustain_polls(),
            scale_step: default_scale_step(),
            max_scale_step: default_max_scale_step(),
        }
    }
}

// ============================================================================
// Executor
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutorConfig {
    #[serde(default = "default_action_timeout_ms")]
    pub action_timeout_ms: u64,

    #[serde(default = "default_recreate_suffix")]
    pub recreate_suffix: String,

    #[serde(default = "default_min_replicas")]
    pub min_replicas: u64,

    #[serde(default = "default_max_replicas")]
    pub max_replicas: u64,
}

fn default_action_timeout_ms() -> u64 {
    defaults::ACTION_TIMEOUT_MS
}
fn default_recreate_suffix() -> String {
    defaults::RECREATE_SUFFIX.to_string()
}
fn default_min_replicas() -> u64 {
    defaults::MIN_REPLICAS
}
fn default_max_replicas() -> u64 {
    defaults::MAX_REPLICAS
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            action_timeout_ms: default_action_timeout_ms(),
            recreate_suffix: default_recreate_suffix(),
            min_replicas: default_min_replicas(),
            max_replicas: default_max_replicas(),
        }
    }
}

impl ExecutorConfig {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }
}

// ============================================================================
// Activity
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityConfig {
    #[serde(default = "default_activity_capacity")]
    pub capacity: usize,

    /// sled directory for durable history; in-memory only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist_path: Option<PathBuf>,
}

fn default_activity_capacity() -> usize {
    defaults::ACTIVITY_CAPACITY
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            capacity: default_activity_capacity(),
            persist_path: None,
        }
    }
}
