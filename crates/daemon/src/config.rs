// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor configuration.
//!
//! Three layers, later wins: built-in defaults, an optional TOML file
//! (`VEAD_CONFIG`), then `VEAD_*` environment variables. Every option
//! has a default so a bare `vead` starts on a development machine.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, toml::de::Error),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Fully resolved supervisor configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the control channel.
    pub control_port: u16,
    /// Port for the health endpoint.
    pub health_port: u16,
    /// Root directory for the store, logs and per-app working dirs.
    pub data_dir: PathBuf,
    /// Tracing filter, e.g. "info" or "vea_daemon=debug".
    pub log_level: String,
    /// Container engine socket.
    pub sandbox_socket: PathBuf,
    /// host:port of the vehicle signal broker.
    pub broker_endpoint: String,
    /// Disable the signal gateway entirely.
    pub broker_enabled: bool,
    /// Maximum simultaneously live applications.
    pub max_live_apps: usize,
    /// Memory limit applied when a record does not specify one.
    pub default_memory_bytes: u64,
    /// CPU share applied when a record does not specify one.
    pub default_cpu_share: u32,
    /// Prefix of canonical application ids.
    pub app_id_prefix: String,
    /// Reconciler cadence.
    pub reconcile_interval_ms: u64,
    /// Per-request deadline on the control channel.
    pub default_request_deadline_ms: u64,
    /// Graceful-stop deadline before force kill.
    pub default_stop_grace_ms: u64,
    /// Per-execution console log ring cap.
    pub log_ring_bytes: u64,
    /// Image used to run script and binary artifacts.
    pub script_image: String,
    /// Store checkpoint cadence in journal entries.
    pub checkpoint_every: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(std::env::temp_dir)
            .join("vead");
        Self {
            control_port: 3002,
            health_port: 3003,
            data_dir,
            log_level: "info".to_string(),
            sandbox_socket: PathBuf::from("/var/run/docker.sock"),
            broker_endpoint: "127.0.0.1:55555".to_string(),
            broker_enabled: true,
            max_live_apps: 5,
            default_memory_bytes: 256 * 1024 * 1024,
            default_cpu_share: 512,
            app_id_prefix: vea_core::DEFAULT_APP_ID_PREFIX.to_string(),
            reconcile_interval_ms: 30_000,
            default_request_deadline_ms: 30_000,
            default_stop_grace_ms: 10_000,
            log_ring_bytes: 1024 * 1024,
            script_image: "vea-runtime:latest".to_string(),
            checkpoint_every: 256,
        }
    }
}

impl Config {
    /// Load configuration: defaults ← file (`VEAD_CONFIG`) ← environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(path) = std::env::var("VEAD_CONFIG") {
            let path = PathBuf::from(path);
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::Read(path.clone(), e))?;
            let file: FileConfig =
                toml::from_str(&raw).map_err(|e| ConfigError::Parse(path.clone(), e))?;
            file.merge_into(&mut config);
        }

        apply_env(&mut config)?;
        Ok(config)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.default_request_deadline_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.default_stop_grace_ms)
    }

    /// Working directory of one application, recorded in its record.
    pub fn app_data_path(&self, app_id: &str) -> PathBuf {
        self.data_dir.join("apps").join(app_id)
    }
}

/// Partial configuration as it appears in the TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    control_port: Option<u16>,
    health_port: Option<u16>,
    data_dir: Option<PathBuf>,
    log_level: Option<String>,
    sandbox_socket: Option<PathBuf>,
    broker_endpoint: Option<String>,
    broker_enabled: Option<bool>,
    max_live_apps: Option<usize>,
    default_memory_bytes: Option<u64>,
    default_cpu_share: Option<u32>,
    app_id_prefix: Option<String>,
    reconcile_interval_ms: Option<u64>,
    default_request_deadline_ms: Option<u64>,
    default_stop_grace_ms: Option<u64>,
    log_ring_bytes: Option<u64>,
    script_image: Option<String>,
    checkpoint_every: Option<usize>,
}

impl FileConfig {
    fn merge_into(self, config: &mut Config) {
        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = self.$field { config.$field = v; })*
            };
        }
        take!(
            control_port,
            health_port,
            data_dir,
            log_level,
            sandbox_socket,
            broker_endpoint,
            broker_enabled,
            max_live_apps,
            default_memory_bytes,
            default_cpu_share,
            app_id_prefix,
            reconcile_interval_ms,
            default_request_deadline_ms,
            default_stop_grace_ms,
            log_ring_bytes,
            script_image,
            checkpoint_every,
        );
    }
}

fn apply_env(config: &mut Config) -> Result<(), ConfigError> {
    fn parsed<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
        match std::env::var(key) {
            Ok(value) => value
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::Invalid { key, value }),
            Err(_) => Ok(None),
        }
    }

    if let Some(v) = parsed::<u16>("VEAD_CONTROL_PORT")? {
        config.control_port = v;
    }
    if let Some(v) = parsed::<u16>("VEAD_HEALTH_PORT")? {
        config.health_port = v;
    }
    if let Ok(v) = std::env::var("VEAD_DATA_DIR") {
        config.data_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("VEAD_LOG_LEVEL") {
        config.log_level = v;
    }
    if let Ok(v) = std::env::var("VEAD_SANDBOX_SOCKET") {
        config.sandbox_socket = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("VEAD_BROKER_ENDPOINT") {
        config.broker_endpoint = v;
    }
    if let Some(v) = parsed::<bool>("VEAD_BROKER_ENABLED")? {
        config.broker_enabled = v;
    }
    if let Some(v) = parsed::<usize>("VEAD_MAX_LIVE_APPS")? {
        config.max_live_apps = v;
    }
    if let Some(v) = parsed::<u64>("VEAD_DEFAULT_MEMORY_BYTES")? {
        config.default_memory_bytes = v;
    }
    if let Some(v) = parsed::<u32>("VEAD_DEFAULT_CPU_SHARE")? {
        config.default_cpu_share = v;
    }
    if let Ok(v) = std::env::var("VEAD_APP_ID_PREFIX") {
        config.app_id_prefix = v;
    }
    if let Some(v) = parsed::<u64>("VEAD_RECONCILE_INTERVAL_MS")? {
        config.reconcile_interval_ms = v;
    }
    if let Some(v) = parsed::<u64>("VEAD_DEFAULT_REQUEST_DEADLINE_MS")? {
        config.default_request_deadline_ms = v;
    }
    if let Some(v) = parsed::<u64>("VEAD_DEFAULT_STOP_GRACE_MS")? {
        config.default_stop_grace_ms = v;
    }
    if let Some(v) = parsed::<u64>("VEAD_LOG_RING_BYTES")? {
        config.log_ring_bytes = v;
    }
    if let Ok(v) = std::env::var("VEAD_SCRIPT_IMAGE") {
        config.script_image = v;
    }
    if let Some(v) = parsed::<usize>("VEAD_CHECKPOINT_EVERY")? {
        config.checkpoint_every = v;
    }
    Ok(())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
