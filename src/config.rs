use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Static controller configuration, read-only after construction.
#[derive(Debug, Deserialize, Clone)]
pub struct ControllerConfig {
    /// Engine binary to supervise (default: varnishd)
    #[serde(default = "default_engine_binary")]
    pub engine_binary: String,

    /// Path the rendered configuration is written to
    pub config_file: PathBuf,

    /// Shared secret file authenticating the admin channel
    pub secret_file: PathBuf,

    /// Address the engine serves client traffic on (default: 0.0.0.0)
    #[serde(default = "default_frontend_addr")]
    pub frontend_addr: String,

    /// Port the engine serves client traffic on (default: 6081)
    #[serde(default = "default_frontend_port")]
    pub frontend_port: u16,

    /// Address the engine exposes its admin channel on (default: 127.0.0.1)
    #[serde(default = "default_admin_addr")]
    pub admin_addr: String,

    /// Port the engine exposes its admin channel on (default: 6082)
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,

    /// Cache storage specification passed to the engine (default: malloc,128M)
    #[serde(default = "default_storage")]
    pub storage: String,

    /// Transient storage specification (default: malloc,32M)
    #[serde(default = "default_transient_storage")]
    pub transient_storage: String,

    /// Extra engine parameters, comma-separated; each becomes its own
    /// `-p` flag
    #[serde(default)]
    pub additional_parameters: String,

    /// Named working directory for the engine (`-n`), if any
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Maximum reconfiguration attempts per retry episode (default: 5)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff between retry attempts in seconds (default: 30)
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,

    /// How long to wait for the admin port after spawning, in seconds
    /// (default: 30)
    #[serde(default = "default_admin_timeout_secs")]
    pub admin_timeout_secs: u64,
}

fn default_engine_binary() -> String {
    "varnishd".to_string()
}

fn default_frontend_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_frontend_port() -> u16 {
    6081
}

fn default_admin_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_admin_port() -> u16 {
    6082
}

fn default_storage() -> String {
    "malloc,128M".to_string()
}

fn default_transient_storage() -> String {
    "malloc,32M".to_string()
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_backoff_secs() -> u64 {
    30
}

fn default_admin_timeout_secs() -> u64 {
    30
}

impl ControllerConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            )
        })?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;
        Ok(config)
    }

    /// Admin endpoint in `host:port` form
    pub fn admin_endpoint(&self) -> String {
        format!("{}:{}", self.admin_addr, self.admin_port)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn admin_timeout(&self) -> Duration {
        Duration::from_secs(self.admin_timeout_secs)
    }

    /// Extra parameters split out of the comma-separated field.
    /// Empty segments are skipped.
    pub fn extra_parameters(&self) -> Vec<&str> {
        self.additional_parameters
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect()
    }
}
