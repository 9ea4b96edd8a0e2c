use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use secret_common::config::{hardware_concurrency, load_json};
use secret_common::{Result, SecretError};

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_watchdog_delay_secs() -> u64 {
    30
}

/// Coordination Server settings.
///
/// Keys follow the deployment files, e.g.
///
/// ```json
/// {
///   "coordination_server_bind_port": 8500,
///   "enclave_node_count": 2,
///   "dpi_count": 3,
///   "output_file_name": "results.tsv"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    #[serde(rename = "coordination_server_bind_port", alias = "bind_port")]
    pub bind_port: u16,

    #[serde(rename = "enclave_node_count", alias = "compute_count")]
    pub compute_count: usize,

    #[serde(rename = "dpi_count", alias = "provider_count")]
    pub provider_count: usize,

    #[serde(rename = "output_file_name", alias = "output_path")]
    pub output_path: PathBuf,

    /// Connection worker threads; hardware concurrency when unset.
    #[serde(default)]
    pub worker_pool_size: Option<usize>,

    /// Delay before the completion watchdog reports missing sentinels.
    #[serde(default = "default_watchdog_delay_secs")]
    pub watchdog_delay_secs: u64,
}

impl CoordinatorConfig {
    pub fn new(
        compute_count: usize,
        provider_count: usize,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            bind_host: default_bind_host(),
            bind_port: 0,
            compute_count,
            provider_count,
            output_path: output_path.into(),
            worker_pool_size: None,
            watchdog_delay_secs: default_watchdog_delay_secs(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = load_json(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.compute_count == 0 {
            return Err(SecretError::Config(
                "enclave_node_count must be at least 1".to_string(),
            ));
        }
        if self.provider_count == 0 {
            return Err(SecretError::Config("dpi_count must be at least 1".to_string()));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(SecretError::Config("output_file_name is empty".to_string()));
        }
        if self.worker_pool_size == Some(0) {
            return Err(SecretError::Config(
                "worker_pool_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.bind_port)
    }

    pub fn pool_size(&self) -> usize {
        self.worker_pool_size.unwrap_or_else(hardware_concurrency)
    }

    pub fn watchdog_delay(&self) -> Duration {
        Duration::from_secs(self.watchdog_delay_secs)
    }
}
