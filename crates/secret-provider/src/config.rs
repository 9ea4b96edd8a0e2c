use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use secret_common::config::{default_hostname, hardware_concurrency, load_json, CoordinatorAddr};
use secret_common::transport::DEFAULT_MAX_FRAME_PAYLOAD;
use secret_common::{Result, SecretError, SenderId};

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_phenotype_dir() -> PathBuf {
    PathBuf::from("dpi_data")
}

fn default_max_frame_payload() -> usize {
    DEFAULT_MAX_FRAME_PAYLOAD
}

/// Data Provider settings.
///
/// ```json
/// {
///   "dpi_name": "dpi1",
///   "dpi_bind_port": 8601,
///   "allele_file": "dpi_data/alleles.tsv",
///   "coordination_server_info": { "hostname": "127.0.0.1", "port": 8500 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Sender id on every message; must not contain whitespace.
    #[serde(rename = "dpi_name", alias = "name")]
    pub name: String,

    /// Hostname announced to the other peers.
    #[serde(default = "default_hostname")]
    pub hostname: String,

    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    #[serde(rename = "dpi_bind_port", alias = "bind_port")]
    pub bind_port: u16,

    pub allele_file: PathBuf,

    /// Directory holding `<phenotype>.tsv` files.
    #[serde(default = "default_phenotype_dir")]
    pub phenotype_dir: PathBuf,

    #[serde(default = "default_max_frame_payload")]
    pub max_frame_payload: usize,

    /// Partition workers; hardware concurrency when unset.
    #[serde(default)]
    pub worker_count: Option<usize>,

    #[serde(rename = "coordination_server_info", alias = "coordinator")]
    pub coordinator: CoordinatorAddr,
}

impl ProviderConfig {
    pub fn new(
        name: impl Into<String>,
        allele_file: impl Into<PathBuf>,
        coordinator: CoordinatorAddr,
    ) -> Self {
        Self {
            name: name.into(),
            hostname: default_hostname(),
            bind_host: default_bind_host(),
            bind_port: 0,
            allele_file: allele_file.into(),
            phenotype_dir: default_phenotype_dir(),
            max_frame_payload: default_max_frame_payload(),
            worker_count: None,
            coordinator,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = load_json(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.sender_id()?;
        if self.max_frame_payload < 256 {
            return Err(SecretError::Config(format!(
                "max_frame_payload {} is too small",
                self.max_frame_payload
            )));
        }
        if self.worker_count == Some(0) {
            return Err(SecretError::Config("worker_count must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn sender_id(&self) -> Result<SenderId> {
        SenderId::new(self.name.clone())
            .map_err(|_| SecretError::Config(format!("invalid dpi_name {:?}", self.name)))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.bind_port)
    }

    pub fn workers(&self) -> usize {
        self.worker_count.unwrap_or_else(hardware_concurrency)
    }
}
