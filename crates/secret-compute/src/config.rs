use std::path::Path;

use serde::{Deserialize, Serialize};

use secret_common::config::{default_hostname, hardware_concurrency, load_json, CoordinatorAddr};
use secret_common::transport::DEFAULT_MAX_FRAME_PAYLOAD;
use secret_common::{PeerInfo, Result, SecretError, SenderId};

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_max_frame_payload() -> usize {
    DEFAULT_MAX_FRAME_PAYLOAD
}

/// Compute Node settings.
///
/// ```json
/// {
///   "hostname": "127.0.0.1",
///   "enclave_node_bind_port": 8701,
///   "thread_count": 4,
///   "covariants": ["1", "age"],
///   "y_val_name": "case",
///   "institutions": ["dpi1", "dpi2"],
///   "coordination_server_info": { "hostname": "127.0.0.1", "port": 8500 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeConfig {
    /// Hostname announced to the other peers.
    #[serde(default = "default_hostname")]
    pub hostname: String,

    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    #[serde(rename = "enclave_node_bind_port", alias = "bind_port")]
    pub bind_port: u16,

    /// Also the shard capacity: each provider generates this many slot keys.
    #[serde(default = "hardware_concurrency")]
    pub thread_count: usize,

    /// Phenotypes requested besides the outcome; `1` is the intercept.
    #[serde(default)]
    pub covariants: Vec<String>,

    #[serde(alias = "outcome")]
    pub y_val_name: String,

    /// Names of every Data Provider expected to stream data.
    pub institutions: Vec<String>,

    /// Upper bound for one `Output` payload.
    #[serde(default = "default_max_frame_payload")]
    pub max_frame_payload: usize,

    #[serde(rename = "coordination_server_info", alias = "coordinator")]
    pub coordinator: CoordinatorAddr,
}

impl ComputeConfig {
    pub fn new(
        institutions: Vec<String>,
        y_val_name: impl Into<String>,
        coordinator: CoordinatorAddr,
    ) -> Self {
        Self {
            hostname: default_hostname(),
            bind_host: default_bind_host(),
            bind_port: 0,
            thread_count: 1,
            covariants: Vec::new(),
            y_val_name: y_val_name.into(),
            institutions,
            max_frame_payload: default_max_frame_payload(),
            coordinator,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = load_json(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.thread_count == 0 {
            return Err(SecretError::Config("thread_count must be at least 1".to_string()));
        }
        if self.institutions.is_empty() {
            return Err(SecretError::Config("institutions must not be empty".to_string()));
        }
        for name in &self.institutions {
            SenderId::new(name.clone())
                .map_err(|_| SecretError::Config(format!("invalid institution {:?}", name)))?;
        }
        if self.y_val_name.trim().is_empty() {
            return Err(SecretError::Config("y_val_name must not be empty".to_string()));
        }
        if self.max_frame_payload < 256 {
            return Err(SecretError::Config(format!(
                "max_frame_payload {} is too small",
                self.max_frame_payload
            )));
        }
        if self.hostname.contains(char::is_whitespace) || self.hostname.is_empty() {
            return Err(SecretError::Config(format!("invalid hostname {:?}", self.hostname)));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.bind_port)
    }

    /// Phenotype names in request order, outcome last.
    pub fn phenotype_request(&self) -> String {
        self.covariants
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.y_val_name.as_str()))
            .collect::<Vec<_>>()
            .join("\t")
    }

    /// This node's registration record for a given listening port.
    pub fn peer_info(&self, port: u16) -> PeerInfo {
        PeerInfo::compute(self.hostname.clone(), port, self.thread_count)
    }
}
