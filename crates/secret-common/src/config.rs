//! JSON configuration loading shared by every peer.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SecretError};

/// Where to reach the Coordination Server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorAddr {
    #[serde(alias = "ip", alias = "host")]
    pub hostname: String,
    pub port: u16,
}

impl CoordinatorAddr {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

/// Reads and deserializes a JSON configuration file.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        SecretError::Config(format!("cannot read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&text)
        .map_err(|e| SecretError::Config(format!("invalid {}: {}", path.display(), e)))
}

/// Number of hardware threads, at least one.
pub fn hardware_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

pub fn default_hostname() -> String {
    "127.0.0.1".to_string()
}
