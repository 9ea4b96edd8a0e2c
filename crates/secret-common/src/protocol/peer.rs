use std::fmt;

use crate::error::{Result, SecretError};

/// Dense identity of a Compute Node, assigned in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlobalId(pub usize);

impl GlobalId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of a registered peer.
///
/// `shard_capacity` is the Compute Node thread count and decides how many
/// symmetric-key slots each provider generates for that node. Data Providers
/// register without it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerInfo {
    pub hostname: String,
    pub port: u16,
    pub shard_capacity: Option<usize>,
}

impl PeerInfo {
    pub fn provider(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            shard_capacity: None,
        }
    }

    pub fn compute(hostname: impl Into<String>, port: u16, shard_capacity: usize) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            shard_capacity: Some(shard_capacity),
        }
    }

    /// `host:port` form used to open connections.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    /// Number of key slots; providers count as a single slot.
    pub fn slots(&self) -> usize {
        self.shard_capacity.unwrap_or(1)
    }

    /// Parses `hostname\tport[\tshard_capacity]`.
    ///
    /// When `with_capacity` is set the third field is required and must be
    /// at least one.
    pub fn parse(text: &str, with_capacity: bool) -> Result<Self> {
        let fields: Vec<&str> = text.trim_end_matches('\r').split('\t').collect();
        let expected = if with_capacity { 3 } else { 2 };
        if fields.len() < expected {
            return Err(SecretError::Protocol(format!(
                "peer record {:?} has {} fields, expected {}",
                text,
                fields.len(),
                expected
            )));
        }

        let hostname = fields[0].trim();
        if hostname.is_empty() {
            return Err(SecretError::Protocol(format!("peer record {:?} has no hostname", text)));
        }
        let port = fields[1]
            .trim()
            .parse::<u16>()
            .map_err(|e| SecretError::Protocol(format!("invalid port in {:?}: {}", text, e)))?;

        let shard_capacity = if with_capacity {
            let capacity = fields[2].trim().parse::<usize>().map_err(|e| {
                SecretError::Protocol(format!("invalid shard capacity in {:?}: {}", text, e))
            })?;
            if capacity == 0 {
                return Err(SecretError::Protocol(format!(
                    "peer record {:?} declares zero shard capacity",
                    text
                )));
            }
            Some(capacity)
        } else {
            None
        };

        Ok(Self {
            hostname: hostname.to_string(),
            port,
            shard_capacity,
        })
    }

    pub fn same_endpoint(&self, other: &PeerInfo) -> bool {
        self.hostname == other.hostname && self.port == other.port
    }
}

impl fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shard_capacity {
            Some(capacity) => write!(f, "{}\t{}\t{}", self.hostname, self.port, capacity),
            None => write!(f, "{}\t{}", self.hostname, self.port),
        }
    }
}

/// All registered peers of one kind, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    peers: Vec<PeerInfo>,
}

impl Roster {
    pub fn new(peers: Vec<PeerInfo>) -> Self {
        Self { peers }
    }

    pub fn peers(&self) -> &[PeerInfo] {
        &self.peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Newline-joined records, no trailing newline.
    pub fn serialize(&self) -> String {
        self.peers
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn parse(text: &str, with_capacity: bool) -> Result<Self> {
        let peers = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| PeerInfo::parse(line, with_capacity))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { peers })
    }
}

impl IntoIterator for Roster {
    type Item = PeerInfo;
    type IntoIter = std::vec::IntoIter<PeerInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.peers.into_iter()
    }
}
