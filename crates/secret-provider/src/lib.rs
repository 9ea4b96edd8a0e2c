//! SECRET Data Provider
//!
//! A Data Provider owns one private allele file. Once the Coordination
//! Server releases the rosters it:
//!
//! 1. generates one symmetric key per slot of every Compute Node
//! 2. verifies each node's evidence and seals the slot keys to its public key
//! 3. partitions the file across nodes by locus hash and encrypts every record
//! 4. synchronizes with the other providers
//! 5. streams each node's shard in bounded data frames
//!
//! # Example
//!
//! ```no_run
//! use secret_provider::{DataProvider, ProviderConfig};
//!
//! let config = ProviderConfig::load(std::path::Path::new("dpi.json")).unwrap();
//! let provider = DataProvider::bind(config).unwrap();
//! provider.run().unwrap();
//! ```

pub mod attestation;
pub mod config;
pub mod partition;
pub mod phenotype;
pub mod provider;
pub mod sender;

#[cfg(test)]
mod tests;

pub use attestation::{EvidenceVerifier, KeyDigestVerifier};
pub use config::ProviderConfig;
pub use partition::{
    inspect_allele_file, partition_file, shard_of, AlleleFileSummary, PartitionOutput,
};
pub use phenotype::{load_phenotype, phenotype_frames};
pub use provider::DataProvider;
pub use sender::data_frames;
