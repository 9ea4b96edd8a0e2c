//! # SECRET
//!
//! Peers of a secure multi-party association study session:
//!
//! - [`coordinator`]: registration barrier, completion detection, result merge
//! - [`provider`]: partitions, encrypts and streams one institution's records
//! - [`compute`]: receives every provider's shard and computes results
//! - [`common`]: wire protocol, transport and crypto shared by all of them
//!
//! The `secret` binary in `secret-cli` starts any of the three roles from a
//! JSON configuration file.

pub use secret_common as common;
pub use secret_compute as compute;
pub use secret_coordinator as coordinator;
pub use secret_provider as provider;
