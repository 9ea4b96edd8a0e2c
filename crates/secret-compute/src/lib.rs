//! SECRET Compute Node
//!
//! A Compute Node owns one shard of every Data Provider's records. It:
//!
//! 1. registers with the Coordination Server and receives its [`GlobalId`]
//! 2. answers each provider's `Register` with attestation evidence and its
//!    public key
//! 3. opens the sealed slot keys, then asks the provider for phenotypes and data
//! 4. decrypts every record into a [`ComputeEngine`]
//! 5. uploads the engine's result lines once every provider has finished
//!
//! [`GlobalId`]: secret_common::GlobalId

pub mod config;
pub mod engine;
pub mod node;
pub mod upload;


pub use config::ComputeConfig;
pub use engine::{AlleleTallyEngine, ComputeEngine};
pub use node::ComputeNode;
pub use upload::output_frames;
