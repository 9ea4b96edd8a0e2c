//! SECRET Coordination Server
//!
//! The Coordination Server is the only peer every other peer knows about in
//! advance. It:
//!
//! - registers Compute Nodes (assigning dense [`GlobalId`]s) and Data Providers
//! - releases both rosters to every Data Provider exactly once, when the
//!   expected number of each has registered
//! - collects result fragments until every Compute Node has sent its sentinel
//! - merges all fragments into one descending, locus-ordered output file
//! - terminates every registered peer and stops its own listener
//!
//! [`GlobalId`]: secret_common::GlobalId

pub mod completion;
pub mod config;
pub mod merge;
pub mod registry;
pub mod server;

#[cfg(test)]
mod tests;

pub use completion::{Completion, ResultFragment, SentinelOutcome};
pub use config::CoordinatorConfig;
pub use merge::{compare_lines, write_output, MergeFrontier};
pub use registry::{ComputeAdmission, Registry, RosterRelease};
pub use server::{CoordinationServer, SessionReport};
