//! # SECRET CLI Entry Point
//!
//! One binary for every peer role of a session.
//!
//! ## Usage
//!
//! ```bash
//! # Start the Coordination Server
//! secret coordinator -c coordinator.json
//!
//! # Start a Data Provider
//! secret provider -c dpi1.json
//!
//! # Start a Compute Node on a different port than configured
//! secret compute -c enclave.json --bind-port 8702
//! ```
//!
//! Log verbosity defaults to `info` and follows `RUST_LOG` when set.

use std::path::PathBuf;

use anyhow::{Context, Result};
use argh::FromArgs;

use secret_compute::{ComputeConfig, ComputeNode};
use secret_coordinator::{CoordinationServer, CoordinatorConfig};
use secret_provider::{DataProvider, ProviderConfig};

#[derive(FromArgs)]
/// SECRET - secure multi-party association study runner
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Coordinator(CoordinatorArgs),
    Provider(ProviderArgs),
    Compute(ComputeArgs),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "coordinator")]
/// start the Coordination Server
struct CoordinatorArgs {
    /// path to the coordinator JSON configuration
    #[argh(option, short = 'c')]
    config: PathBuf,

    /// port to listen on, overriding the configuration
    #[argh(option, long = "bind-port")]
    bind_port: Option<u16>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "provider")]
/// start a Data Provider
struct ProviderArgs {
    /// path to the data provider JSON configuration
    #[argh(option, short = 'c')]
    config: PathBuf,

    /// port to listen on, overriding the configuration
    #[argh(option, long = "bind-port")]
    bind_port: Option<u16>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "compute")]
/// start a Compute Node
struct ComputeArgs {
    /// path to the compute node JSON configuration
    #[argh(option, short = 'c')]
    config: PathBuf,

    /// port to listen on, overriding the configuration
    #[argh(option, long = "bind-port")]
    bind_port: Option<u16>,
}

fn run_coordinator(args: CoordinatorArgs) -> Result<()> {
    let mut config = CoordinatorConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(port) = args.bind_port {
        config.bind_port = port;
    }

    let server = CoordinationServer::bind(config)?;
    tracing::info!("Coordination server listening on {}", server.local_addr());
    let report = server.run()?;
    tracing::info!(
        "Session complete: {} lines from {} compute nodes and {} data providers in {}",
        report.lines_written,
        report.compute_nodes,
        report.data_providers,
        report.output_path.display()
    );
    Ok(())
}

fn run_provider(args: ProviderArgs) -> Result<()> {
    let mut config = ProviderConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(port) = args.bind_port {
        config.bind_port = port;
    }

    let name = config.name.clone();
    let provider = DataProvider::bind(config)?;
    tracing::info!("Data provider {} listening on {}", name, provider.local_addr());
    provider
        .run()
        .with_context(|| format!("data provider {} failed", name))
}

fn run_compute(args: ComputeArgs) -> Result<()> {
    let mut config = ComputeConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(port) = args.bind_port {
        config.bind_port = port;
    }

    let node = ComputeNode::bind(config)?;
    tracing::info!("Compute node listening on {}", node.local_addr());
    node.run().context("compute node failed")
}

fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Set default log level to INFO, but allow RUST_LOG env var to override
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Commands::Coordinator(args) => run_coordinator(args),
        Commands::Provider(args) => run_provider(args),
        Commands::Compute(args) => run_compute(args),
    }
}
