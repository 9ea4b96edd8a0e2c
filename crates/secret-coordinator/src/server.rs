use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use secret_common::sync::ShutdownSignal;
use secret_common::transport::{Dispatch, FrameHandler, FrameServer, PeerMessenger, TcpMessenger};
use secret_common::{
    ComputeMessage, CoordinatorMessage, Frame, GlobalId, PeerInfo, ProviderMessage, Result,
    SecretError, SenderId, EOF_SENTINEL,
};

use crate::completion::{Completion, SentinelOutcome};
use crate::config::CoordinatorConfig;
use crate::merge::{write_output, MergeFrontier};
use crate::registry::{Registry, RosterRelease};

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub output_path: PathBuf,
    pub lines_written: usize,
    pub compute_nodes: usize,
    pub data_providers: usize,
}

/// Session state shared by every connection worker.
pub(crate) struct Session {
    output_path: PathBuf,
    watchdog_delay: Duration,
    registry: Registry,
    completion: Arc<Completion>,
    messenger: Arc<dyn PeerMessenger>,
    shutdown: ShutdownSignal,
    outcome: Mutex<Option<Result<SessionReport>>>,
}

impl Session {
    pub(crate) fn new(
        config: &CoordinatorConfig,
        messenger: Arc<dyn PeerMessenger>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            output_path: config.output_path.clone(),
            watchdog_delay: config.watchdog_delay(),
            registry: Registry::new(config.compute_count, config.provider_count),
            completion: Arc::new(Completion::new(config.compute_count)),
            messenger,
            shutdown,
            outcome: Mutex::new(None),
        }
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn take_outcome(&self) -> Option<Result<SessionReport>> {
        self.outcome.lock().take()
    }

    fn on_compute_register(&self, frame: &Frame) -> Result<()> {
        let peer = PeerInfo::parse(frame.text()?, true)?;
        let admission = self.registry.register_compute(peer.clone());

        let sent = match admission.id {
            Some(id) => self.messenger.send(
                &peer.addr(),
                Frame::new(SenderId::coordinator(), ComputeMessage::GlobalId, id.to_string()),
            ),
            None => Ok(()),
        };
        if let Some(release) = admission.release {
            self.release_rosters(release);
        }
        sent
    }

    fn on_provider_register(&self, frame: &Frame) -> Result<()> {
        let peer = PeerInfo::parse(frame.text()?, false)?;
        if let Some(release) = self.registry.register_provider(peer) {
            self.release_rosters(release);
        }
        Ok(())
    }

    fn release_rosters(&self, release: RosterRelease) {
        let providers = release.providers.serialize();
        let computes = release.computes.serialize();

        for provider in release.recipients() {
            let frames = vec![
                Frame::new(SenderId::coordinator(), ProviderMessage::DpiInfo, providers.clone()),
                Frame::new(SenderId::coordinator(), ProviderMessage::ComputeInfo, computes.clone()),
            ];
            match self.messenger.send_batch(&provider.addr(), frames) {
                Ok(()) => debug!("Sent rosters to data provider {}", provider.addr()),
                Err(e) => error!("Failed to send rosters to {}: {}", provider.addr(), e),
            }
        }
    }

    fn on_output(&self, origin: GlobalId, frame: Frame) -> Result<()> {
        let text = String::from_utf8(frame.payload)
            .map_err(|e| SecretError::Protocol(format!("output is not UTF-8: {}", e)))?;
        self.completion.push_fragment(origin, text)
    }

    /// Ends the output of `origin`. A payload other than the bare sentinel
    /// carries the origin's last lines.
    fn on_end_of_output(&self, origin: GlobalId, frame: Frame) -> Result<()> {
        let trailing = frame.text()?.trim() != EOF_SENTINEL;
        if trailing && self.completion.is_finished(origin)? {
            warn!("Output from compute node {} after its end of output, ignoring", origin);
            return Ok(());
        }
        if trailing {
            self.on_output(origin, frame)?;
        }

        match self.completion.mark_finished(origin)? {
            SentinelOutcome::Duplicate => {
                warn!("Duplicate end of output from compute node {}, ignoring", origin);
            }
            SentinelOutcome::Pending { first } => {
                info!(
                    "Compute node {} finished ({}/{})",
                    origin,
                    self.completion.finished_count(),
                    self.registry.expected_computes()
                );
                if first {
                    self.start_watchdog();
                }
            }
            SentinelOutcome::Complete { first } => {
                if first {
                    self.start_watchdog();
                }
                info!("Compute node {} finished, every result is in", origin);
                self.finish();
            }
        }
        Ok(())
    }

    /// Reports nodes that are still working once the delay has passed.
    fn start_watchdog(&self) {
        let completion = self.completion.clone();
        let shutdown = self.shutdown.clone();
        let delay = self.watchdog_delay;

        let spawned = thread::Builder::new()
            .name("completion-watchdog".to_string())
            .spawn(move || {
                if shutdown.wait_timeout(delay) {
                    return;
                }
                let missing = completion.unfinished();
                if !missing.is_empty() {
                    let ids: Vec<String> = missing.iter().map(GlobalId::to_string).collect();
                    warn!(
                        "Still waiting for compute nodes [{}] {}s after the first finished",
                        ids.join(", "),
                        delay.as_secs()
                    );
                }
            });
        if let Err(e) = spawned {
            warn!("Could not start completion watchdog: {}", e);
        }
    }

    fn finish(&self) {
        let outcome = self.merge_and_write();
        match &outcome {
            Ok(report) => info!(
                "Wrote {} lines to {}",
                report.lines_written,
                report.output_path.display()
            ),
            Err(e) => error!("Failed to write {}: {}", self.output_path.display(), e),
        }
        *self.outcome.lock() = Some(outcome);

        self.terminate_all();
        self.shutdown.trigger();
    }

    fn merge_and_write(&self) -> Result<SessionReport> {
        let mut frontier = MergeFrontier::new();
        for fragment in self.completion.take_fragments() {
            frontier.push_fragment(&fragment.text);
        }
        debug!("Merging {} output lines", frontier.len());

        let lines_written = write_output(&self.output_path, frontier.drain())?;
        let (providers, computes) = self.registry.all_peers();
        Ok(SessionReport {
            output_path: self.output_path.clone(),
            lines_written,
            compute_nodes: computes.len(),
            data_providers: providers.len(),
        })
    }

    fn terminate_all(&self) {
        let (providers, computes) = self.registry.all_peers();
        let targets = providers
            .iter()
            .map(|p| {
                (p, Frame::new(SenderId::coordinator(), ProviderMessage::Terminate, Vec::new()))
            })
            .chain(computes.iter().map(|p| {
                (p, Frame::new(SenderId::coordinator(), ComputeMessage::Terminate, Vec::new()))
            }));

        thread::scope(|scope| {
            for (peer, frame) in targets {
                let messenger = self.messenger.as_ref();
                scope.spawn(move || {
                    if let Err(e) = messenger.send(&peer.addr(), frame) {
                        warn!("Failed to terminate {}: {}", peer.addr(), e);
                    }
                });
            }
        });
        info!("Sent terminate to every registered peer");
    }
}

impl FrameHandler for Session {
    fn handle(&self, frame: Frame, peer: SocketAddr) -> Result<()> {
        let kind = frame.kind::<CoordinatorMessage>()?;
        debug!("{:?} from {} (sender {})", kind, peer, frame.sender);

        match kind {
            CoordinatorMessage::ComputeRegister => self.on_compute_register(&frame),
            CoordinatorMessage::ProviderRegister => self.on_provider_register(&frame),
            CoordinatorMessage::Output => {
                let origin = frame.sender.global_id()?;
                self.on_output(origin, frame)
            }
            CoordinatorMessage::EndOfOutput => {
                let origin = frame.sender.global_id()?;
                self.on_end_of_output(origin, frame)
            }
        }
    }
}

/// The Coordination Server.
///
/// # Example
///
/// ```no_run
/// use secret_coordinator::{CoordinationServer, CoordinatorConfig};
///
/// let config = CoordinatorConfig::new(2, 3, "results.tsv");
/// let server = CoordinationServer::bind(config).unwrap();
/// println!("listening on {}", server.local_addr());
/// let report = server.run().unwrap();
/// println!("{} lines merged", report.lines_written);
/// ```
pub struct CoordinationServer {
    server: FrameServer,
    session: Arc<Session>,
    shutdown: ShutdownSignal,
}

impl CoordinationServer {
    pub fn bind(config: CoordinatorConfig) -> Result<Self> {
        Self::with_messenger(config, Arc::new(TcpMessenger::new()))
    }

    pub fn with_messenger(
        config: CoordinatorConfig,
        messenger: Arc<dyn PeerMessenger>,
    ) -> Result<Self> {
        config.validate()?;
        let server = FrameServer::bind(&config.bind_addr(), Dispatch::Pool(config.pool_size()))?;
        let shutdown = ShutdownSignal::new();
        let session = Arc::new(Session::new(&config, messenger, shutdown.clone()));

        info!(
            "Coordination server expecting {} compute nodes and {} data providers",
            config.compute_count, config.provider_count
        );
        Ok(Self {
            server,
            session,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Handle to stop the server from another thread.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Serves the session until every result is merged and written.
    pub fn run(self) -> Result<SessionReport> {
        self.server
            .run_with_handler(self.session.clone(), &self.shutdown)?;

        self.session.take_outcome().unwrap_or_else(|| {
            Err(SecretError::Connection(
                "coordination server stopped before every compute node finished".to_string(),
            ))
        })
    }
}
