use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use secret_common::crypto::{digest, seal, to_base64, SymmetricKey};
use secret_common::sync::{Latch, ShutdownSignal, Slot, Tally};
use secret_common::transport::{Dispatch, FrameHandler, FrameServer, PeerMessenger, TcpMessenger};
use secret_common::{
    ComputeMessage, CoordinatorMessage, Frame, GlobalId, PeerInfo, ProviderMessage, Result,
    Roster, SecretError, SenderId,
};

use crate::attestation::{EvidenceVerifier, KeyDigestVerifier};
use crate::config::ProviderConfig;
use crate::partition::{inspect_allele_file, partition_file};
use crate::phenotype::phenotype_frames;
use crate::sender::data_frames;

/// Per Compute Node key material and pending messages.
struct NodeChannel {
    peer: PeerInfo,
    keys: Vec<SymmetricKey>,
    evidence: Slot<Vec<u8>>,
    /// Phenotype messages, set once the node asked for them.
    phenotypes: Mutex<Option<Vec<Frame>>>,
}

pub(crate) struct ProviderState {
    sender: SenderId,
    self_peer: PeerInfo,
    allele_file: PathBuf,
    phenotype_dir: PathBuf,
    expected_subjects: usize,
    workers: usize,
    max_frame_payload: usize,
    messenger: Arc<dyn PeerMessenger>,
    verifier: Arc<dyn EvidenceVerifier>,
    /// Every other Data Provider.
    peers: Slot<Arc<Vec<PeerInfo>>>,
    nodes: Slot<Arc<Vec<NodeChannel>>>,
    requests: AtomicUsize,
    shards: Slot<Arc<Vec<Mutex<Vec<String>>>>>,
    synced: Tally,
    /// Opens once data is ready and every provider has synced.
    gate: Latch,
    fatal: Mutex<Option<SecretError>>,
    shutdown: ShutdownSignal,
}

impl ProviderState {
    pub(crate) fn new(
        config: &ProviderConfig,
        expected_subjects: usize,
        self_peer: PeerInfo,
        messenger: Arc<dyn PeerMessenger>,
        verifier: Arc<dyn EvidenceVerifier>,
        shutdown: ShutdownSignal,
    ) -> Result<Self> {
        Ok(Self {
            sender: config.sender_id()?,
            self_peer,
            allele_file: config.allele_file.clone(),
            phenotype_dir: config.phenotype_dir.clone(),
            expected_subjects,
            workers: config.workers(),
            max_frame_payload: config.max_frame_payload,
            messenger,
            verifier,
            peers: Slot::new(),
            nodes: Slot::new(),
            requests: AtomicUsize::new(0),
            shards: Slot::new(),
            synced: Tally::new(),
            gate: Latch::new(1),
            fatal: Mutex::new(None),
            shutdown,
        })
    }

    pub(crate) fn is_streaming(&self) -> bool {
        self.gate.is_open()
    }

    pub(crate) fn take_fatal(&self) -> Option<SecretError> {
        self.fatal.lock().take()
    }

    /// Records a fatal error and stops the provider.
    fn fail(&self, err: SecretError) {
        error!("Data provider {} failed: {}", self.sender, err);
        {
            let mut fatal = self.fatal.lock();
            if fatal.is_none() {
                *fatal = Some(err);
            }
        }
        self.gate.open();
        self.shutdown.trigger();
    }

    fn node(&self, id: GlobalId) -> Result<(Arc<Vec<NodeChannel>>, usize)> {
        let nodes = self.nodes.get().ok_or_else(|| {
            SecretError::Protocol(format!("message from compute node {} before the roster", id))
        })?;
        if id.index() >= nodes.len() {
            return Err(SecretError::Protocol(format!("unknown compute node {}", id)));
        }
        Ok((nodes, id.index()))
    }

    fn on_provider_roster(&self, frame: &Frame) -> Result<()> {
        let roster = Roster::parse(frame.text()?, false)?;
        let others: Vec<PeerInfo> = roster
            .into_iter()
            .filter(|peer| !peer.same_endpoint(&self.self_peer))
            .collect();
        info!("Roster lists {} other data providers", others.len());
        if !self.peers.set(Arc::new(others)) {
            warn!("Ignoring repeated data provider roster");
        }
        Ok(())
    }

    fn on_compute_roster(&self, frame: &Frame) -> Result<()> {
        let roster = Roster::parse(frame.text()?, true)?;
        let nodes = roster
            .into_iter()
            .map(|peer| {
                let keys = (0..peer.slots())
                    .map(|_| SymmetricKey::generate())
                    .collect::<Result<Vec<_>>>()?;
                Ok(NodeChannel {
                    peer,
                    keys,
                    evidence: Slot::new(),
                    phenotypes: Mutex::new(None),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let nodes = Arc::new(nodes);
        if !self.nodes.set(nodes.clone()) {
            warn!("Ignoring repeated compute node roster");
            return Ok(());
        }
        info!("Generated slot keys for {} compute nodes", nodes.len());

        let register = format!("{}\t{}", self.self_peer.hostname, self.self_peer.port);
        for node in nodes.iter() {
            let frame = Frame::new(self.sender.clone(), ComputeMessage::Register, register.clone());
            if let Err(e) = self.messenger.send(&node.peer.addr(), frame) {
                self.fail(e);
                return Ok(());
            }
        }
        Ok(())
    }

    fn on_evidence(&self, id: GlobalId, frame: Frame) -> Result<()> {
        let (nodes, index) = self.node(id)?;
        if !nodes[index].evidence.set(frame.payload) {
            warn!("Ignoring repeated evidence from compute node {}", id);
        }
        Ok(())
    }

    fn on_public_key(&self, id: GlobalId, frame: Frame) -> Result<()> {
        let (nodes, index) = self.node(id)?;
        let node = &nodes[index];

        // Evidence and key travel on separate connections.
        let evidence = node.evidence.wait();
        self.verifier
            .verify_evidence(&evidence, &digest(&frame.payload))?;
        info!("Compute node {} attested", id);

        let frames = node
            .keys
            .iter()
            .enumerate()
            .map(|(slot, key)| {
                let sealed = seal(&frame.payload, &key.to_bytes())?;
                Ok(Frame::new(
                    self.sender.clone(),
                    ComputeMessage::SlotKey,
                    format!("{}\t{}", to_base64(&sealed), slot),
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        self.messenger.send_batch(&node.peer.addr(), frames)
    }

    fn on_phenotype_request(&self, id: GlobalId, frame: Frame) -> Result<()> {
        let (nodes, index) = self.node(id)?;
        let node = &nodes[index];
        let names: Vec<String> = frame
            .text()?
            .split('\t')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        let frames = phenotype_frames(&self.sender, &self.phenotype_dir, &names, &node.keys[0]);
        let frames = match frames {
            Ok(frames) => frames,
            Err(e) if e.is_connection_local() => return Err(e),
            Err(e) => {
                self.fail(e);
                return Ok(());
            }
        };
        {
            let mut pending = node.phenotypes.lock();
            if pending.is_some() {
                warn!("Ignoring repeated phenotype request from compute node {}", id);
                return Ok(());
            }
            *pending = Some(frames);
        }

        let requested = self.requests.fetch_add(1, Ordering::AcqRel) + 1;
        debug!("Phenotype request {}/{} from compute node {}", requested, nodes.len(), id);
        if requested == nodes.len() {
            self.prepare_stream(&nodes);
        }
        Ok(())
    }

    /// Partitions the file, syncs with the other providers and opens the gate.
    fn prepare_stream(&self, nodes: &[NodeChannel]) {
        let keys: Vec<Vec<SymmetricKey>> = nodes.iter().map(|node| node.keys.clone()).collect();
        let output =
            partition_file(&self.allele_file, self.expected_subjects, &keys, self.workers);
        let output = match output {
            Ok(output) => output,
            Err(e) => return self.fail(e),
        };
        self.shards
            .set(Arc::new(output.shards.into_iter().map(Mutex::new).collect()));
        info!("Data ready: {} records of {} subjects", output.records, output.subjects);

        let peers = self.peers.wait();
        for peer in peers.iter() {
            let frame = Frame::new(SenderId::sync(), ProviderMessage::Sync, Vec::new());
            if let Err(e) = self.messenger.send(&peer.addr(), frame) {
                return self.fail(e);
            }
        }
        self.synced.wait_until(peers.len());

        info!("All data providers in sync, streaming");
        self.gate.open();
    }

    fn on_data_request(&self, id: GlobalId) -> Result<()> {
        let (nodes, index) = self.node(id)?;
        let node = &nodes[index];

        self.gate.wait();
        if self.fatal.lock().is_some() {
            return Err(SecretError::Connection(format!(
                "data provider {} cannot serve compute node {}",
                self.sender, id
            )));
        }

        let shards = self.shards.wait();
        let records = std::mem::take(&mut *shards[index].lock());
        let record_count = records.len();

        let mut frames = node.phenotypes.lock().take().unwrap_or_default();
        frames.extend(data_frames(&self.sender, records, self.max_frame_payload));
        let data_count = frames.len();

        self.messenger.send_batch(&node.peer.addr(), frames)?;
        info!(
            "Streamed {} records in {} frames to compute node {}",
            record_count, data_count, id
        );
        Ok(())
    }
}

impl FrameHandler for ProviderState {
    fn handle(&self, frame: Frame, peer: SocketAddr) -> Result<()> {
        let kind = frame.kind::<ProviderMessage>()?;
        debug!("{:?} from {} (sender {})", kind, peer, frame.sender);

        match kind {
            ProviderMessage::DpiInfo => self.on_provider_roster(&frame),
            ProviderMessage::ComputeInfo => self.on_compute_roster(&frame),
            ProviderMessage::Evidence => {
                let id = frame.sender.global_id()?;
                self.on_evidence(id, frame)
            }
            ProviderMessage::PublicKey => {
                let id = frame.sender.global_id()?;
                self.on_public_key(id, frame)
            }
            ProviderMessage::PhenotypeRequest => {
                let id = frame.sender.global_id()?;
                self.on_phenotype_request(id, frame)
            }
            ProviderMessage::DataRequest => {
                let id = frame.sender.global_id()?;
                self.on_data_request(id)
            }
            ProviderMessage::Sync => {
                let arrived = self.synced.arrive();
                debug!("Sync {} received", arrived);
                Ok(())
            }
            ProviderMessage::Terminate => {
                info!("Terminate received, shutting down");
                self.shutdown.trigger();
                Ok(())
            }
        }
    }
}

/// A Data Provider bound to its listening port.
pub struct DataProvider {
    server: FrameServer,
    state: Arc<ProviderState>,
    shutdown: ShutdownSignal,
    coordinator: String,
    self_peer: PeerInfo,
}

impl DataProvider {
    pub fn bind(config: ProviderConfig) -> Result<Self> {
        Self::with_parts(
            config,
            Arc::new(TcpMessenger::new()),
            Arc::new(KeyDigestVerifier),
        )
    }

    /// Checks the allele file and binds the listener.
    ///
    /// An empty file or a malformed header fails here, before the provider
    /// talks to anybody.
    pub fn with_parts(
        config: ProviderConfig,
        messenger: Arc<dyn PeerMessenger>,
        verifier: Arc<dyn EvidenceVerifier>,
    ) -> Result<Self> {
        config.validate()?;
        let summary = inspect_allele_file(&config.allele_file)?;
        info!(
            "Allele file {} has {} subjects per record",
            config.allele_file.display(),
            summary.subjects
        );

        let server = FrameServer::bind(&config.bind_addr(), Dispatch::ThreadPerConnection)?;
        let self_peer = PeerInfo::provider(config.hostname.clone(), server.local_addr().port());
        let shutdown = ShutdownSignal::new();
        let state = ProviderState::new(
            &config,
            summary.subjects,
            self_peer.clone(),
            messenger,
            verifier,
            shutdown.clone(),
        )?;

        Ok(Self {
            server,
            state: Arc::new(state),
            shutdown,
            coordinator: config.coordinator.addr(),
            self_peer,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Registers with the Coordination Server and serves until terminated.
    pub fn run(self) -> Result<()> {
        let register = Frame::new(
            self.state.sender.clone(),
            CoordinatorMessage::ProviderRegister,
            self.self_peer.to_string(),
        );
        self.state.messenger.send(&self.coordinator, register)?;
        info!(
            "Data provider {} registered with {}",
            self.state.sender, self.coordinator
        );

        self.server
            .run_with_handler(self.state.clone(), &self.shutdown)?;

        match self.state.take_fatal() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
