use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use secret_common::crypto::{from_base64, hex_digest, KeyPair, SymmetricKey};
use secret_common::record::EncryptedRecord;
use secret_common::sync::{ShutdownSignal, Slot};
use secret_common::transport::{
    DataFrame, Dispatch, FrameHandler, FrameServer, PeerMessenger, TcpMessenger,
};
use secret_common::{
    ComputeMessage, CoordinatorMessage, Frame, GlobalId, PeerInfo, ProviderMessage, Result,
    SecretError, SenderId,
};

use crate::config::ComputeConfig;
use crate::engine::{AlleleTallyEngine, ComputeEngine};
use crate::upload::output_frames;

/// What this node knows about one Data Provider.
struct ProviderLink {
    addr: Slot<String>,
    keys: Mutex<Vec<Option<SymmetricKey>>>,
    requested: AtomicBool,
    patient_count: Mutex<Option<usize>>,
    data_frames: AtomicUsize,
    finished: AtomicBool,
}

impl ProviderLink {
    fn new(slots: usize) -> Self {
        Self {
            addr: Slot::new(),
            keys: Mutex::new(vec![None; slots]),
            requested: AtomicBool::new(false),
            patient_count: Mutex::new(None),
            data_frames: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
        }
    }

    fn key(&self, slot: usize) -> Result<SymmetricKey> {
        self.keys
            .lock()
            .get(slot)
            .cloned()
            .flatten()
            .ok_or_else(|| SecretError::Protocol(format!("no key for slot {}", slot)))
    }
}

pub(crate) struct NodeState {
    phenotype_request: String,
    y_val_name: String,
    max_frame_payload: usize,
    coordinator: String,
    key_pair: KeyPair,
    public_pem: Vec<u8>,
    global_id: Slot<GlobalId>,
    providers: HashMap<String, ProviderLink>,
    finished: AtomicUsize,
    engine: Mutex<Box<dyn ComputeEngine>>,
    messenger: Arc<dyn PeerMessenger>,
    fatal: Mutex<Option<SecretError>>,
    shutdown: ShutdownSignal,
}

impl NodeState {
    pub(crate) fn new(
        config: &ComputeConfig,
        engine: Box<dyn ComputeEngine>,
        messenger: Arc<dyn PeerMessenger>,
        shutdown: ShutdownSignal,
    ) -> Result<Self> {
        let key_pair = KeyPair::generate()?;
        let public_pem = key_pair.public_pem()?;
        let providers = config
            .institutions
            .iter()
            .map(|name| (name.clone(), ProviderLink::new(config.thread_count)))
            .collect();

        Ok(Self {
            phenotype_request: config.phenotype_request(),
            y_val_name: config.y_val_name.clone(),
            max_frame_payload: config.max_frame_payload,
            coordinator: config.coordinator.addr(),
            key_pair,
            public_pem,
            global_id: Slot::new(),
            providers,
            finished: AtomicUsize::new(0),
            engine: Mutex::new(engine),
            messenger,
            fatal: Mutex::new(None),
            shutdown,
        })
    }

    pub(crate) fn global_id(&self) -> Option<GlobalId> {
        self.global_id.get()
    }

    pub(crate) fn take_fatal(&self) -> Option<SecretError> {
        self.fatal.lock().take()
    }

    fn fail(&self, err: SecretError) {
        error!("Compute node failed: {}", err);
        {
            let mut fatal = self.fatal.lock();
            if fatal.is_none() {
                *fatal = Some(err);
            }
        }
        self.shutdown.trigger();
    }

    fn link(&self, sender: &SenderId) -> Result<&ProviderLink> {
        self.providers
            .get(sender.as_str())
            .ok_or_else(|| SecretError::Protocol(format!("unexpected data provider {}", sender)))
    }

    fn on_global_id(&self, frame: &Frame) -> Result<()> {
        let id = GlobalId(frame.text()?.trim().parse()?);
        if self.global_id.set(id) {
            info!("Assigned global id {}", id);
        } else {
            warn!("Ignoring repeated global id {}", id);
        }
        Ok(())
    }

    /// Publishes evidence and public key to a provider that announced itself.
    fn on_register(&self, frame: &Frame) -> Result<()> {
        let link = self.link(&frame.sender)?;
        let peer = PeerInfo::parse(frame.text()?, false)?;
        if !link.addr.set(peer.addr()) {
            warn!("Ignoring repeated registration of data provider {}", frame.sender);
            return Ok(());
        }

        let sender = SenderId::compute(self.global_id.wait());
        // The development verifier accepts the key digest as evidence.
        let evidence = hex_digest(&self.public_pem);
        let frames = vec![
            Frame::new(sender.clone(), ProviderMessage::Evidence, evidence),
            Frame::new(sender, ProviderMessage::PublicKey, self.public_pem.clone()),
        ];
        self.messenger.send_batch(&peer.addr(), frames)?;
        debug!("Published public key to data provider {}", frame.sender);
        Ok(())
    }

    fn on_slot_key(&self, frame: &Frame) -> Result<()> {
        let link = self.link(&frame.sender)?;
        let (sealed, slot) = frame
            .text()?
            .split_once('\t')
            .ok_or_else(|| SecretError::Protocol("slot key without slot index".to_string()))?;
        let slot: usize = slot.trim().parse()?;
        let key = SymmetricKey::from_bytes(&self.key_pair.open(&from_base64(sealed)?)?)?;

        let complete = {
            let mut keys = link.keys.lock();
            let capacity = keys.len();
            let entry = keys.get_mut(slot).ok_or_else(|| {
                SecretError::Protocol(format!("slot {} exceeds shard capacity {}", slot, capacity))
            })?;
            *entry = Some(key);
            keys.iter().all(Option::is_some)
        };

        if complete && !link.requested.swap(true, Ordering::AcqRel) {
            info!("Holding every slot key of data provider {}, requesting data", frame.sender);
            let sender = SenderId::compute(self.global_id.wait());
            let request = self.phenotype_request.clone();
            let frames = vec![
                Frame::new(sender.clone(), ProviderMessage::PhenotypeRequest, request),
                Frame::new(sender, ProviderMessage::DataRequest, Vec::new()),
            ];
            self.messenger.send_batch(&link.addr.wait(), frames)?;
        }
        Ok(())
    }

    fn open_text(&self, link: &ProviderLink, sealed: &str) -> Result<String> {
        let plain = link.key(0)?.decrypt(&from_base64(sealed.trim())?)?;
        String::from_utf8(plain)
            .map_err(|e| SecretError::Protocol(format!("phenotype is not UTF-8: {}", e)))
    }

    fn on_phenotype(&self, kind: ComputeMessage, frame: &Frame) -> Result<()> {
        let link = self.link(&frame.sender)?;
        let provider = frame.sender.as_str();

        match kind {
            ComputeMessage::PatientCount => {
                let count: usize = self.open_text(link, frame.text()?)?.trim().parse()?;
                debug!("Data provider {} holds {} subjects", provider, count);
                *link.patient_count.lock() = Some(count);
                Ok(())
            }
            ComputeMessage::YValue => {
                let values = split_values(&self.open_text(link, frame.text()?)?);
                if let Some(count) = *link.patient_count.lock() {
                    if count != values.len() {
                        warn!(
                            "Data provider {} sent {} outcome values for {} subjects",
                            provider,
                            values.len(),
                            count
                        );
                    }
                }
                self.ingest_phenotype(provider, &self.y_val_name, values);
                Ok(())
            }
            _ => {
                let (name, sealed) = frame.text()?.split_once(' ').ok_or_else(|| {
                    SecretError::Protocol("covariant without a name".to_string())
                })?;
                let values = split_values(&self.open_text(link, sealed)?);
                self.ingest_phenotype(provider, name, values);
                Ok(())
            }
        }
    }

    /// A column the engine cannot take ends the session.
    fn ingest_phenotype(&self, provider: &str, name: &str, values: Vec<String>) {
        if let Err(e) = self.engine.lock().ingest_phenotype(provider, name, values) {
            self.fail(e);
        }
    }

    fn ingest_data(&self, link: &ProviderLink, frame: &Frame) -> Result<()> {
        let block = DataFrame::decode(&frame.payload)?;
        let mut decrypted = Vec::with_capacity(block.records.len());
        for line in &block.records {
            let record = EncryptedRecord::decode(line)?;
            let values = record.open(&link.key(record.slot)?)?;
            decrypted.push((record, values));
        }

        let mut engine = self.engine.lock();
        for (record, values) in &decrypted {
            engine.ingest_record(frame.sender.as_str(), record, values)?;
        }
        Ok(())
    }

    fn on_data(&self, frame: &Frame) -> Result<()> {
        let link = self.link(&frame.sender)?;
        if let Err(e) = self.ingest_data(link, frame) {
            self.fail(e);
            return Ok(());
        }
        link.data_frames.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn on_end_of_data(&self, frame: &Frame) -> Result<()> {
        let link = self.link(&frame.sender)?;
        let announced: usize = frame.text()?.trim().parse()?;
        let received = link.data_frames.load(Ordering::Acquire);
        if announced != received {
            self.fail(SecretError::Protocol(format!(
                "data provider {} announced {} data frames, received {}",
                frame.sender, announced, received
            )));
            return Ok(());
        }
        if link.finished.swap(true, Ordering::AcqRel) {
            warn!("Ignoring repeated end of data from {}", frame.sender);
            return Ok(());
        }

        let done = self.finished.fetch_add(1, Ordering::AcqRel) + 1;
        info!(
            "Data provider {} finished with {} frames ({}/{})",
            frame.sender,
            received,
            done,
            self.providers.len()
        );
        if done == self.providers.len() {
            self.upload();
        }
        Ok(())
    }

    /// Sends the engine's results to the Coordination Server.
    fn upload(&self) {
        let lines = self.engine.lock().finish();
        let sender = SenderId::compute(self.global_id.wait());
        let frames = output_frames(&sender, &lines, self.max_frame_payload);
        match self.messenger.send_batch(&self.coordinator, frames) {
            Ok(()) => info!("Uploaded {} result lines", lines.len()),
            Err(e) => self.fail(e),
        }
    }
}

fn split_values(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    text.split('\t').map(str::to_string).collect()
}

impl FrameHandler for NodeState {
    fn handle(&self, frame: Frame, peer: SocketAddr) -> Result<()> {
        let kind = frame.kind::<ComputeMessage>()?;
        debug!("{:?} from {} (sender {})", kind, peer, frame.sender);

        match kind {
            ComputeMessage::GlobalId => self.on_global_id(&frame),
            ComputeMessage::Register => self.on_register(&frame),
            ComputeMessage::SlotKey => self.on_slot_key(&frame),
            ComputeMessage::PatientCount | ComputeMessage::YValue | ComputeMessage::Covariant => {
                self.on_phenotype(kind, &frame)
            }
            ComputeMessage::Data => self.on_data(&frame),
            ComputeMessage::EndOfData => self.on_end_of_data(&frame),
            ComputeMessage::Terminate => {
                info!("Terminate received, shutting down");
                self.shutdown.trigger();
                Ok(())
            }
        }
    }
}

/// A Compute Node bound to its listening port.
pub struct ComputeNode {
    server: FrameServer,
    state: Arc<NodeState>,
    shutdown: ShutdownSignal,
    register: Frame,
}

impl ComputeNode {
    pub fn bind(config: ComputeConfig) -> Result<Self> {
        Self::with_parts(
            config,
            Arc::new(TcpMessenger::new()),
            Box::new(AlleleTallyEngine::new()),
        )
    }

    pub fn with_parts(
        config: ComputeConfig,
        messenger: Arc<dyn PeerMessenger>,
        engine: Box<dyn ComputeEngine>,
    ) -> Result<Self> {
        config.validate()?;
        let server = FrameServer::bind(&config.bind_addr(), Dispatch::ThreadPerConnection)?;
        let self_peer = config.peer_info(server.local_addr().port());
        let register = Frame::new(
            SenderId::new(config.hostname.clone())?,
            CoordinatorMessage::ComputeRegister,
            self_peer.to_string(),
        );

        let shutdown = ShutdownSignal::new();
        let state = NodeState::new(&config, engine, messenger, shutdown.clone())?;
        info!(
            "Compute node with {} slots expecting data from [{}]",
            config.thread_count,
            config.institutions.join(", ")
        );

        Ok(Self {
            server,
            state: Arc::new(state),
            shutdown,
            register,
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
        self.state
            .messenger
            .send(&self.state.coordinator, self.register.clone())?;
        info!("Compute node registered with {}", self.state.coordinator);

        self.server
            .run_with_handler(self.state.clone(), &self.shutdown)?;

        if let Some(err) = self.state.take_fatal() {
            return Err(err);
        }
        match self.state.global_id() {
            Some(id) => info!("Compute node {} stopped", id),
            None => warn!("Compute node stopped before it was assigned a global id"),
        }
        Ok(())
    }
}
