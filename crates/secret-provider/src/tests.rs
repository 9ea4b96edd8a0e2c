//! Provider protocol tests driven through the frame handler.

use std::fs;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use secret_common::config::CoordinatorAddr;
use secret_common::crypto::{from_base64, hex_digest, KeyPair, SymmetricKey};
use secret_common::record::EncryptedRecord;
use secret_common::sync::ShutdownSignal;
use secret_common::transport::{DataFrame, FrameHandler, PeerMessenger};
use secret_common::{
    ComputeMessage, Frame, GlobalId, PeerInfo, ProviderMessage, Result, SecretError, SenderId,
};

use crate::attestation::KeyDigestVerifier;
use crate::config::ProviderConfig;
use crate::partition::shard_of;
use crate::provider::ProviderState;

const SELF_PORT: u16 = 6001;
const NODE_ADDR: &str = "127.0.0.1:7001";

#[derive(Default)]
struct RecordingMessenger {
    sent: Mutex<Vec<(String, Frame)>>,
}

impl RecordingMessenger {
    fn sent_to(&self, addr: &str) -> Vec<Frame> {
        self.sent
            .lock()
            .iter()
            .filter(|(to, _)| to == addr)
            .map(|(_, frame)| frame.clone())
            .collect()
    }
}

impl PeerMessenger for RecordingMessenger {
    fn send(&self, addr: &str, frame: Frame) -> Result<()> {
        self.sent.lock().push((addr.to_string(), frame));
        Ok(())
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    state: Arc<ProviderState>,
    messenger: Arc<RecordingMessenger>,
    shutdown: ShutdownSignal,
}

fn fixture(records: usize, with_phenotypes: bool) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let alleles = dir.path().join("alleles.tsv");
    let mut file = fs::File::create(&alleles).unwrap();
    writeln!(file, "locus\talleles\tp0\tp1\tp2").unwrap();
    for r in 0..records {
        writeln!(file, "{}:{}\tC/T\t{}\t{}\tNA", r % 3 + 1, 500 + r, r % 3, (r + 1) % 3).unwrap();
    }

    if with_phenotypes {
        fs::write(dir.path().join("bmi.tsv"), "id\tbmi\np0\t21.5\np1\t30.1\np2\t25.0\n").unwrap();
        let case = "id\tcase\np0\ttrue\np1\tfalse\np2\ttrue\n";
        fs::write(dir.path().join("case.tsv"), case).unwrap();
    }

    let mut config = ProviderConfig::new("dpi1", &alleles, CoordinatorAddr::new("127.0.0.1", 8500));
    config.phenotype_dir = dir.path().to_path_buf();
    config.worker_count = Some(3);
    config.max_frame_payload = 512;

    let messenger = Arc::new(RecordingMessenger::default());
    let shutdown = ShutdownSignal::new();
    let state = ProviderState::new(
        &config,
        3,
        PeerInfo::provider("127.0.0.1", SELF_PORT),
        messenger.clone(),
        Arc::new(KeyDigestVerifier),
        shutdown.clone(),
    )
    .unwrap();

    Fixture {
        _dir: dir,
        state: Arc::new(state),
        messenger,
        shutdown,
    }
}

fn peer() -> SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
}

fn from_coordinator(state: &ProviderState, kind: ProviderMessage, payload: &str) {
    state
        .handle(Frame::new(SenderId::coordinator(), kind, payload), peer())
        .unwrap();
}

fn from_node(
    state: &ProviderState,
    kind: ProviderMessage,
    payload: impl Into<Vec<u8>>,
) -> Result<()> {
    state.handle(Frame::new(SenderId::compute(GlobalId(0)), kind, payload), peer())
}

fn open_rosters(state: &ProviderState, providers: &str) {
    from_coordinator(state, ProviderMessage::DpiInfo, providers);
    from_coordinator(state, ProviderMessage::ComputeInfo, "127.0.0.1\t7001\t2");
}

/// Runs the key exchange and returns the node's slot keys.
fn attest(fixture: &Fixture) -> Vec<SymmetricKey> {
    let pair = KeyPair::generate().unwrap();
    let pem = pair.public_pem().unwrap();
    from_node(&fixture.state, ProviderMessage::Evidence, hex_digest(&pem)).unwrap();
    from_node(&fixture.state, ProviderMessage::PublicKey, pem).unwrap();

    let mut keys: Vec<(usize, SymmetricKey)> = fixture
        .messenger
        .sent_to(NODE_ADDR)
        .iter()
        .filter(|f| f.kind::<ComputeMessage>().unwrap() == ComputeMessage::SlotKey)
        .map(|f| {
            let (sealed, slot) = f.text().unwrap().split_once('\t').unwrap();
            let opened = pair.open(&from_base64(sealed).unwrap()).unwrap();
            (slot.parse().unwrap(), SymmetricKey::from_bytes(&opened).unwrap())
        })
        .collect();
    keys.sort_by_key(|(slot, _)| *slot);
    keys.into_iter().map(|(_, key)| key).collect()
}

#[test]
fn test_compute_roster_triggers_register() {
    let fixture = fixture(5, true);
    open_rosters(&fixture.state, "127.0.0.1\t6001");

    let sent = fixture.messenger.sent_to(NODE_ADDR);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind::<ComputeMessage>().unwrap(), ComputeMessage::Register);
    assert_eq!(sent[0].text().unwrap(), "127.0.0.1\t6001");
    assert_eq!(sent[0].sender.as_str(), "dpi1");
}

#[test]
fn test_full_exchange_streams_every_record() {
    let fixture = fixture(60, true);
    open_rosters(&fixture.state, "127.0.0.1\t6001");
    let keys = attest(&fixture);
    assert_eq!(keys.len(), 2);

    from_node(&fixture.state, ProviderMessage::PhenotypeRequest, "1\tbmi\tcase").unwrap();
    assert!(fixture.state.is_streaming());
    from_node(&fixture.state, ProviderMessage::DataRequest, Vec::new()).unwrap();

    let sent = fixture.messenger.sent_to(NODE_ADDR);
    let kinds: Vec<ComputeMessage> =
        sent.iter().map(|f| f.kind::<ComputeMessage>().unwrap()).collect();
    let stream_start = kinds.iter().position(|k| *k == ComputeMessage::PatientCount).unwrap();
    assert_eq!(kinds[stream_start + 1], ComputeMessage::YValue);
    assert_eq!(kinds[stream_start + 2], ComputeMessage::Covariant);
    assert_eq!(*kinds.last().unwrap(), ComputeMessage::EndOfData);

    let data: Vec<&Frame> = sent
        .iter()
        .filter(|f| f.kind::<ComputeMessage>().unwrap() == ComputeMessage::Data)
        .collect();
    assert!(data.len() >= 2);
    assert_eq!(sent.last().unwrap().text().unwrap(), data.len().to_string());

    let records: Vec<EncryptedRecord> = data
        .iter()
        .flat_map(|f| DataFrame::decode(&f.payload).unwrap().records)
        .map(|line| EncryptedRecord::decode(&line).unwrap())
        .collect();
    assert_eq!(records.len(), 60);
    for record in &records {
        assert_eq!(shard_of(&record.locus, 1), 0);
        let values = record.open(&keys[record.slot]).unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values[2], secret_common::record::MISSING);
    }
}

#[test]
fn test_bad_evidence_withholds_keys() {
    let fixture = fixture(5, true);
    open_rosters(&fixture.state, "127.0.0.1\t6001");

    let pair = KeyPair::generate().unwrap();
    from_node(&fixture.state, ProviderMessage::Evidence, "forged").unwrap();
    let pem = pair.public_pem().unwrap();
    let err = from_node(&fixture.state, ProviderMessage::PublicKey, pem).unwrap_err();
    assert!(matches!(err, SecretError::Attestation(_)));

    let sent = fixture.messenger.sent_to(NODE_ADDR);
    assert!(sent
        .iter()
        .all(|f| f.kind::<ComputeMessage>().unwrap() != ComputeMessage::SlotKey));
}

#[test]
fn test_stream_waits_for_provider_sync() {
    let fixture = fixture(10, true);
    open_rosters(&fixture.state, "127.0.0.1\t6001\n127.0.0.1\t6002");
    attest(&fixture);

    let state = fixture.state.clone();
    let pipeline = thread::spawn(move || {
        from_node(&state, ProviderMessage::PhenotypeRequest, "case").unwrap();
    });

    for _ in 0..200 {
        if !fixture.messenger.sent_to("127.0.0.1:6002").is_empty() {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    let sync = fixture.messenger.sent_to("127.0.0.1:6002");
    assert_eq!(sync.len(), 1);
    assert_eq!(sync[0].sender, SenderId::sync());
    assert!(fixture.messenger.sent_to("127.0.0.1:6001").is_empty());
    assert!(!fixture.state.is_streaming());

    fixture
        .state
        .handle(Frame::new(SenderId::sync(), ProviderMessage::Sync, Vec::new()), peer())
        .unwrap();
    pipeline.join().unwrap();
    assert!(fixture.state.is_streaming());
}

#[test]
fn test_missing_phenotype_is_fatal() {
    let fixture = fixture(5, false);
    open_rosters(&fixture.state, "127.0.0.1\t6001");
    attest(&fixture);

    from_node(&fixture.state, ProviderMessage::PhenotypeRequest, "case").unwrap();
    assert!(fixture.shutdown.is_triggered());
    assert!(from_node(&fixture.state, ProviderMessage::DataRequest, Vec::new()).is_err());
    assert!(matches!(fixture.state.take_fatal(), Some(SecretError::Config(_))));
}

#[test]
fn test_terminate_stops_provider() {
    let fixture = fixture(5, true);
    from_coordinator(&fixture.state, ProviderMessage::Terminate, "");
    assert!(fixture.shutdown.is_triggered());
}

#[test]
fn test_messages_before_roster_are_rejected() {
    let fixture = fixture(5, true);
    let err = from_node(&fixture.state, ProviderMessage::Evidence, "x").unwrap_err();
    assert!(matches!(err, SecretError::Protocol(_)));

    let bad_sender = Frame::new(SenderId::new("dpi2").unwrap(), ProviderMessage::PublicKey, "x");
    assert!(fixture.state.handle(bad_sender, peer()).is_err());
}

#[test]
fn test_bind_rejects_empty_allele_file() {
    let dir = tempfile::tempdir().unwrap();
    let alleles = dir.path().join("alleles.tsv");
    fs::write(&alleles, "locus\talleles\tp0\n").unwrap();
    let config = ProviderConfig::new("dpi1", &alleles, CoordinatorAddr::new("127.0.0.1", 1));

    let err = crate::DataProvider::bind(config).err().unwrap();
    assert!(matches!(err, SecretError::EmptyInput(_)));
}
