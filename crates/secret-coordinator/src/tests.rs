//! Session tests driven through the frame handler with a recording messenger.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use secret_common::sync::ShutdownSignal;
use secret_common::transport::{FrameHandler, PeerMessenger};
use secret_common::{
    ComputeMessage, CoordinatorMessage, Frame, GlobalId, ProviderMessage, Result, Roster,
    SecretError, SenderId,
};

use crate::config::CoordinatorConfig;
use crate::server::Session;

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

    fn count_kind<K: secret_common::MessageKind + PartialEq>(&self, addr: &str, kind: K) -> usize {
        self.sent_to(addr)
            .iter()
            .filter(|frame| frame.kind::<K>().ok() == Some(kind))
            .count()
    }
}

impl PeerMessenger for RecordingMessenger {
    fn send(&self, addr: &str, frame: Frame) -> Result<()> {
        self.sent.lock().push((addr.to_string(), frame));
        Ok(())
    }
}

fn peer_addr() -> SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
}

fn session(
    computes: usize,
    providers: usize,
    output: &std::path::Path,
) -> (Session, Arc<RecordingMessenger>, ShutdownSignal) {
    let messenger = Arc::new(RecordingMessenger::default());
    let shutdown = ShutdownSignal::new();
    let config = CoordinatorConfig::new(computes, providers, output);
    let session = Session::new(&config, messenger.clone(), shutdown.clone());
    (session, messenger, shutdown)
}

fn register_compute(session: &Session, port: u16) {
    let frame = Frame::new(
        SenderId::new("enclave").unwrap(),
        CoordinatorMessage::ComputeRegister,
        format!("127.0.0.1\t{}\t2", port),
    );
    session.handle(frame, peer_addr()).unwrap();
}

fn register_provider(session: &Session, port: u16) {
    let frame = Frame::new(
        SenderId::new(format!("dpi{}", port)).unwrap(),
        CoordinatorMessage::ProviderRegister,
        format!("127.0.0.1\t{}", port),
    );
    session.handle(frame, peer_addr()).unwrap();
}

fn output(session: &Session, origin: usize, kind: CoordinatorMessage, text: &str) -> Result<()> {
    let frame = Frame::new(SenderId::compute(GlobalId(origin)), kind, text);
    session.handle(frame, peer_addr())
}

#[test]
fn test_barrier_waits_for_every_registration() {
    let dir = tempfile::tempdir().unwrap();
    let (session, messenger, _) = session(2, 1, &dir.path().join("out.tsv"));

    register_compute(&session, 7001);
    register_provider(&session, 6001);
    assert_eq!(messenger.count_kind("127.0.0.1:6001", ProviderMessage::DpiInfo), 0);
    assert!(!session.registry().is_released());

    register_compute(&session, 7002);
    assert!(session.registry().is_released());
    assert_eq!(messenger.count_kind("127.0.0.1:6001", ProviderMessage::DpiInfo), 1);
    assert_eq!(messenger.count_kind("127.0.0.1:6001", ProviderMessage::ComputeInfo), 1);

    let ids: Vec<Frame> = messenger.sent_to("127.0.0.1:7002");
    assert_eq!(ids.len(), 1);
    assert_eq!(ids[0].text().unwrap(), "1");
    assert_eq!(messenger.sent_to("127.0.0.1:7001")[0].text().unwrap(), "0");

    let provider_frames = messenger.sent_to("127.0.0.1:6001");
    assert_eq!(provider_frames[0].kind::<ProviderMessage>().unwrap(), ProviderMessage::DpiInfo);
    let computes = Roster::parse(provider_frames[1].text().unwrap(), true).unwrap();
    let ports: Vec<u16> = computes.peers().iter().map(|p| p.port).collect();
    assert_eq!(ports, vec![7001, 7002]);
}

#[test]
fn test_late_registrations_do_not_rebroadcast() {
    let dir = tempfile::tempdir().unwrap();
    let (session, messenger, _) = session(1, 1, &dir.path().join("out.tsv"));

    register_provider(&session, 6001);
    register_compute(&session, 7001);
    register_compute(&session, 7002);
    register_provider(&session, 6002);

    assert_eq!(messenger.count_kind("127.0.0.1:6001", ProviderMessage::DpiInfo), 1);
    assert!(messenger.sent_to("127.0.0.1:7002").is_empty());
    assert!(messenger.sent_to("127.0.0.1:6002").is_empty());

    let (providers, computes) = session.registry().all_peers();
    assert_eq!(providers.len(), 2);
    assert_eq!(computes.len(), 2);
}

#[test]
fn test_merge_after_all_sentinels() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.tsv");
    let (session, messenger, shutdown) = session(2, 1, &path);
    register_compute(&session, 7001);
    register_compute(&session, 7002);
    register_provider(&session, 6001);

    output(&session, 0, CoordinatorMessage::Output, "1:100\tA\n2:50\tB").unwrap();
    output(&session, 0, CoordinatorMessage::EndOfOutput, "EOF").unwrap();
    assert!(!path.exists());
    assert!(!shutdown.is_triggered());

    output(&session, 1, CoordinatorMessage::Output, "X:5\tC").unwrap();
    output(&session, 1, CoordinatorMessage::EndOfOutput, "EOF").unwrap();

    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "X:5\tC\n2:50\tB\n1:100\tA\n"
    );
    assert!(shutdown.is_triggered());
    assert_eq!(messenger.count_kind("127.0.0.1:6001", ProviderMessage::Terminate), 1);
    assert_eq!(messenger.count_kind("127.0.0.1:7001", ComputeMessage::Terminate), 1);
    assert_eq!(messenger.count_kind("127.0.0.1:7002", ComputeMessage::Terminate), 1);

    let report = session.take_outcome().unwrap().unwrap();
    assert_eq!(report.lines_written, 3);
    assert_eq!(report.compute_nodes, 2);
}

#[test]
fn test_end_of_output_with_lines_finishes_origin() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.tsv");
    let (session, messenger, shutdown) = session(1, 1, &path);
    register_compute(&session, 7001);
    register_provider(&session, 6001);

    output(&session, 0, CoordinatorMessage::EndOfOutput, "2:50\tB\n1:100\tA").unwrap();

    assert!(shutdown.is_triggered());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "2:50\tB\n1:100\tA\n");
    assert_eq!(messenger.count_kind("127.0.0.1:7001", ComputeMessage::Terminate), 1);
    assert_eq!(session.take_outcome().unwrap().unwrap().lines_written, 2);
}

#[test]
fn test_lines_after_end_of_output_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.tsv");
    let (session, messenger, shutdown) = session(2, 1, &path);
    register_compute(&session, 7001);
    register_compute(&session, 7002);
    register_provider(&session, 6001);

    output(&session, 0, CoordinatorMessage::EndOfOutput, "3:1\tA").unwrap();
    output(&session, 0, CoordinatorMessage::EndOfOutput, "3:2\tB").unwrap();
    assert!(!shutdown.is_triggered());

    output(&session, 1, CoordinatorMessage::EndOfOutput, "1:9\tC").unwrap();
    assert!(shutdown.is_triggered());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "3:1\tA\n1:9\tC\n");
    assert_eq!(messenger.count_kind("127.0.0.1:6001", ProviderMessage::Terminate), 1);
}

#[test]
fn test_duplicate_sentinels_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.tsv");
    let (session, messenger, shutdown) = session(2, 1, &path);
    register_compute(&session, 7001);
    register_compute(&session, 7002);
    register_provider(&session, 6001);

    output(&session, 0, CoordinatorMessage::Output, "1:1\tA").unwrap();
    output(&session, 0, CoordinatorMessage::EndOfOutput, "EOF").unwrap();
    output(&session, 0, CoordinatorMessage::EndOfOutput, "EOF").unwrap();
    assert!(!path.exists());
    assert!(!shutdown.is_triggered());

    output(&session, 1, CoordinatorMessage::EndOfOutput, "EOF").unwrap();
    output(&session, 1, CoordinatorMessage::EndOfOutput, "EOF").unwrap();
    assert!(shutdown.is_triggered());
    assert_eq!(messenger.count_kind("127.0.0.1:6001", ProviderMessage::Terminate), 1);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "1:1\tA\n");
}

#[test]
fn test_output_from_unknown_origin_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (session, _, _) = session(1, 1, &dir.path().join("out.tsv"));

    let err = output(&session, 5, CoordinatorMessage::Output, "1:1\tA").unwrap_err();
    assert!(matches!(err, SecretError::Protocol(_)));

    let bad_sender = Frame::new(SenderId::new("dpi1").unwrap(), CoordinatorMessage::Output, "x");
    assert!(session.handle(bad_sender, peer_addr()).is_err());

    let bad_kind = Frame::decode_body(b"-1 9 ").unwrap();
    assert!(session.handle(bad_kind, peer_addr()).is_err());
}

#[test]
fn test_malformed_registration_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (session, _, _) = session(1, 1, &dir.path().join("out.tsv"));
    let frame = Frame::new(
        SenderId::new("enclave").unwrap(),
        CoordinatorMessage::ComputeRegister,
        "127.0.0.1\t7001",
    );
    assert!(session.handle(frame, peer_addr()).is_err());
    assert!(session.registry().all_peers().1.is_empty());
}
