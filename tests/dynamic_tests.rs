mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use common::{FakeEmulator, config_for_port, spawn_service, write_boot_files};
use firmscan::config::DynamicConfig;
use firmscan::dynamic::fuzz::{default_corpus, fuzz_port};
use firmscan::dynamic::probe::{probe_port, scan_ports};
use firmscan::dynamic::{DynamicAnalysisOrchestrator, SessionState};
use firmscan::scan::FindingKind;
use tempfile::TempDir;
use tokio::net::TcpListener;

fn bootable_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_boot_files(dir.path());
    dir
}

#[tokio::test]
async fn test_scan_reports_only_listening_port() {
    let timeout = Duration::from_millis(300);
    for port in (9000..=9010).filter(|p| *p != 9001) {
        if probe_port("127.0.0.1", port, timeout).await {
            eprintln!("port {} already in use, skipping", port);
            return;
        }
    }
    let Ok(_listener) = TcpListener::bind("127.0.0.1:9001").await else {
        eprintln!("port 9001 unavailable, skipping");
        return;
    };

    let open = scan_ports("127.0.0.1", 9000..=9010, timeout, 50).await;
    assert_eq!(open, BTreeSet::from([9001]));
}

#[tokio::test]
async fn test_fuzz_flags_error_responses() {
    let port = spawn_service(b"HTTP/1.0 500 Internal Server Error\r\n\r\n").await;
    let findings = fuzz_port("127.0.0.1", port, &default_corpus(), Duration::from_secs(2)).await;

    assert_eq!(findings.len(), 5);
    assert_eq!(
        findings[0],
        format!("Possible vulnerability on port {} with payload AAAAAAAAAAAAAAAAAAAA", port)
    );
}

#[tokio::test]
async fn test_fuzz_ignores_clean_responses() {
    let port = spawn_service(b"HTTP/1.0 200 OK\r\n\r\nhello").await;
    let findings = fuzz_port("127.0.0.1", port, &default_corpus(), Duration::from_secs(2)).await;
    assert!(findings.is_empty());
}

#[tokio::test]
async fn test_full_session_against_fake_guest() {
    let port = spawn_service(b"java.lang.RuntimeException: bad input").await;
    let emulator = Arc::new(FakeEmulator::default());
    let orchestrator = DynamicAnalysisOrchestrator::new(emulator.clone(), config_for_port(port));

    let tree = bootable_tree();
    let session = orchestrator.run(tree.path()).await;

    assert_eq!(session.state(), SessionState::Done);
    assert!(emulator.was_terminated());
    assert_eq!(session.open_ports, BTreeSet::from([port]));
    assert_eq!(session.fuzz_findings.len(), 5);
    assert_eq!(session.kernel.as_deref(), Some(tree.path().join("vmlinux").as_path()));

    let findings = session.into_findings();
    assert!(findings.iter().any(|f| f.kind == FindingKind::OpenPort && f.line_or_offset == u64::from(port)));
    assert!(findings.iter().any(|f| f.kind == FindingKind::Timeline));
}

#[tokio::test]
async fn test_missing_artifacts_fail_without_launch() {
    let emulator = Arc::new(FakeEmulator::default());
    let orchestrator = DynamicAnalysisOrchestrator::new(emulator.clone(), config_for_port(1));

    let empty = TempDir::new().unwrap();
    let session = orchestrator.run(empty.path()).await;

    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(emulator.launches(), 0);
    assert!(session
        .timeline
        .iter()
        .any(|line| line.contains("Could not find kernel and rootfs files")));
}

#[tokio::test]
async fn test_sessions_for_one_image_never_overlap() {
    let emulator = Arc::new(FakeEmulator::default());
    let config = DynamicConfig {
        boot_grace: Duration::from_millis(100),
        ..config_for_port(1)
    };
    let orchestrator = Arc::new(DynamicAnalysisOrchestrator::new(emulator.clone(), config));
    let tree = bootable_tree();

    let (a, b) = tokio::join!(orchestrator.run(tree.path()), orchestrator.run(tree.path()));

    assert_eq!(a.state(), SessionState::Done);
    assert_eq!(b.state(), SessionState::Done);
    assert_eq!(emulator.launches(), 2);
    assert_eq!(emulator.max_live(), 1);
}

#[tokio::test]
async fn test_sessions_for_different_images_share_the_guest_slot() {
    let emulator = Arc::new(FakeEmulator::default());
    let config = DynamicConfig {
        boot_grace: Duration::from_millis(100),
        ..config_for_port(1)
    };
    let orchestrator = Arc::new(DynamicAnalysisOrchestrator::new(emulator.clone(), config));
    let first = bootable_tree();
    let second = bootable_tree();

    let (a, b) = tokio::join!(orchestrator.run(first.path()), orchestrator.run(second.path()));

    assert_eq!(a.state(), SessionState::Done);
    assert_eq!(b.state(), SessionState::Done);
    assert_eq!(emulator.launches(), 2);
    assert_eq!(emulator.max_live(), 1);
    assert_eq!(emulator.live(), 0);
}
