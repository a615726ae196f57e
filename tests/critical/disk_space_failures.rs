//! P0: a full output device cancels the batch and is reported as such.

use std::sync::Arc;

use mirrorer_core::{
    DownloadEngine, DownloadError, EngineOptions, HttpClient, MirrorSession, RunError,
    SessionError,
};
use wiremock::matchers::method;
use wiremock::{Mock, ResponseTemplate};

use crate::support::socket_guard::start_mock_server_or_skip;

/// Routes the first item's partial file to `/dev/full` so its write fails with ENOSPC.
#[cfg(target_os = "linux")]
#[tokio::test]
async fn p0_full_disk_cancels_batch_and_saves_state() {
    if !std::path::Path::new("/dev/full").exists() {
        eprintln!("skipping: /dev/full not available");
        return;
    }
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 1024]))
        .mount(&mock_server)
        .await;

    let dir = tempfile::TempDir::new().expect("temp dir");
    let state_path = dir.path().join("state.json");
    let mut session = MirrorSession::open(&state_path).expect("open");
    let full = session
        .document_mut()
        .add_download(&format!("{}/a-full.bin", mock_server.uri()))
        .expect("add");
    let next = session
        .document_mut()
        .add_download(&format!("{}/b-next.bin", mock_server.uri()))
        .expect("add");

    let final_path = dir.path().join(full.snapshot().out_path);
    std::fs::create_dir_all(final_path.parent().expect("parent")).expect("mkdir");
    let mut partial = final_path.clone().into_os_string();
    partial.push(".part");
    std::os::unix::fs::symlink("/dev/full", &partial).expect("symlink");

    let engine = DownloadEngine::new(
        Arc::new(HttpClient::new().expect("client")),
        EngineOptions {
            concurrency: 1,
            output_root: dir.path().to_path_buf(),
            ..EngineOptions::default()
        },
    );
    let (_tx, mut rx) = tokio::sync::mpsc::channel(1);
    let (outcome, result) = session.download(&engine, &mut rx).await;

    match result {
        Err(SessionError::Run(RunError::NoSpace { url, .. })) => assert_eq!(url, full.url()),
        other => panic!("expected NoSpace, got {other:?}"),
    }
    assert!(matches!(
        outcome.item_errors.as_slice(),
        [Some(DownloadError::NoSpace { .. }), None]
    ));
    assert!(!full.is_completed());
    assert!(!next.is_completed(), "batch must stop after the device fills");
    assert!(!final_path.exists());
    assert!(state_path.exists(), "state is saved even when the run fails");
}

#[test]
fn p0_storage_full_maps_to_no_space() {
    let error = DownloadError::io(
        "https://h/a",
        "/out/h/a.part",
        std::io::Error::from(std::io::ErrorKind::StorageFull),
    );
    assert!(error.is_no_space());
    assert!(matches!(error, DownloadError::NoSpace { .. }));

    let other = DownloadError::io(
        "https://h/a",
        "/out/h/a.part",
        std::io::Error::from(std::io::ErrorKind::PermissionDenied),
    );
    assert!(!other.is_no_space());
}
