//! P0: files that changed on disk are detected and refetched.

use std::sync::Arc;

use mirrorer_core::{DownloadEngine, EngineOptions, HttpClient, MirrorSession};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::support::socket_guard::start_mock_server_or_skip;
use crate::support::state_fixtures::{HELLO_DIGEST, write_output};

#[tokio::test]
async fn p0_verify_then_mirror_repairs_damaged_file() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/doc.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello world".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = tempfile::TempDir::new().expect("temp dir");
    let out = dir.path().join("out");
    let url = format!("{}/doc.txt", mock_server.uri());

    let mut session = MirrorSession::open(dir.path().join("state.json")).expect("open");
    let handle = session.document_mut().add_download(&url).expect("add");
    handle.update(|d| d.mark_completed(11, HELLO_DIGEST.to_string()));
    let file = write_output(&out, &handle.snapshot().out_path, b"bit rot!!!!");

    let report = session.verify(&out).await;
    assert_eq!(report.demoted, [url.clone()]);

    let engine = DownloadEngine::new(
        Arc::new(HttpClient::new().expect("client")),
        EngineOptions {
            concurrency: 1,
            output_root: out.clone(),
            ..EngineOptions::default()
        },
    );
    let (_tx, mut rx) = tokio::sync::mpsc::channel(1);
    let (outcome, result) = session.download(&engine, &mut rx).await;
    result.expect("download");

    assert_eq!(outcome.completed, 1);
    assert_eq!(std::fs::read(&file).expect("read"), b"hello world");
    assert!(handle.is_completed());
}

#[tokio::test]
async fn p0_leftover_partial_file_is_replaced() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello world".to_vec()))
        .mount(&mock_server)
        .await;

    let dir = tempfile::TempDir::new().expect("temp dir");
    let url = format!("{}/big.bin", mock_server.uri());
    let mut session = MirrorSession::open(dir.path().join("state.json")).expect("open");
    let handle = session.document_mut().add_download(&url).expect("add");
    let out_path = handle.snapshot().out_path;
    // A much longer partial from an earlier, interrupted run.
    write_output(dir.path(), &format!("{out_path}.part"), &[0u8; 4096]);

    let engine = DownloadEngine::new(
        Arc::new(HttpClient::new().expect("client")),
        EngineOptions {
            output_root: dir.path().to_path_buf(),
            ..EngineOptions::default()
        },
    );
    let outcome = engine.run(&[handle.clone()]).await;

    assert_eq!(outcome.completed, 1);
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.size, Some(11));
    assert_eq!(snapshot.sha256.as_deref(), Some(HELLO_DIGEST));
    assert_eq!(
        std::fs::read(dir.path().join(&out_path)).expect("read"),
        b"hello world"
    );
}
