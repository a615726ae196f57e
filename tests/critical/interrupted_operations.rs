//! P0: checkpoints and staged interrupts leave a state file a later run can resume from.

use std::sync::Arc;
use std::time::Duration;

use mirrorer_core::{
    DownloadEngine, DownloadError, EngineOptions, HttpClient, MirrorSession, Notification,
    RunError, SessionError,
};
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::support::socket_guard::start_mock_server_or_skip;
use crate::support::state_fixtures::read_json;

fn engine(root: &std::path::Path, concurrency: usize) -> DownloadEngine {
    DownloadEngine::new(
        Arc::new(HttpClient::new().expect("client")),
        EngineOptions {
            concurrency,
            output_root: root.to_path_buf(),
            ..EngineOptions::default()
        },
    )
}

// Multi-thread like the binary, so the checkpoint save runs in block_in_place.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn p0_checkpoint_saves_state_while_downloads_run() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"slow".to_vec())
                .set_delay(Duration::from_millis(1500)),
        )
        .mount(&mock_server)
        .await;

    let dir = tempfile::TempDir::new().expect("temp dir");
    let state_path = dir.path().join("state.json");
    let mut session = MirrorSession::open(&state_path).expect("open");
    let url = format!("{}/slow.bin", mock_server.uri());
    session.register([url.as_str()]);
    let engine = engine(dir.path(), 1);

    let (tx, mut rx) = mpsc::channel(4);
    let observe = async {
        tx.send(Notification::Checkpoint).await.expect("send");
        tokio::time::sleep(Duration::from_millis(500)).await;
        read_json(&state_path)
    };
    let ((outcome, result), mid_run) = tokio::join!(session.download(&engine, &mut rx), observe);

    assert_eq!(mid_run["version"], "2");
    assert_eq!(mid_run["downloads"][&url]["completed"], false);
    result.expect("download");
    assert_eq!(outcome.completed, 1);
    assert_eq!(read_json(&state_path)["downloads"][&url]["completed"], true);
}

#[tokio::test]
async fn p0_second_interrupt_cancels_and_next_run_resumes() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    // First request stalls; later requests answer immediately.
    Mock::given(method("GET"))
        .and(path("/stall.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"hello world".to_vec())
                .set_delay(Duration::from_secs(30)),
        )
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stall.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello world".to_vec()))
        .mount(&mock_server)
        .await;

    let dir = tempfile::TempDir::new().expect("temp dir");
    let state_path = dir.path().join("state.json");
    let url = format!("{}/stall.bin", mock_server.uri());
    let engine = engine(dir.path(), 1);

    {
        let mut session = MirrorSession::open(&state_path).expect("open");
        session.register([url.as_str()]);

        let (tx, mut rx) = mpsc::channel(4);
        let interrupt = async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            tx.send(Notification::Interrupt).await.expect("send");
            tx.send(Notification::Interrupt).await.expect("send");
        };
        let (result, ()) = tokio::join!(
            tokio::time::timeout(Duration::from_secs(10), session.download(&engine, &mut rx)),
            interrupt
        );

        let (outcome, result) = result.expect("second interrupt must end the run promptly");
        assert!(matches!(result, Err(SessionError::Run(RunError::Interrupted))));
        // The cancelled transfer is still reported per item.
        assert!(matches!(
            outcome.item_errors.as_slice(),
            [Some(DownloadError::Cancelled { .. })]
        ));
        assert_eq!(outcome.completed, 0);
        assert_eq!(read_json(&state_path)["downloads"][&url]["completed"], false);
    }

    let session = MirrorSession::open(&state_path).expect("reopen");
    let (_tx, mut rx) = mpsc::channel(1);
    let (outcome, result) = session.download(&engine, &mut rx).await;
    result.expect("resume");

    assert_eq!(outcome.completed, 1);
    assert_eq!(read_json(&state_path)["downloads"][&url]["completed"], true);
}

#[tokio::test]
async fn p0_first_interrupt_lets_in_flight_item_finish() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"data".to_vec())
                .set_delay(Duration::from_millis(800)),
        )
        .mount(&mock_server)
        .await;

    let dir = tempfile::TempDir::new().expect("temp dir");
    let state_path = dir.path().join("state.json");
    let mut session = MirrorSession::open(&state_path).expect("open");
    let first = format!("{}/1.bin", mock_server.uri());
    let second = format!("{}/2.bin", mock_server.uri());
    session.register([first.as_str(), second.as_str()]);
    let engine = engine(dir.path(), 1);

    let (tx, mut rx) = mpsc::channel(4);
    let interrupt = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(Notification::Interrupt).await.expect("send");
    };
    let ((outcome, result), ()) = tokio::join!(session.download(&engine, &mut rx), interrupt);

    assert!(matches!(result, Err(SessionError::Run(RunError::Interrupted))));
    assert_eq!(outcome.completed, 1);
    assert!(outcome.error.is_none(), "the run error moves into the result");
    let saved = read_json(&state_path);
    assert_eq!(saved["downloads"][&first]["completed"], true);
    assert_eq!(saved["downloads"][&second]["completed"], false);
}
