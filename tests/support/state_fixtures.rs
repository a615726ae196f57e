//! State documents and output trees shared by integration tests.

use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use tempfile::TempDir;

// sha256("hello world")
pub const HELLO_DIGEST: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

/// A version 1 document as older builds wrote it.
pub fn v1_document() -> Value {
    json!({
        "version": "1",
        "index": {
            "/library/folders/music": {"pageProps": {"slug": "music", "contents": [{"slug": "track-1"}]}},
            "/library/folders/empty": {"notPageProps": true}
        },
        "library": {
            "42": {"pageProps": {
                "itemId": "42",
                "tracks": [{"id": "1", "slug": "intro", "title": "Intro"}],
                "openGraph": {
                    "thumbnail": {"image": "/img/42.jpg", "alt": "cover"},
                    "audio": "https://cdn.example/a.mp3"
                }
            }}
        },
        "content": {
            "https://cdn.example/a.mp3": {
                "url": "https://cdn.example/a.mp3",
                "out_path": "cdn.example/a.mp3",
                "size": 11,
                "sha256": HELLO_DIGEST,
                "completed": true
            }
        },
        "assets": {
            "https://cdn.example/cover.jpg": {
                "url": "https://cdn.example/cover.jpg",
                "out_path": "cdn.example/cover.jpg",
                "completed": false
            }
        },
        "wiki": {"main-page": {"title": "Main"}},
        "settings": {"theme": "dark"}
    })
}

/// Writes `value` as the state file inside a fresh temp dir.
pub fn write_state(value: &Value) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("state.json");
    std::fs::write(&path, serde_json::to_vec_pretty(value).expect("encode state"))
        .expect("write state");
    (dir, path)
}

/// Writes `body` at `root/relative`, creating parent directories.
pub fn write_output(root: &Path, relative: &str, body: &[u8]) -> PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create output dirs");
    }
    std::fs::write(&path, body).expect("write output");
    path
}

pub fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&std::fs::read(path).expect("read state")).expect("parse state")
}
