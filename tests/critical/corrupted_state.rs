//! P0: damaged or foreign state files must fail loudly and stay untouched.

use mirrorer_core::state;
use mirrorer_core::{MirrorSession, SessionError, StateError};
use serde_json::json;

use crate::support::state_fixtures::write_state;

#[test]
fn p0_truncated_state_file_is_corrupt() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let path = dir.path().join("state.json");
    std::fs::write(&path, br#"{"version": "2", "downloads": {"https://h/a": {"url""#)
        .expect("write state");

    let result = state::load(&path);

    assert!(
        matches!(result, Err(StateError::Corrupt { .. })),
        "expected Corrupt, got {result:?}"
    );
}

#[test]
fn p0_entity_with_wrong_shape_fails_whole_load() {
    let (_dir, path) = write_state(&json!({
        "version": "2",
        "videos": {
            "good": {"uid": "good"},
            "bad": {"uid": ["not", "a", "string"]}
        }
    }));

    let result = state::load(&path);

    match result {
        Err(StateError::Entity { kind, key, .. }) => {
            assert_eq!(kind, "videos");
            assert_eq!(key, "bad");
        }
        other => panic!("expected entity error, got {other:?}"),
    }
}

#[test]
fn p0_failed_open_never_rewrites_state() {
    let (_dir, path) = write_state(&json!({"version": "7"}));
    let before = std::fs::read(&path).expect("read state");

    let result = MirrorSession::open(&path);

    assert!(matches!(
        result,
        Err(SessionError::Load(StateError::UnknownSchemaVersion { .. }))
    ));
    assert_eq!(std::fs::read(&path).expect("read state"), before);
}

#[test]
fn p0_completed_without_digest_is_demoted_on_load() {
    let (_dir, path) = write_state(&json!({
        "version": "2",
        "downloads": {
            "https://h/a": {"url": "https://h/a", "out_path": "h/a", "completed": true}
        }
    }));

    let document = state::load(&path).expect("load state");

    assert_eq!(document.downloads.pending().len(), 1);
}

#[test]
fn p0_stale_temp_file_does_not_affect_load() {
    let (dir, path) = write_state(&json!({"version": "2", "wiki": {"w": {}}}));
    std::fs::write(dir.path().join("state.json.tmp"), b"{garbage").expect("write temp");

    let document = state::load(&path).expect("load state");
    state::save(&document, &path).expect("save state");

    assert_eq!(document.wiki.len(), 1);
    assert!(!dir.path().join("state.json.tmp").exists());
}
