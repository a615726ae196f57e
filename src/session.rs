//! A mirror session: load state, register work, download, save.
//!
//! The session exclusively owns the [`StateDocument`]. Download workers only
//! see descriptor handles, so the document is never merged back after a run;
//! saving it captures whatever the workers recorded.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};
use url::Url;

use crate::controller::Notification;
use crate::download::{DownloadEngine, RunError, RunOutcome};
use crate::integrity::file_matches_digest;
use crate::state::{self, StateDocument, StateError};

/// Errors that end a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The state file could not be loaded.
    #[error("failed to load state: {0}")]
    Load(#[source] StateError),

    /// The download run failed; state was saved.
    #[error(transparent)]
    Run(RunError),

    /// The state file could not be saved.
    #[error("failed to save state: {0}")]
    Save(#[source] StateError),

    /// The download run failed and saving state failed too.
    #[error("{run}; saving state also failed: {save}")]
    RunAndSave {
        /// The run failure.
        run: RunError,
        /// The save failure.
        #[source]
        save: StateError,
    },
}

/// Result of [`MirrorSession::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Completed downloads that were re-hashed.
    pub checked: usize,
    /// URLs whose file was missing or did not match, now marked incomplete.
    pub demoted: Vec<String>,
}

/// A loaded state document bound to its file.
#[derive(Debug)]
pub struct MirrorSession {
    state_path: PathBuf,
    document: StateDocument,
}

impl MirrorSession {
    /// Loads (or starts) the state document at `state_path`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Load`] if the file exists but cannot be read,
    /// migrated or parsed.
    pub fn open(state_path: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let state_path = state_path.into();
        let document = state::load(&state_path).map_err(SessionError::Load)?;
        Ok(Self {
            state_path,
            document,
        })
    }

    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    #[must_use]
    pub fn document(&self) -> &StateDocument {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut StateDocument {
        &mut self.document
    }

    /// Registers URLs, logging and skipping the ones that cannot be used.
    ///
    /// Returns the number of URLs accepted.
    pub fn register<'a>(&mut self, urls: impl IntoIterator<Item = &'a str>) -> usize {
        let mut accepted = 0;
        for url in urls {
            match self.document.add_download(url) {
                Ok(_) => accepted += 1,
                Err(error) => warn!(url, error = %error, "skipping URL"),
            }
        }
        accepted
    }

    /// Registers media referenced by cached entities; see
    /// [`StateDocument::register_entity_assets`].
    pub fn register_entity_assets(&mut self, base: Option<&Url>) -> usize {
        self.document.register_entity_assets(base)
    }

    /// Writes the document to its state file.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`StateError`].
    pub fn save(&self) -> Result<(), StateError> {
        state::save(&self.document, &self.state_path)
    }

    /// Downloads every pending descriptor, then saves.
    ///
    /// Checkpoint notifications save the document mid-run. The final save is
    /// attempted whatever the run's result, and a save failure is reported
    /// together with the run failure rather than replacing it.
    ///
    /// The outcome is returned even when the run or the save failed, so
    /// per-item errors can still be reported. Its `error` is moved into the
    /// returned result: [`SessionError::Run`], [`SessionError::Save`] or
    /// [`SessionError::RunAndSave`].
    #[instrument(skip_all, fields(state = %self.state_path.display()))]
    pub async fn download(
        &self,
        engine: &DownloadEngine,
        notifications: &mut mpsc::Receiver<Notification>,
    ) -> (RunOutcome, Result<(), SessionError>) {
        let pending = self.document.downloads.pending();
        info!(
            pending = pending.len(),
            total = self.document.downloads.len(),
            "downloading pending items"
        );

        let mut outcome = engine
            .run_supervised(&pending, notifications, || self.save())
            .await;

        let result = self.finish(outcome.error.take());
        (outcome, result)
    }

    /// Saves the document after a run, joining a save failure with `error`.
    ///
    /// # Errors
    ///
    /// Returns `error` (as [`SessionError::Run`]) if the save succeeds, and
    /// [`SessionError::Save`] or [`SessionError::RunAndSave`] if it fails.
    pub fn finish(&self, error: Option<RunError>) -> Result<(), SessionError> {
        match (error, self.save()) {
            (None, Ok(())) => Ok(()),
            (Some(run), Ok(())) => Err(SessionError::Run(run)),
            (None, Err(save)) => Err(SessionError::Save(save)),
            (Some(run), Err(save)) => Err(SessionError::RunAndSave { run, save }),
        }
    }

    /// Re-hashes every completed download under `output_root`.
    ///
    /// Downloads whose file is missing, unreadable or does not match the
    /// recorded digest are marked incomplete so the next run fetches them.
    /// The caller decides whether to save.
    pub async fn verify(&self, output_root: &Path) -> VerifyReport {
        let mut report = VerifyReport::default();
        for (url, handle) in self.document.downloads.iter() {
            let descriptor = handle.snapshot();
            if !descriptor.completed {
                continue;
            }
            report.checked += 1;

            let path = output_root.join(&descriptor.out_path);
            let intact = match descriptor.digest() {
                Some(expected) => file_matches_digest(&path, expected).await.is_some(),
                None => false,
            };
            if !intact {
                warn!(url = %url, path = %path.display(), "file missing or corrupt, marking incomplete");
                handle.update(|d| d.completed = false);
                report.demoted.push(url.clone());
            }
        }
        info!(
            checked = report.checked,
            demoted = report.demoted.len(),
            "verification finished"
        );
        report
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    // sha256("hello world")
    const HELLO_DIGEST: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_register_skips_invalid_urls() {
        let dir = TempDir::new().unwrap();
        let mut session = MirrorSession::open(dir.path().join("state.json")).unwrap();
        let accepted = session.register(["https://host/a", "not a url", "https://host/a"]);
        assert_eq!(accepted, 2);
        assert_eq!(session.document().downloads.len(), 1);
    }

    #[test]
    fn test_finish_joins_run_and_save_errors() {
        let dir = TempDir::new().unwrap();
        let session = MirrorSession::open(dir.path().join("missing-dir/state.json")).unwrap();

        let result = session.finish(Some(RunError::Interrupted));
        match result {
            Err(SessionError::RunAndSave { run, save }) => {
                assert_eq!(run, RunError::Interrupted);
                assert!(matches!(save, StateError::Io { .. }));
            }
            other => panic!("expected joined error, got {other:?}"),
        }
    }

    #[test]
    fn test_finish_reports_run_error_after_saving() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let session = MirrorSession::open(&path).unwrap();

        let result = session.finish(Some(RunError::Aborted));
        assert!(matches!(result, Err(SessionError::Run(RunError::Aborted))));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_verify_demotes_missing_and_corrupt_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("out");
        std::fs::create_dir_all(root.join("host")).unwrap();
        std::fs::write(root.join("host/good"), b"hello world").unwrap();
        std::fs::write(root.join("host/bad"), b"hello world!").unwrap();

        let mut session = MirrorSession::open(dir.path().join("state.json")).unwrap();
        for name in ["good", "bad", "gone"] {
            session
                .document_mut()
                .add_download(&format!("https://host/{name}"))
                .unwrap()
                .update(|d| d.mark_completed(11, HELLO_DIGEST.to_string()));
        }
        session.document_mut().add_download("https://host/pending").unwrap();

        let report = session.verify(&root).await;

        assert_eq!(report.checked, 3);
        assert_eq!(report.demoted, ["https://host/bad", "https://host/gone"]);
        let downloads = &session.document().downloads;
        assert!(downloads.get("https://host/good").unwrap().is_completed());
        assert!(!downloads.get("https://host/bad").unwrap().is_completed());
    }
}
