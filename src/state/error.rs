//! Error types for the state store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading or saving the state document.
#[derive(Debug, Error)]
pub enum StateError {
    /// Reading or writing the state file failed.
    #[error("IO error on state file {path}: {source}")]
    Io {
        /// The file being read or written.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The document is not well-formed JSON at some stage of loading.
    #[error("corrupt state document ({stage}): {source}")]
    Corrupt {
        /// Which step of loading or saving rejected the document.
        stage: &'static str,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The document declares a schema version this build does not know.
    #[error("unknown state version: {version:?}")]
    UnknownSchemaVersion {
        /// The declared version tag.
        version: String,
    },

    /// One cached entity could not be parsed into its typed view.
    #[error("failed to parse {kind} entity {key:?}: {source}")]
    Entity {
        /// The entity cache name.
        kind: &'static str,
        /// The entity key within the cache.
        key: String,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

impl StateError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a corrupt-document error.
    #[must_use]
    pub fn corrupt(stage: &'static str, source: serde_json::Error) -> Self {
        Self::Corrupt { stage, source }
    }

    /// Creates an entity rehydration error.
    pub fn entity(kind: &'static str, key: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Entity {
            kind,
            key: key.into(),
            source,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_version_display() {
        let error = StateError::UnknownSchemaVersion {
            version: "9".to_string(),
        };
        assert_eq!(error.to_string(), "unknown state version: \"9\"");
    }

    #[test]
    fn test_entity_error_carries_kind_and_key() {
        let source = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        let msg = StateError::entity("wiki", "page-1", source).to_string();
        assert!(msg.contains("wiki"), "Expected kind in: {msg}");
        assert!(msg.contains("page-1"), "Expected key in: {msg}");
    }

    #[test]
    fn test_io_error_carries_path() {
        let error = StateError::io(
            "/tmp/state.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(error.to_string().contains("/tmp/state.json"));
    }
}
