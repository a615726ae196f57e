//! Download registry: the URL-keyed collection of download descriptors.
//!
//! Every remote resource the mirror discovers is registered here exactly once.
//! [`DownloadRegistry::add_download`] is the only mutation surface and it is
//! idempotent: registering a URL twice hands back the same shared
//! [`DescriptorHandle`]. Entries are never removed, so a state document only
//! grows across runs and a file is fetched and verified once.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Errors raised while registering a download.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The URL could not be parsed, or has no host to derive a path from.
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl {
        /// The rejected input.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Persisted record of one remote resource's download progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadDescriptor {
    /// Canonical absolute URL.
    pub url: String,
    /// Length advertised by the server, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    /// Bytes actually written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Output path relative to the mirror root, `host/path/to/resource`.
    #[serde(rename = "out_path", default)]
    pub out_path: String,
    /// Hex-encoded SHA-256 of the content once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// True only once the file is written and its digest is known.
    #[serde(default)]
    pub completed: bool,
}

impl DownloadDescriptor {
    /// Creates a zero-valued descriptor for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>, out_path: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            out_path: out_path.into(),
            ..Self::default()
        }
    }

    /// Returns the recorded digest when it is non-empty.
    #[must_use]
    pub fn digest(&self) -> Option<&str> {
        self.sha256.as_deref().filter(|digest| !digest.is_empty())
    }

    /// Records a verified download.
    ///
    /// A digest that was already recorded is kept: it is what the content was
    /// verified against.
    pub fn mark_completed(&mut self, size: u64, sha256: String) {
        self.size = Some(size);
        if self.digest().is_none() {
            self.sha256 = Some(sha256);
        }
        self.completed = true;
    }

    /// Demotes a descriptor that claims completion without a digest.
    ///
    /// Returns `true` when the descriptor was changed.
    pub fn normalize(&mut self) -> bool {
        if self.completed && self.digest().is_none() {
            self.completed = false;
            return true;
        }
        false
    }
}

/// Shared handle to a descriptor.
///
/// Handles are cheap to clone and all clones point at the same descriptor, so
/// progress recorded by a download worker is visible to the state document
/// that owns the registry without a merge step.
#[derive(Clone)]
pub struct DescriptorHandle(Arc<Mutex<DownloadDescriptor>>);

impl DescriptorHandle {
    /// Wraps a descriptor in a new shared handle.
    #[must_use]
    pub fn new(descriptor: DownloadDescriptor) -> Self {
        Self(Arc::new(Mutex::new(descriptor)))
    }

    fn lock(&self) -> MutexGuard<'_, DownloadDescriptor> {
        // A worker panicking mid-update cannot leave the descriptor in a state
        // worse than "not completed", so a poisoned lock is still usable.
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a copy of the descriptor as it is right now.
    #[must_use]
    pub fn snapshot(&self) -> DownloadDescriptor {
        self.lock().clone()
    }

    /// Mutates the descriptor in place.
    pub fn update<T>(&self, f: impl FnOnce(&mut DownloadDescriptor) -> T) -> T {
        f(&mut self.lock())
    }

    /// The descriptor's URL.
    #[must_use]
    pub fn url(&self) -> String {
        self.lock().url.clone()
    }

    /// Whether the descriptor is completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.lock().completed
    }

    /// Whether two handles refer to the same descriptor object.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for DescriptorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DescriptorHandle")
            .field(&*self.lock())
            .finish()
    }
}

/// Derives the relative output path for a URL: `host[:port]/decoded/path`.
///
/// Empty segments and `.` are dropped and `..` pops, so the result never
/// escapes the host directory. Percent-decoded segments that would introduce a
/// separator keep their encoded form.
///
/// # Errors
///
/// Returns [`RegistryError::InvalidUrl`] if the URL has no host.
pub fn derive_output_path(url: &Url) -> Result<String, RegistryError> {
    let Some(host) = url.host_str() else {
        return Err(RegistryError::InvalidUrl {
            url: url.to_string(),
            reason: "URL has no host".to_string(),
        });
    };

    let mut parts: Vec<String> = Vec::new();
    parts.push(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    });

    let mut segments: Vec<String> = Vec::new();
    for raw in url.path().split('/') {
        let decoded = urlencoding::decode(raw).map_or_else(|_| raw.to_string(), |s| s.into_owned());
        let segment = if decoded.contains('/') || decoded.contains('\\') {
            raw.to_string()
        } else {
            decoded
        };
        match segment.as_str() {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }
    parts.extend(segments);

    Ok(parts.join("/"))
}

/// The URL-keyed collection of download descriptors.
#[derive(Debug, Default, Clone)]
pub struct DownloadRegistry {
    entries: BTreeMap<String, DescriptorHandle>,
}

impl DownloadRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `url`, returning the existing descriptor if it is already known.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidUrl`] if `url` cannot be parsed or has
    /// no host.
    pub fn add_download(&mut self, url: &str) -> Result<DescriptorHandle, RegistryError> {
        if let Some(existing) = self.entries.get(url) {
            return Ok(existing.clone());
        }

        let parsed = Url::parse(url).map_err(|error| RegistryError::InvalidUrl {
            url: url.to_string(),
            reason: error.to_string(),
        })?;
        let canonical = parsed.to_string();
        if let Some(existing) = self.entries.get(&canonical) {
            return Ok(existing.clone());
        }

        let out_path = derive_output_path(&parsed)?;
        debug!(url = %canonical, out_path = %out_path, "registered download");

        let handle = DescriptorHandle::new(DownloadDescriptor::new(canonical.clone(), out_path));
        self.entries.insert(canonical, handle.clone());
        Ok(handle)
    }

    /// Inserts an already-built descriptor under `key`, replacing any entry.
    ///
    /// Used when rehydrating persisted state; discovery code goes through
    /// [`add_download`](Self::add_download).
    pub(crate) fn insert_existing(&mut self, key: String, mut descriptor: DownloadDescriptor) {
        if descriptor.normalize() {
            warn!(
                url = %descriptor.url,
                "descriptor marked completed without a digest; will re-verify"
            );
        }
        self.entries.insert(key, DescriptorHandle::new(descriptor));
    }

    /// Looks up a descriptor by URL.
    #[must_use]
    pub fn get(&self, url: &str) -> Option<&DescriptorHandle> {
        self.entries.get(url)
    }

    /// Number of registered descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(url, handle)` pairs in URL order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &DescriptorHandle)> {
        self.entries.iter()
    }

    /// Descriptors that still need work, in lexicographic URL order.
    #[must_use]
    pub fn pending(&self) -> Vec<DescriptorHandle> {
        self.entries
            .values()
            .filter(|handle| !handle.is_completed())
            .cloned()
            .collect()
    }

    /// Snapshot of every descriptor, keyed by URL.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, DownloadDescriptor> {
        self.entries
            .iter()
            .map(|(key, handle)| (key.clone(), handle.snapshot()))
            .collect()
    }
}

impl Serialize for DownloadRegistry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(
            self.entries
                .iter()
                .map(|(key, handle)| (key, handle.snapshot())),
        )
    }
}

impl<'de> Deserialize<'de> for DownloadRegistry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<BTreeMap<String, DownloadDescriptor>>::deserialize(deserializer)?;
        let mut registry = Self::new();
        for (key, descriptor) in raw.unwrap_or_default() {
            registry.insert_existing(key, descriptor);
        }
        Ok(registry)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_add_download_is_idempotent() {
        let mut registry = DownloadRegistry::new();
        let first = registry.add_download("https://host/a/b.zip").unwrap();
        let second = registry.add_download("https://host/a/b.zip").unwrap();

        assert!(first.ptr_eq(&second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_add_download_does_not_reset_existing_progress() {
        let mut registry = DownloadRegistry::new();
        let handle = registry.add_download("https://host/a/b.zip").unwrap();
        handle.update(|d| d.mark_completed(3, "abc".to_string()));

        let again = registry.add_download("https://host/a/b.zip").unwrap();
        assert!(again.is_completed());
        assert_eq!(again.snapshot().size, Some(3));
    }

    #[test]
    fn test_equivalent_spellings_share_a_descriptor() {
        let mut registry = DownloadRegistry::new();
        let lower = registry.add_download("https://host/a/b.zip").unwrap();
        let upper = registry.add_download("HTTPS://HOST/a/b.zip").unwrap();
        assert!(lower.ptr_eq(&upper));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_output_path_is_host_and_path() {
        let mut registry = DownloadRegistry::new();
        let handle = registry.add_download("https://host/a/b.zip").unwrap();
        assert_eq!(handle.snapshot().out_path, "host/a/b.zip");
    }

    #[test]
    fn test_output_path_keeps_port_and_decodes_segments() {
        let url = Url::parse("http://127.0.0.1:8080/files/My%20Book.pdf").unwrap();
        assert_eq!(
            derive_output_path(&url).unwrap(),
            "127.0.0.1:8080/files/My Book.pdf"
        );
    }

    #[test]
    fn test_output_path_ignores_query_and_collapses_slashes() {
        let url = Url::parse("https://host//a///b.zip?x=1#frag").unwrap();
        assert_eq!(derive_output_path(&url).unwrap(), "host/a/b.zip");
    }

    #[test]
    fn test_output_path_keeps_encoded_separator() {
        let url = Url::parse("https://host/a%2Fb/c").unwrap();
        assert_eq!(derive_output_path(&url).unwrap(), "host/a%2Fb/c");
    }

    #[test]
    fn test_distinct_urls_get_distinct_paths() {
        let mut registry = DownloadRegistry::new();
        let a = registry.add_download("https://host/a/b.zip").unwrap();
        let b = registry.add_download("https://host/a/c.zip").unwrap();
        let c = registry.add_download("https://other/a/b.zip").unwrap();
        let paths = [a, b, c].map(|h| h.snapshot().out_path);
        assert_eq!(paths, ["host/a/b.zip", "host/a/c.zip", "other/a/b.zip"]);
    }

    #[test]
    fn test_invalid_url_rejected() {
        let mut registry = DownloadRegistry::new();
        let result = registry.add_download("not a url");
        assert!(matches!(result, Err(RegistryError::InvalidUrl { .. })));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_hostless_url_rejected() {
        let mut registry = DownloadRegistry::new();
        let result = registry.add_download("mailto:someone@example.com");
        assert!(matches!(result, Err(RegistryError::InvalidUrl { .. })));
    }

    #[test]
    fn test_pending_is_sorted_and_skips_completed() {
        let mut registry = DownloadRegistry::new();
        registry.add_download("https://host/c").unwrap();
        registry
            .add_download("https://host/b")
            .unwrap()
            .update(|d| d.mark_completed(1, "00".to_string()));
        registry.add_download("https://host/a").unwrap();

        let pending: Vec<String> = registry.pending().iter().map(DescriptorHandle::url).collect();
        assert_eq!(pending, ["https://host/a", "https://host/c"]);
    }

    #[test]
    fn test_mark_completed_keeps_recorded_digest() {
        let mut descriptor = DownloadDescriptor::new("https://host/a", "host/a");
        descriptor.sha256 = Some("recorded".to_string());
        descriptor.mark_completed(10, "fresh".to_string());
        assert_eq!(descriptor.sha256.as_deref(), Some("recorded"));
        assert!(descriptor.completed);
    }

    #[test]
    fn test_deserialize_demotes_completed_without_digest() {
        let json = r#"{
            "https://host/a": {"url": "https://host/a", "out_path": "host/a", "completed": true},
            "https://host/b": {"url": "https://host/b", "out_path": "host/b", "sha256": "ab", "completed": true}
        }"#;
        let registry: DownloadRegistry = serde_json::from_str(json).unwrap();
        assert!(!registry.get("https://host/a").unwrap().is_completed());
        assert!(registry.get("https://host/b").unwrap().is_completed());
    }

    #[test]
    fn test_serialize_field_names() {
        let mut registry = DownloadRegistry::new();
        registry
            .add_download("https://host/a")
            .unwrap()
            .update(|d| {
                d.content_length = Some(4);
                d.mark_completed(4, "ff".to_string());
            });
        let value = serde_json::to_value(&registry).unwrap();
        let entry = &value["https://host/a"];
        assert_eq!(entry["url"], "https://host/a");
        assert_eq!(entry["out_path"], "host/a");
        assert_eq!(entry["content_length"], 4);
        assert_eq!(entry["size"], 4);
        assert_eq!(entry["sha256"], "ff");
        assert_eq!(entry["completed"], true);
    }
}
