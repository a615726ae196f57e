//! Versioned state persistence.
//!
//! A [`StateDocument`] holds everything a mirror run has discovered: one
//! [`EntityCache`] per entity kind and the [`DownloadRegistry`]. It is loaded
//! once at the start of a run (migrating older schema versions on the way),
//! mutated in memory, and written back with [`save`] at checkpoints and at
//! the end of the run.
//!
//! # On-disk format
//!
//! ```json
//! {
//!   "version": "2",
//!   "folders": { "<slug>": { ... } },
//!   "library": { "<slug>": { ... } },
//!   "chronology": { ... },
//!   "chronicles": { "index": { ... }, "entries": { "<slug>": { ... } } },
//!   "downloads": {
//!     "https://host/a.zip": {
//!       "url": "https://host/a.zip",
//!       "size": 3,
//!       "out_path": "host/a.zip",
//!       "sha256": "...",
//!       "completed": true
//!     }
//!   }
//! }
//! ```
//!
//! Top-level fields this build does not know are kept and written back
//! unchanged.

mod entity;
mod error;
mod migration;

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};
use serde_json::value::RawValue;
use tracing::{debug, info, warn};
use url::Url;

pub use entity::{ChroniclesCache, EntityCache, EntitySlot};
pub use error::StateError;
pub use migration::CURRENT_STATE_VERSION;

use crate::catalog::{
    Chronicle, Chronology, ChroniclesIndex, Content, Entity, Folder, LibraryItem, Post, ReaderItem,
    Video, VideoChannel, WeaponStory, WikiPage,
};
use crate::registry::{DescriptorHandle, DownloadRegistry, RegistryError};

/// The full persisted snapshot of a mirror.
#[derive(Debug, Default)]
pub struct StateDocument {
    pub folders: EntityCache<Folder>,
    pub content: EntityCache<Content>,
    pub library: EntityCache<LibraryItem>,
    pub reader: EntityCache<ReaderItem>,
    pub wiki: EntityCache<WikiPage>,
    pub weapon_stories: EntityCache<WeaponStory>,
    pub chronology: EntitySlot<Chronology>,
    pub posts: EntityCache<Post>,
    pub videos: EntityCache<Video>,
    pub video_channels: EntityCache<VideoChannel>,
    pub chronicles: ChroniclesCache,
    pub downloads: DownloadRegistry,
    extra: BTreeMap<String, Box<RawValue>>,
}

impl StateDocument {
    /// Creates an empty document at the current schema version.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a download; see [`DownloadRegistry::add_download`].
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidUrl`] for an unusable URL.
    pub fn add_download(&mut self, url: &str) -> Result<DescriptorHandle, RegistryError> {
        self.downloads.add_download(url)
    }

    /// Registers every media URL referenced by cached entities.
    ///
    /// Relative URLs are resolved against `base`; without a base they are
    /// skipped. Unusable URLs are logged and skipped. Returns the number of
    /// descriptors that did not exist before.
    pub fn register_entity_assets(&mut self, base: Option<&Url>) -> usize {
        let mut urls = Vec::new();
        collect_assets(&self.folders, &mut urls);
        collect_assets(&self.content, &mut urls);
        collect_assets(&self.library, &mut urls);
        collect_assets(&self.reader, &mut urls);
        collect_assets(&self.wiki, &mut urls);
        collect_assets(&self.weapon_stories, &mut urls);
        if let Some(chronology) = self.chronology.get() {
            push_assets(Chronology::KIND, "", chronology, &mut urls);
        }
        collect_assets(&self.posts, &mut urls);
        collect_assets(&self.videos, &mut urls);
        collect_assets(&self.video_channels, &mut urls);
        if let Some(index) = self.chronicles.index.get() {
            push_assets(ChroniclesIndex::KIND, "index", index, &mut urls);
        }
        collect_assets(&self.chronicles.entries, &mut urls);

        let before = self.downloads.len();
        for (kind, key, url) in urls {
            let resolved = match base {
                Some(base) => base.join(&url),
                None => Url::parse(&url),
            };
            let resolved = match resolved {
                Ok(resolved) => resolved,
                Err(error) => {
                    warn!(kind, key = %key, url = %url, error = %error, "skipping unresolvable asset URL");
                    continue;
                }
            };
            if let Err(error) = self.downloads.add_download(resolved.as_str()) {
                warn!(kind, key = %key, url = %resolved, error = %error, "error adding asset download");
            }
        }

        let added = self.downloads.len() - before;
        debug!(added, "registered entity assets");
        added
    }

    /// Serializes the document with every download's completion flag cleared.
    ///
    /// A mirror importing the exported file re-verifies every file it already
    /// has instead of trusting the exporter's flags.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Corrupt`] if serialization fails.
    pub fn export(&self) -> Result<Vec<u8>, StateError> {
        to_pretty_json(&DocumentView {
            document: self,
            clear_completed: true,
        })
    }

    /// Entity and download counters.
    #[must_use]
    pub fn stats(&self) -> StateStats {
        let mut stats = StateStats {
            entities: vec![
                (Folder::KIND, self.folders.len()),
                (Content::KIND, self.content.len()),
                (LibraryItem::KIND, self.library.len()),
                (ReaderItem::KIND, self.reader.len()),
                (WikiPage::KIND, self.wiki.len()),
                (WeaponStory::KIND, self.weapon_stories.len()),
                (Chronology::KIND, usize::from(self.chronology.is_some())),
                (Post::KIND, self.posts.len()),
                (Video::KIND, self.videos.len()),
                (VideoChannel::KIND, self.video_channels.len()),
                (Chronicle::KIND, self.chronicles.entries.len()),
            ],
            ..StateStats::default()
        };

        for (_, handle) in self.downloads.iter() {
            let descriptor = handle.snapshot();
            stats.downloads += 1;
            if descriptor.completed {
                stats.completed += 1;
                stats.completed_bytes += descriptor.size.unwrap_or(0);
            }
        }
        stats
    }

    fn from_current(data: &[u8]) -> Result<Self, StateError> {
        let mut fields: BTreeMap<String, Box<RawValue>> =
            serde_json::from_slice(data).map_err(|error| StateError::corrupt("document", error))?;
        fields.remove("version");

        let downloads = match fields.remove("downloads") {
            Some(raw) => serde_json::from_str(raw.get())
                .map_err(|error| StateError::corrupt("downloads", error))?,
            None => DownloadRegistry::new(),
        };

        Ok(Self {
            folders: take_cache(&mut fields)?,
            content: take_cache(&mut fields)?,
            library: take_cache(&mut fields)?,
            reader: take_cache(&mut fields)?,
            wiki: take_cache(&mut fields)?,
            weapon_stories: take_cache(&mut fields)?,
            chronology: EntitySlot::from_raw(fields.remove(Chronology::KIND), Chronology::KIND)?,
            posts: take_cache(&mut fields)?,
            videos: take_cache(&mut fields)?,
            video_channels: take_cache(&mut fields)?,
            chronicles: match fields.remove(Chronicle::KIND) {
                Some(raw) => ChroniclesCache::from_raw(&raw)?,
                None => ChroniclesCache::new(),
            },
            downloads,
            extra: fields,
        })
    }
}

impl Serialize for StateDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        DocumentView {
            document: self,
            clear_completed: false,
        }
        .serialize(serializer)
    }
}

struct DocumentView<'a> {
    document: &'a StateDocument,
    clear_completed: bool,
}

impl Serialize for DocumentView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let doc = self.document;
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("version", CURRENT_STATE_VERSION)?;
        map.serialize_entry(Folder::KIND, &doc.folders)?;
        map.serialize_entry(Content::KIND, &doc.content)?;
        map.serialize_entry(LibraryItem::KIND, &doc.library)?;
        map.serialize_entry(ReaderItem::KIND, &doc.reader)?;
        map.serialize_entry(WikiPage::KIND, &doc.wiki)?;
        map.serialize_entry(WeaponStory::KIND, &doc.weapon_stories)?;
        map.serialize_entry(Chronology::KIND, &doc.chronology)?;
        map.serialize_entry(Post::KIND, &doc.posts)?;
        map.serialize_entry(Video::KIND, &doc.videos)?;
        map.serialize_entry(VideoChannel::KIND, &doc.video_channels)?;
        map.serialize_entry(Chronicle::KIND, &doc.chronicles)?;
        if self.clear_completed {
            let mut downloads = doc.downloads.snapshot();
            for descriptor in downloads.values_mut() {
                descriptor.completed = false;
            }
            map.serialize_entry("downloads", &downloads)?;
        } else {
            map.serialize_entry("downloads", &doc.downloads)?;
        }
        for (key, value) in &doc.extra {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Counters reported by [`StateDocument::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateStats {
    /// Entry count per entity cache.
    pub entities: Vec<(&'static str, usize)>,
    pub downloads: usize,
    pub completed: usize,
    pub completed_bytes: u64,
}

impl StateStats {
    /// Downloads not completed yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.downloads - self.completed
    }
}

impl fmt::Display for StateStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (kind, count) in &self.entities {
            writeln!(f, "{kind:<16}{count}")?;
        }
        writeln!(f, "{:<16}{}", "downloads", self.downloads)?;
        writeln!(f, "{:<16}{}", "  completed", self.completed)?;
        writeln!(f, "{:<16}{}", "  pending", self.pending())?;
        write!(f, "{:<16}{}", "  bytes", self.completed_bytes)
    }
}

type AssetRef = (&'static str, String, String);

fn collect_assets<T: Entity>(cache: &EntityCache<T>, out: &mut Vec<AssetRef>) {
    for (key, entity) in cache.iter() {
        push_assets(T::KIND, key, entity, out);
    }
}

fn push_assets<T: Entity>(kind: &'static str, key: &str, entity: &T, out: &mut Vec<AssetRef>) {
    for url in entity.asset_urls() {
        out.push((kind, key.to_string(), url.to_string()));
    }
}

fn take_cache<T: Entity>(
    fields: &mut BTreeMap<String, Box<RawValue>>,
) -> Result<EntityCache<T>, StateError> {
    let Some(raw) = fields.remove(T::KIND) else {
        return Ok(EntityCache::new());
    };
    let entries: Option<BTreeMap<String, Box<RawValue>>> =
        serde_json::from_str(raw.get()).map_err(|error| StateError::corrupt(T::KIND, error))?;
    EntityCache::from_raw(entries.unwrap_or_default())
}

fn to_pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>, StateError> {
    serde_json::to_vec_pretty(value).map_err(|error| StateError::corrupt("serialize", error))
}

/// Loads the state document at `path`, migrating it to the current version.
///
/// A missing file yields an empty document.
///
/// # Errors
///
/// Returns [`StateError::Io`] if the file exists but cannot be read,
/// [`StateError::Corrupt`] or [`StateError::UnknownSchemaVersion`] if it
/// cannot be brought to the current version, and [`StateError::Entity`] if
/// any cached entity fails to parse.
pub fn load(path: &Path) -> Result<StateDocument, StateError> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no state file, starting empty");
            b"{}".to_vec()
        }
        Err(error) => return Err(StateError::io(path, error)),
    };

    let current = migration::upgrade(data)?;
    let document = StateDocument::from_current(&current)?;
    debug!(
        path = %path.display(),
        downloads = document.downloads.len(),
        "loaded state"
    );
    Ok(document)
}

/// Writes `document` to `path` at the current schema version.
///
/// The document is written to a sibling temporary file, synced, and renamed
/// over `path`, so readers see either the old or the new document.
///
/// # Errors
///
/// Returns [`StateError::Io`] if any filesystem step fails.
pub fn save(document: &StateDocument, path: &Path) -> Result<(), StateError> {
    let data = to_pretty_json(document)?;
    let temp = temp_path(path);

    let result = write_synced(&temp, &data).and_then(|()| {
        std::fs::rename(&temp, path).map_err(|error| StateError::io(path, error))
    });
    if result.is_err() {
        let _ = std::fs::remove_file(&temp);
    }
    result?;

    debug!(path = %path.display(), bytes = data.len(), "saved state");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_synced(path: &Path, data: &[u8]) -> Result<(), StateError> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path).map_err(|error| StateError::io(path, error))?;
    file.write_all(data)
        .and_then(|()| file.sync_all())
        .map_err(|error| StateError::io(path, error))
}
