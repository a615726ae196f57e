//! Typed views over cached entity payloads.
//!
//! Each entity kind the mirror caches is a light struct that only parses the
//! fields the mirror acts on (mostly the Open Graph media block). The full
//! payload stays untyped in the state document, so the views can grow or
//! shrink without invalidating anything already fetched.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A cached entity kind.
///
/// A `null` payload is a valid cache entry and reads as the `Default` view.
pub trait Entity: DeserializeOwned + Default + Send + Sync + 'static {
    /// Cache name, as used for the state document field.
    const KIND: &'static str;

    /// Attribute holding the entity's identifier in search hits.
    const ID_FIELD: &'static str;

    /// Open Graph block advertised by the entity page, if any.
    fn open_graph(&self) -> Option<&OpenGraph>;

    /// Media URLs the entity references, possibly relative.
    fn asset_urls(&self) -> Vec<&str> {
        self.open_graph().map(OpenGraph::media_urls).unwrap_or_default()
    }
}

/// Open Graph image reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OgImage {
    pub image: String,
    pub alt: String,
}

/// Open Graph metadata advertised by an entity page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OpenGraph {
    pub title: String,
    pub description: String,
    pub thumbnail: OgImage,
    pub audio: String,
    pub video: String,
}

impl OpenGraph {
    /// Non-empty thumbnail, audio and video URLs, in that order.
    #[must_use]
    pub fn media_urls(&self) -> Vec<&str> {
        [
            self.thumbnail.image.as_str(),
            self.audio.as_str(),
            self.video.as_str(),
        ]
        .into_iter()
        .filter(|url| !url.is_empty())
        .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FolderEntry {
    pub slug: String,
    pub href: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Folder {
    pub open_graph: Option<OpenGraph>,
    pub subfolders: Vec<FolderEntry>,
    pub contents: Vec<FolderEntry>,
}

impl Entity for Folder {
    const KIND: &'static str = "folders";
    const ID_FIELD: &'static str = "slug";

    fn open_graph(&self) -> Option<&OpenGraph> {
        self.open_graph.as_ref()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Content {
    pub open_graph: Option<OpenGraph>,
    pub slug: String,
}

impl Entity for Content {
    const KIND: &'static str = "content";
    const ID_FIELD: &'static str = "slug";

    fn open_graph(&self) -> Option<&OpenGraph> {
        self.open_graph.as_ref()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub slug: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LibraryItem {
    pub open_graph: Option<OpenGraph>,
    pub item_id: String,
    pub tracks: Vec<Track>,
    pub has_content_scans: bool,
}

impl Entity for LibraryItem {
    const KIND: &'static str = "library";
    const ID_FIELD: &'static str = "slug";

    fn open_graph(&self) -> Option<&OpenGraph> {
        self.open_graph.as_ref()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WikiPage {
    pub open_graph: Option<OpenGraph>,
}

impl Entity for WikiPage {
    const KIND: &'static str = "wiki";
    const ID_FIELD: &'static str = "slug";

    fn open_graph(&self) -> Option<&OpenGraph> {
        self.open_graph.as_ref()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Post {
    pub open_graph: Option<OpenGraph>,
}

impl Entity for Post {
    const KIND: &'static str = "posts";
    const ID_FIELD: &'static str = "slug";

    fn open_graph(&self) -> Option<&OpenGraph> {
        self.open_graph.as_ref()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Video {
    pub open_graph: Option<OpenGraph>,
    pub uid: String,
}

impl Entity for Video {
    const KIND: &'static str = "videos";
    const ID_FIELD: &'static str = "uid";

    fn open_graph(&self) -> Option<&OpenGraph> {
        self.open_graph.as_ref()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VideoChannel {
    pub open_graph: Option<OpenGraph>,
    pub uid: String,
}

impl Entity for VideoChannel {
    const KIND: &'static str = "video_channels";
    const ID_FIELD: &'static str = "uid";

    fn open_graph(&self) -> Option<&OpenGraph> {
        self.open_graph.as_ref()
    }
}

/// Uploaded image, as embedded in reader pages.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UploadImage {
    pub name: String,
    pub url: String,
}

/// Page-by-page reader for a library item.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReaderItem {
    pub open_graph: Option<OpenGraph>,
    pub item_slug: String,
    pub page_order: String,
    pub book_type: String,
    pub pages: Vec<UploadImage>,
}

impl Entity for ReaderItem {
    const KIND: &'static str = "reader";
    const ID_FIELD: &'static str = "slug";

    fn open_graph(&self) -> Option<&OpenGraph> {
        self.open_graph.as_ref()
    }

    /// Open Graph media followed by every scanned page.
    fn asset_urls(&self) -> Vec<&str> {
        let mut urls = self.open_graph().map(OpenGraph::media_urls).unwrap_or_default();
        urls.extend(
            self.pages
                .iter()
                .map(|page| page.url.as_str())
                .filter(|url| !url.is_empty()),
        );
        urls
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WeaponStory {
    pub open_graph: Option<OpenGraph>,
    pub primary_name: String,
    pub aliases: Vec<String>,
}

impl Entity for WeaponStory {
    const KIND: &'static str = "weapon_stories";
    const ID_FIELD: &'static str = "slug";

    fn open_graph(&self) -> Option<&OpenGraph> {
        self.open_graph.as_ref()
    }
}

/// The single chronology page. Items and eras are kept untyped.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Chronology {
    pub open_graph: Option<OpenGraph>,
    pub chronology_items: Vec<Value>,
    pub chronology_eras: Vec<Value>,
}

impl Entity for Chronology {
    const KIND: &'static str = "chronology";
    const ID_FIELD: &'static str = "slug";

    fn open_graph(&self) -> Option<&OpenGraph> {
        self.open_graph.as_ref()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChronicleRef {
    pub attributes: Option<SlugAttributes>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SlugAttributes {
    pub slug: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChronicleRefs {
    pub data: Vec<ChronicleRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChapterAttributes {
    pub chronicles: Option<ChronicleRefs>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChapterEntity {
    pub attributes: Option<ChapterAttributes>,
}

/// The chronicles landing page, listing every chapter and its chronicles.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChroniclesIndex {
    pub open_graph: Option<OpenGraph>,
    pub chapters: Vec<ChapterEntity>,
}

impl ChroniclesIndex {
    /// Distinct non-empty chronicle slugs across all chapters.
    #[must_use]
    pub fn chronicle_slugs(&self) -> BTreeSet<&str> {
        self.chapters
            .iter()
            .filter_map(|chapter| chapter.attributes.as_ref()?.chronicles.as_ref())
            .flat_map(|refs| &refs.data)
            .filter_map(|chronicle| chronicle.attributes.as_ref())
            .map(|attributes| attributes.slug.as_str())
            .filter(|slug| !slug.is_empty())
            .collect()
    }
}

impl Entity for ChroniclesIndex {
    const KIND: &'static str = "chronicles";
    const ID_FIELD: &'static str = "slug";

    fn open_graph(&self) -> Option<&OpenGraph> {
        self.open_graph.as_ref()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Chronicle {
    pub open_graph: Option<OpenGraph>,
    pub chronicle: Value,
}

impl Entity for Chronicle {
    const KIND: &'static str = "chronicles";
    const ID_FIELD: &'static str = "slug";

    fn open_graph(&self) -> Option<&OpenGraph> {
        self.open_graph.as_ref()
    }
}

/// Collects the distinct identifiers of `T` from raw search hits.
///
/// Hits without the identifying attribute, or with an empty one, are skipped.
/// Numeric identifiers are rendered in decimal.
#[must_use]
pub fn collect_ids<T: Entity>(hits: &[Value]) -> BTreeSet<String> {
    hits.iter()
        .filter_map(|hit| match hit.get(T::ID_FIELD)? {
            Value::String(id) if !id.is_empty() => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        })
        .collect()
}
