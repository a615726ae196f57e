//! Schema version probing and the chained migration path.
//!
//! Migrations operate on the raw document bytes, one version step at a time,
//! until the document declares [`CURRENT_STATE_VERSION`]. Each step only has
//! to know its own input shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::value::{RawValue, to_raw_value};
use tracing::{debug, info, warn};

use super::error::StateError;

/// Schema version written by this build.
pub const CURRENT_STATE_VERSION: &str = "2";

#[derive(Deserialize)]
struct VersionHeader {
    #[serde(default)]
    version: Option<String>,
}

/// Brings a serialized document up to [`CURRENT_STATE_VERSION`].
///
/// # Errors
///
/// Returns [`StateError::Corrupt`] if any stage cannot parse the document and
/// [`StateError::UnknownSchemaVersion`] for a version this build cannot read.
pub fn upgrade(mut data: Vec<u8>) -> Result<Vec<u8>, StateError> {
    loop {
        let header: VersionHeader = serde_json::from_slice(&data)
            .map_err(|error| StateError::corrupt("version header", error))?;

        match header.version.as_deref() {
            None | Some("" | "1") => {
                info!("migrating state document from version 1");
                data = migrate_v1(&data)?;
            }
            Some(CURRENT_STATE_VERSION) => return Ok(data),
            Some(other) => {
                return Err(StateError::UnknownSchemaVersion {
                    version: other.to_string(),
                });
            }
        }
    }
}

#[derive(Deserialize)]
struct PageEnvelope {
    #[serde(rename = "pageProps", default)]
    page_props: Option<Box<RawValue>>,
}

type RawMap = BTreeMap<String, Box<RawValue>>;

/// Version 1 to 2.
///
/// Version 1 cached `index` and `library` pages inside a `{"pageProps": ..}`
/// envelope and kept page content and static assets in two separate
/// descriptor maps. Version 2 stores bare payloads, renames `index` to
/// `folders` keyed by the last path segment, and has a single `downloads`
/// map in which an `assets` entry replaces a `content` entry for the same URL.
fn migrate_v1(data: &[u8]) -> Result<Vec<u8>, StateError> {
    let mut fields: RawMap =
        serde_json::from_slice(data).map_err(|error| StateError::corrupt("v1 document", error))?;

    fields.remove("version");
    let index = take_envelopes(&mut fields, "index")?;
    let library = take_envelopes(&mut fields, "library")?;
    let content = take_raw_map(&mut fields, "content")?;
    let assets = take_raw_map(&mut fields, "assets")?;

    let mut folders = RawMap::new();
    for (key, payload) in index {
        let slug = folder_slug(&key);
        if folders.insert(slug.to_string(), payload).is_some() {
            warn!(key = %key, slug = %slug, "v1 index entries share a slug; keeping the last");
        }
    }

    let mut downloads = RawMap::new();
    for (url, descriptor) in content.into_iter().chain(assets) {
        if descriptor.get() == "null" {
            warn!(url = %url, "dropping empty v1 download descriptor");
            continue;
        }
        downloads.insert(url, descriptor);
    }

    debug!(
        folders = folders.len(),
        library = library.len(),
        downloads = downloads.len(),
        "v1 migration complete"
    );

    fields.insert("version".to_string(), encode(CURRENT_STATE_VERSION)?);
    fields.insert("folders".to_string(), encode(&folders)?);
    fields.insert("library".to_string(), encode(&library)?);
    fields.insert("downloads".to_string(), encode(&downloads)?);

    serde_json::to_vec(&fields).map_err(|error| StateError::corrupt("v1 migration", error))
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Box<RawValue>, StateError> {
    to_raw_value(value).map_err(|error| StateError::corrupt("v1 migration", error))
}

fn take_raw_map(fields: &mut RawMap, name: &'static str) -> Result<RawMap, StateError> {
    let Some(raw) = fields.remove(name) else {
        return Ok(RawMap::new());
    };
    let map: Option<RawMap> =
        serde_json::from_str(raw.get()).map_err(|error| StateError::corrupt(name, error))?;
    Ok(map.unwrap_or_default())
}

fn take_envelopes(fields: &mut RawMap, name: &'static str) -> Result<RawMap, StateError> {
    let Some(raw) = fields.remove(name) else {
        return Ok(RawMap::new());
    };
    let envelopes: Option<BTreeMap<String, PageEnvelope>> =
        serde_json::from_str(raw.get()).map_err(|error| StateError::corrupt(name, error))?;

    let mut out = RawMap::new();
    for (key, envelope) in envelopes.unwrap_or_default() {
        match envelope.page_props {
            Some(payload) if payload.get() != "null" => {
                out.insert(key, payload);
            }
            _ => warn!(cache = name, key = %key, "dropping v1 entry without page props"),
        }
    }
    Ok(out)
}

/// Last non-empty segment of a v1 index path.
fn folder_slug(key: &str) -> &str {
    let trimmed = key.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((_, slug)) => slug,
        None => trimmed,
    }
}
