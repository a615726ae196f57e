//! Entity caches with a persisted raw form and a derived typed view.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::value::RawValue;

use super::error::StateError;
use crate::catalog::{Chronicle, ChroniclesIndex, Entity};

/// A keyed cache of one entity kind.
///
/// The raw payload of every entry is the durable source of truth and is the
/// only thing serialized. The typed view is re-derived from it on load, so an
/// entry is either present in both maps or in neither.
pub struct EntityCache<T> {
    raw: BTreeMap<String, Box<RawValue>>,
    parsed: BTreeMap<String, T>,
}

impl<T> Default for EntityCache<T> {
    fn default() -> Self {
        Self {
            raw: BTreeMap::new(),
            parsed: BTreeMap::new(),
        }
    }
}

impl<T> fmt::Debug for EntityCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCache")
            .field("keys", &self.raw.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<T: Entity> EntityCache<T> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a cache from persisted raw payloads and derives every typed view.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Entity`] for the first payload that does not
    /// parse; no partially rehydrated cache is produced.
    pub(crate) fn from_raw(raw: BTreeMap<String, Box<RawValue>>) -> Result<Self, StateError> {
        let mut parsed = BTreeMap::new();
        for (key, payload) in &raw {
            let view = parse_view::<T>(key, payload)?;
            parsed.insert(key.clone(), view);
        }
        Ok(Self { raw, parsed })
    }

    /// Stores a fetched payload under `key`, replacing any previous entry.
    ///
    /// The payload is parsed before anything is stored, so a payload that
    /// does not fit the typed view leaves the cache unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Entity`] if the payload does not parse.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        payload: Box<RawValue>,
    ) -> Result<&T, StateError> {
        let key = key.into();
        let view = parse_view::<T>(&key, &payload)?;
        self.raw.insert(key.clone(), payload);
        let slot = match self.parsed.entry(key) {
            Entry::Occupied(mut entry) => {
                entry.insert(view);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(view),
        };
        Ok(slot)
    }

    /// Like [`insert`](Self::insert), for an already-decoded JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Entity`] if the value does not parse.
    pub fn insert_value(
        &mut self,
        key: impl Into<String>,
        payload: &Value,
    ) -> Result<&T, StateError> {
        let key = key.into();
        let raw = serde_json::value::to_raw_value(payload)
            .map_err(|error| StateError::entity(T::KIND, key.clone(), error))?;
        self.insert(key, raw)
    }
}

impl<T> EntityCache<T> {
    /// Typed view of the entry under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&T> {
        self.parsed.get(key)
    }

    /// Raw payload of the entry under `key`.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<&RawValue> {
        self.raw.get(key).map(AsRef::as_ref)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.raw.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Keys from `candidates` that are not cached yet.
    ///
    /// Discovery code uses this to skip entities fetched by an earlier run.
    pub fn missing<'a, I>(&self, candidates: I) -> Vec<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        candidates
            .into_iter()
            .filter(|key| !self.raw.contains_key(*key))
            .collect()
    }

    /// Iterates over typed views in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &T)> {
        self.parsed.iter()
    }
}

impl<T> Serialize for EntityCache<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.raw.iter())
    }
}

/// A cache holding at most one payload, for kinds that exist once per site.
pub struct EntitySlot<T> {
    raw: Option<Box<RawValue>>,
    parsed: Option<T>,
}

impl<T> Default for EntitySlot<T> {
    fn default() -> Self {
        Self {
            raw: None,
            parsed: None,
        }
    }
}

impl<T> fmt::Debug for EntitySlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySlot")
            .field("present", &self.raw.is_some())
            .finish()
    }
}

impl<T: Entity> EntitySlot<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a slot from a persisted payload. A `null` top-level value is
    /// treated as absent.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Entity`] if the payload does not parse.
    pub(crate) fn from_raw(raw: Option<Box<RawValue>>, key: &str) -> Result<Self, StateError> {
        let Some(raw) = raw.filter(|raw| !is_null(raw)) else {
            return Ok(Self::new());
        };
        let parsed = parse_view::<T>(key, &raw)?;
        Ok(Self {
            raw: Some(raw),
            parsed: Some(parsed),
        })
    }

    /// Replaces the stored payload; an unparseable payload leaves the slot
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Entity`] if the payload does not parse.
    pub fn set(&mut self, payload: Box<RawValue>) -> Result<&T, StateError> {
        let view = parse_view::<T>(T::KIND, &payload)?;
        self.raw = Some(payload);
        Ok(self.parsed.insert(view))
    }

    /// Like [`set`](Self::set), for an already-decoded JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Entity`] if the value does not parse.
    pub fn set_value(&mut self, payload: &Value) -> Result<&T, StateError> {
        let raw = serde_json::value::to_raw_value(payload)
            .map_err(|error| StateError::entity(T::KIND, T::KIND, error))?;
        self.set(raw)
    }
}

impl<T> EntitySlot<T> {
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.parsed.as_ref()
    }

    #[must_use]
    pub fn raw(&self) -> Option<&RawValue> {
        self.raw.as_deref()
    }

    #[must_use]
    pub fn is_some(&self) -> bool {
        self.raw.is_some()
    }
}

impl<T> Serialize for EntitySlot<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

/// The chronicles landing page plus one entry per chronicle slug.
///
/// Persisted as `{"index": <payload or null>, "entries": {"<slug>": ..}}`.
#[derive(Debug, Default)]
pub struct ChroniclesCache {
    pub index: EntitySlot<ChroniclesIndex>,
    pub entries: EntityCache<Chronicle>,
}

#[derive(Deserialize)]
struct RawChronicles {
    #[serde(default)]
    index: Option<Box<RawValue>>,
    #[serde(default)]
    entries: Option<BTreeMap<String, Box<RawValue>>>,
}

impl ChroniclesCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the cache from the persisted `chronicles` field.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Corrupt`] if the field is not an object and
    /// [`StateError::Entity`] if the index or any entry does not parse.
    pub(crate) fn from_raw(raw: &RawValue) -> Result<Self, StateError> {
        let parts: Option<RawChronicles> = serde_json::from_str(raw.get())
            .map_err(|error| StateError::corrupt(Chronicle::KIND, error))?;
        let Some(parts) = parts else {
            return Ok(Self::new());
        };
        Ok(Self {
            index: EntitySlot::from_raw(parts.index, "index")?,
            entries: EntityCache::from_raw(parts.entries.unwrap_or_default())?,
        })
    }

    /// Slugs listed by the index that have no cached entry yet.
    #[must_use]
    pub fn missing_entries(&self) -> Vec<&str> {
        match self.index.get() {
            Some(index) => self.entries.missing(index.chronicle_slugs()),
            None => Vec::new(),
        }
    }
}

impl Serialize for ChroniclesCache {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("index", &self.index)?;
        map.serialize_entry("entries", &self.entries)?;
        map.end()
    }
}

fn is_null(payload: &RawValue) -> bool {
    payload.get().trim() == "null"
}

/// A `null` payload reads as the default view; its raw form is kept as is.
fn parse_view<T: Entity>(key: &str, payload: &RawValue) -> Result<T, StateError> {
    if is_null(payload) {
        return Ok(T::default());
    }
    serde_json::from_str(payload.get()).map_err(|error| StateError::entity(T::KIND, key, error))
}
