use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::KeyValueStore;

const KEY_SEPARATOR: char = '|';

/// Case- and whitespace-insensitive identity of a (city, country) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeocodeKey(String);

impl GeocodeKey {
    pub fn new(city: &str, country: &str) -> Self {
        Self(format!(
            "{}{KEY_SEPARATOR}{}",
            city.trim().to_lowercase(),
            country.trim().to_lowercase()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GeocodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeocodeCache {
    entries: BTreeMap<GeocodeKey, GeocodeResult>,
}

impl GeocodeCache {
    pub fn get(&self, key: &GeocodeKey) -> Option<GeocodeResult> {
        self.entries.get(key).copied()
    }

    /// Stored results are never replaced; returns false when the key existed.
    pub fn insert(&mut self, key: GeocodeKey, result: GeocodeResult) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, result);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Best-effort persistence of the geocode cache under one namespace.
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn KeyValueStore>,
    namespace: String,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn KeyValueStore>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn load(&self) -> GeocodeCache {
        let payload = match self.backend.get(&self.namespace) {
            Ok(Some(payload)) => payload,
            Ok(None) => return GeocodeCache::default(),
            Err(err) => {
                warn!(?err, namespace = %self.namespace, "failed to read geocode cache; starting empty");
                return GeocodeCache::default();
            }
        };

        match serde_json::from_str::<GeocodeCache>(&payload) {
            Ok(cache) => {
                debug!(entries = cache.len(), namespace = %self.namespace, "geocode cache loaded");
                cache
            }
            Err(err) => {
                warn!(?err, namespace = %self.namespace, "geocode cache is corrupt; starting empty");
                GeocodeCache::default()
            }
        }
    }

    pub fn save(&self, cache: &GeocodeCache) {
        let payload = match serde_json::to_string(cache) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(?err, "failed to serialize geocode cache");
                return;
            }
        };
        if let Err(err) = self.backend.put(&self.namespace, &payload) {
            warn!(?err, namespace = %self.namespace, "failed to persist geocode cache");
        }
    }

    pub fn clear(&self) {
        if let Err(err) = self.backend.remove(&self.namespace) {
            warn!(?err, namespace = %self.namespace, "failed to clear geocode cache");
        }
    }
}
