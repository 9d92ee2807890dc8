//! Key-value settings store for persisted engine state
//!
//! Three independently-keyed blobs round-trip through the store: the
//! geofence table, the capped location history, and the travel-pattern
//! table. Each is loaded in full on startup and written in full on save.

use anyhow::Context;
use parking_lot::Mutex;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Store key for the geofence table (keyed by zone id)
pub const KEY_GEOFENCES: &str = "geofences";
/// Store key for the flat list of recent location samples
pub const KEY_LOCATION_HISTORY: &str = "locationHistory";
/// Store key for the per-user travel-pattern pairs
pub const KEY_TRAVEL_PATTERNS: &str = "travelPatterns";

/// Key-value persistence boundary
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> anyhow::Result<()>;
}

/// Settings store backed by a single JSON file
///
/// The whole document is rewritten on every `set`; writes go through an
/// in-memory cache so reads never touch the filesystem after open.
pub struct JsonFileStore {
    path: PathBuf,
    cache: Mutex<serde_json::Map<String, Value>>,
}

impl JsonFileStore {
    /// Open a store, loading the existing document if the file exists
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let cache = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings store {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse settings store {}", path.display()))?
        } else {
            serde_json::Map::new()
        };

        Ok(Self { path, cache: Mutex::new(cache) })
    }

    fn flush(&self, cache: &serde_json::Map<String, Value>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create store directory {}", parent.display())
                })?;
            }
        }

        let content = serde_json::to_string_pretty(&Value::Object(cache.clone()))?;
        fs::write(&self.path, &content)
            .with_context(|| format!("Failed to write settings store {}", self.path.display()))?;
        debug!(file = %self.path.display(), bytes = %content.len(), "settings_store_written");
        Ok(())
    }
}

impl SettingsStore for JsonFileStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.cache.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        let mut cache = self.cache.lock();
        cache.insert(key.to_string(), value);
        self.flush(&cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_open_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("store.json")).unwrap();
        assert!(store.get(KEY_GEOFENCES).unwrap().is_none());
    }

    #[test]
    fn test_set_then_get() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("store.json")).unwrap();

        store.set(KEY_GEOFENCES, json!({"geo_1": {"radius": 100.0}})).unwrap();
        let value = store.get(KEY_GEOFENCES).unwrap().unwrap();
        assert_eq!(value["geo_1"]["radius"], 100.0);
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = JsonFileStore::open(&path).unwrap();
            store.set(KEY_LOCATION_HISTORY, json!([1, 2, 3])).unwrap();
            store.set(KEY_TRAVEL_PATTERNS, json!([["u1", {"average_speed_mps": 1.5}]])).unwrap();
        }

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get(KEY_LOCATION_HISTORY).unwrap().unwrap(), json!([1, 2, 3]));
        let patterns = reopened.get(KEY_TRAVEL_PATTERNS).unwrap().unwrap();
        assert_eq!(patterns[0][0], "u1");
    }

    #[test]
    fn test_set_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");
        let store = JsonFileStore::open(&path).unwrap();
        store.set("key", json!(true)).unwrap();
        assert!(path.exists());
    }
}
