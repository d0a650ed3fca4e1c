use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{CarbonError, EmissionReport};

/// Opaque string key-value persistence, the shape of browser local storage.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, CarbonError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), CarbonError>;
    fn remove(&mut self, key: &str) -> Result<(), CarbonError>;
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, CarbonError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), CarbonError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), CarbonError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg_attr(target_arch = "wasm32", allow(dead_code))]
fn check_key(key: &str) -> Result<(), CarbonError> {
    let ok = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(CarbonError::Store(format!("invalid key '{key}'")))
    }
}

/// One `<key>.json` file per key inside a directory.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    dir: std::path::PathBuf,
}

#[cfg(not(target_arch = "wasm32"))]
impl JsonFileStore {
    pub fn open(dir: impl Into<std::path::PathBuf>) -> Result<Self, CarbonError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| CarbonError::Store(format!("failed to create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<std::path::PathBuf, CarbonError> {
        check_key(key)?;
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, CarbonError> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CarbonError::Store(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), CarbonError> {
        let path = self.path_for(key)?;
        std::fs::write(&path, value)
            .map_err(|e| CarbonError::Store(format!("failed to write {}: {e}", path.display())))
    }

    fn remove(&mut self, key: &str) -> Result<(), CarbonError> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CarbonError::Store(format!(
                "failed to remove {}: {e}",
                path.display()
            ))),
        }
    }
}

/// The most recent website analysis, kept between runs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredAnalysis {
    pub url: Option<String>,
    pub analyzed_at: DateTime<Utc>,
    pub report: EmissionReport,
}

impl StoredAnalysis {
    pub const KEY: &'static str = "websiteAnalysis";

    pub fn new(url: Option<String>, report: EmissionReport) -> Self {
        Self {
            url,
            analyzed_at: Utc::now(),
            report,
        }
    }

    pub fn save(&self, store: &mut dyn KeyValueStore) -> Result<(), CarbonError> {
        let text = serde_json::to_string(self)
            .map_err(|e| CarbonError::Store(format!("failed to encode analysis: {e}")))?;
        store.set(Self::KEY, &text)
    }

    /// `Ok(None)` when nothing is stored or the stored value no longer decodes.
    pub fn load(store: &dyn KeyValueStore) -> Result<Option<Self>, CarbonError> {
        let Some(text) = store.get(Self::KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str(&text) {
            Ok(stored) => Ok(Some(stored)),
            Err(e) => {
                warn!("ignoring unreadable stored analysis: {e}");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{build_report_with, EstimateOptions, FixedSource, RawEmissionInput};

    fn sample_report() -> EmissionReport {
        build_report_with(
            &RawEmissionInput::from_score(86),
            &EstimateOptions::default(),
            &mut FixedSource(0.0),
        )
    }

    #[test]
    fn memory_store_round_trips_last_analysis() {
        let mut store = MemoryStore::new();
        assert_eq!(StoredAnalysis::load(&store).unwrap(), None);
        let stored = StoredAnalysis::new(Some("https://example.com".into()), sample_report());
        stored.save(&mut store).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(StoredAnalysis::load(&store).unwrap(), Some(stored));
    }

    #[test]
    fn corrupt_value_reads_as_missing() {
        let mut store = MemoryStore::new();
        store.set(StoredAnalysis::KEY, "{not json").unwrap();
        assert_eq!(StoredAnalysis::load(&store).unwrap(), None);
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn file_store_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::open(dir.path().join("cache")).unwrap();
        assert_eq!(store.get("user").unwrap(), None);
        store.set("user", "{\"a\":1}").unwrap();

        let reopened = JsonFileStore::open(dir.path().join("cache")).unwrap();
        assert_eq!(reopened.get("user").unwrap().as_deref(), Some("{\"a\":1}"));

        store.remove("user").unwrap();
        store.remove("user").unwrap();
        assert_eq!(reopened.get("user").unwrap(), None);
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn file_store_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.set("../escape", "x"),
            Err(CarbonError::Store(_))
        ));
        assert!(store.get("").is_err());
    }
}
