//! Person state persistence across restarts.
//!
//! The file holds a format version and one JSON object per person slug.
//! Entries are decoded one by one so a single broken person does not take
//! the others down with it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coordinator::PersonState;

/// Version of the storage layout.
pub const STORAGE_VERSION: u32 = 1;

/// On-disk layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default = "storage_version")]
    pub version: u32,
    #[serde(default)]
    pub persons: BTreeMap<String, Value>,
}

fn storage_version() -> u32 {
    STORAGE_VERSION
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: STORAGE_VERSION,
            persons: BTreeMap::new(),
        }
    }
}

impl PersistedState {
    /// Load from file
    pub fn load(path: &Path) -> Self {
        match fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<PersistedState>(&bytes) {
                Ok(state) => {
                    info!(
                        "Loaded {} persisted persons from {:?}",
                        state.persons.len(),
                        path
                    );
                    state
                }
                Err(e) => {
                    warn!("Failed to parse state file: {}", e);
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No persisted state found (first run)");
                Self::default()
            }
            Err(e) => {
                error!("Failed to read state file: {}", e);
                Self::default()
            }
        }
    }

    /// Save to file
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(path, data)?;
        info!("Saved {} persons to {:?}", self.persons.len(), path);
        Ok(())
    }

    /// Decode the stored persons, skipping entries that no longer parse.
    pub fn decode_persons(&self) -> BTreeMap<String, PersonState> {
        let mut persons = BTreeMap::new();
        for (slug, raw) in &self.persons {
            match serde_json::from_value::<PersonState>(raw.clone()) {
                Ok(mut state) => {
                    state.slug = slug.clone();
                    persons.insert(slug.clone(), state);
                }
                Err(e) => warn!("Skipping stored state for {}: {}", slug, e),
            }
        }
        persons
    }

    /// Encode every person into the persisted layout.
    pub fn from_persons<'a>(persons: impl IntoIterator<Item = &'a PersonState>) -> Self {
        let mut state = Self::default();
        for person in persons {
            match serde_json::to_value(person) {
                Ok(value) => {
                    state.persons.insert(person.slug.clone(), value);
                }
                Err(e) => error!("Failed to encode state for {}: {}", person.slug, e),
            }
        }
        state
    }
}

/// Store wrapper with auto-save
pub struct StateStore {
    path: PathBuf,
    state: RwLock<PersistedState>,
}

impl StateStore {
    pub fn new(path: PathBuf) -> Self {
        let state = PersistedState::load(&path);
        Self {
            path,
            state: RwLock::new(state),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persons as last loaded or saved.
    pub fn persons(&self) -> BTreeMap<String, PersonState> {
        self.state.read().decode_persons()
    }

    /// Replace the stored persons and write the file.
    pub fn save_persons<'a>(&self, persons: impl IntoIterator<Item = &'a PersonState>) {
        let mut state = self.state.write();
        *state = PersistedState::from_persons(persons);
        if let Err(e) = state.save(&self.path) {
            error!("Failed to save person state: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        assert!(store.persons().is_empty());
    }

    #[test]
    fn test_unreadable_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{not json").unwrap();
        let store = StateStore::new(path);
        assert!(store.persons().is_empty());
    }

    #[test]
    fn test_save_creates_parent_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let store = StateStore::new(path.clone());

        let mut ola = PersonState::new("ola", "Ola");
        ola.map_locale = Some("pl".to_string());
        store.save_persons([&ola]);
        assert!(path.exists());

        let reloaded = StateStore::new(path);
        let persons = reloaded.persons();
        let restored = persons.get("ola").unwrap();
        assert_eq!(restored.slug, "ola");
        assert_eq!(restored.person, "Ola");
        assert_eq!(restored.map_locale.as_deref(), Some("pl"));
    }

    #[test]
    fn test_file_without_version_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let raw = json!({"persons": {"ola": {"person": "Ola"}}});
        fs::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();

        let state = PersistedState::load(&path);
        assert_eq!(state.version, STORAGE_VERSION);
        assert!(StateStore::new(path).persons().contains_key("ola"));
    }

    #[test]
    fn test_broken_person_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let raw = json!({
            "version": 1,
            "persons": {
                "ola": {"person": "Ola"},
                "jan": {"person": "Jan", "normalized_alarms": "oops"},
            }
        });
        fs::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();

        let persons = StateStore::new(path).persons();
        assert_eq!(persons.len(), 1);
        assert!(persons.contains_key("ola"));
    }
}
