//! Settings persisted as one pretty-printed JSON object on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use serde_json::Value;

use gitkeeper_core::error::SettingsError;
use gitkeeper_core::settings::SettingsStore;
use gitkeeper_core::util::{read, write};

pub struct FileSettingsStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, Value>>,
}

impl FileSettingsStore {
    /// Open `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse settings file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write through a sibling temp file so a crash never leaves half a file.
    fn flush(&self, values: &BTreeMap<String, Value>) -> Result<(), SettingsError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_vec_pretty(values).map_err(|source| SettingsError::Value {
            key: "*".to_string(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SettingsStore for FileSettingsStore {
    fn get_value(&self, key: &str) -> Result<Option<Value>, SettingsError> {
        Ok(read(&self.values).get(key).cloned())
    }

    fn set_value(&self, key: &str, value: Value) -> Result<(), SettingsError> {
        let mut values = write(&self.values);
        values.insert(key.to_string(), value);
        self.flush(&values)
    }

    fn remove(&self, key: &str) -> Result<(), SettingsError> {
        let mut values = write(&self.values);
        if values.remove(key).is_some() {
            self.flush(&values)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let store = FileSettingsStore::open(&path).unwrap();
        assert_eq!(store.get_value("a").unwrap(), None);
        store.set_value("a", json!({"n": 1})).unwrap();
        store.set_value("b", json!("two")).unwrap();
        store.remove("b").unwrap();

        let reopened = FileSettingsStore::open(&path).unwrap();
        assert_eq!(reopened.get_value("a").unwrap(), Some(json!({"n": 1})));
        assert_eq!(reopened.get_value("b").unwrap(), None);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_reported_with_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = FileSettingsStore::open(&path).err().unwrap();
        assert!(format!("{err:#}").contains("settings.json"));
    }
}
