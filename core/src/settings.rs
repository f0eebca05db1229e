//! Abstract key/value persistence for installation state and cache snapshots.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::SettingsError;
use crate::util::{read, write};

pub trait SettingsStore: Send + Sync {
    fn get_value(&self, key: &str) -> Result<Option<Value>, SettingsError>;

    fn set_value(&self, key: &str, value: Value) -> Result<(), SettingsError>;

    fn remove(&self, key: &str) -> Result<(), SettingsError>;
}

impl dyn SettingsStore + '_ {
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SettingsError> {
        match self.get_value(key)? {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| SettingsError::Value {
                    key: key.to_string(),
                    source,
                }),
        }
    }

    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), SettingsError> {
        let value = serde_json::to_value(value).map_err(|source| SettingsError::Value {
            key: key.to_string(),
            source,
        })?;
        self.set_value(key, value)
    }
}

/// In-process store, for tests and hosts without persistence.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: RwLock<BTreeMap<String, Value>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        read(&self.values).keys().cloned().collect()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get_value(&self, key: &str) -> Result<Option<Value>, SettingsError> {
        Ok(read(&self.values).get(key).cloned())
    }

    fn set_value(&self, key: &str, value: Value) -> Result<(), SettingsError> {
        write(&self.values).insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SettingsError> {
        write(&self.values).remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_access_reports_bad_values() {
        let store = MemorySettingsStore::new();
        let store: &dyn SettingsStore = &store;
        store.set("answer", &42u32).unwrap();
        assert_eq!(store.get::<u32>("answer").unwrap(), Some(42));

        let err = store.get::<Vec<String>>("answer").unwrap_err();
        assert!(matches!(err, SettingsError::Value { ref key, .. } if key == "answer"));

        store.remove("answer").unwrap();
        assert_eq!(store.get::<u32>("answer").unwrap(), None);
    }
}
