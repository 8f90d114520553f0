// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Settings documents read at device startup.
//!
//! A settings store maps a name to an opaque JSON document. Devices only
//! read the `"config"` document, once, while being built.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::error::SettingsError;

/// Name of the document a device reads at startup.
pub const CONFIG_SETTING: &str = "config";

/// Key/value store of JSON documents.
pub trait SettingsStore: Send + Sync {
    /// Returns the document stored under `name`, if any.
    ///
    /// # Errors
    ///
    /// Returns error if the backing storage cannot be read.
    fn get_setting(&self, name: &str) -> Result<Option<Value>, SettingsError>;

    /// Stores `document` under `name`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns error if the backing storage cannot be written.
    fn put_setting(&self, name: &str, document: Value) -> Result<(), SettingsError>;
}

/// In-memory settings, lost on drop.
#[derive(Debug, Default)]
pub struct MemorySettings {
    documents: Mutex<HashMap<String, Value>>,
}

impl MemorySettings {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding one `"config"` document.
    #[must_use]
    pub fn with_config(config: Value) -> Self {
        let store = Self::new();
        store.documents.lock().insert(CONFIG_SETTING.to_string(), config);
        store
    }
}

impl SettingsStore for MemorySettings {
    fn get_setting(&self, name: &str) -> Result<Option<Value>, SettingsError> {
        Ok(self.documents.lock().get(name).cloned())
    }

    fn put_setting(&self, name: &str, document: Value) -> Result<(), SettingsError> {
        self.documents.lock().insert(name.to_string(), document);
        Ok(())
    }
}

/// Settings kept in one JSON file mapping names to documents.
///
/// A missing file reads as empty. Writes rewrite the whole file
/// pretty-printed and create parent directories as needed.
#[derive(Debug)]
pub struct JsonFileSettings {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileSettings {
    /// Creates a store backed by the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Returns the path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Map<String, Value>, SettingsError> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "No settings file, using empty settings");
            return Ok(Map::new());
        }

        let contents = fs::read_to_string(&self.path)?;
        let value: Value = serde_json::from_str(&contents)?;
        match value {
            Value::Object(documents) => Ok(documents),
            _ => Err(SettingsError::NotAnObject(self.path.display().to_string())),
        }
    }
}

impl SettingsStore for JsonFileSettings {
    fn get_setting(&self, name: &str) -> Result<Option<Value>, SettingsError> {
        let _guard = self.lock.lock();
        Ok(self.load()?.remove(name))
    }

    fn put_setting(&self, name: &str, document: Value) -> Result<(), SettingsError> {
        let _guard = self.lock.lock();
        let mut documents = self.load()?;
        documents.insert(name.to_string(), document);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(&documents)?;
        fs::write(&self.path, contents)?;

        tracing::info!(path = %self.path.display(), setting = %name, "Saved setting");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    static DIR_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn scratch_dir() -> PathBuf {
        let n = DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("mqtt_shadow_settings_{}_{n}", std::process::id()))
    }

    #[test]
    fn memory_settings_roundtrip() {
        let store = MemorySettings::new();
        assert!(store.get_setting(CONFIG_SETTING).unwrap().is_none());

        store.put_setting(CONFIG_SETTING, json!({"zones": 2})).unwrap();
        assert_eq!(
            store.get_setting(CONFIG_SETTING).unwrap(),
            Some(json!({"zones": 2}))
        );
    }

    #[test]
    fn memory_settings_with_config() {
        let store = MemorySettings::with_config(json!({"mqtt": {"host": "robodomo"}}));
        let config = store.get_setting(CONFIG_SETTING).unwrap().unwrap();
        assert_eq!(config["mqtt"]["host"], "robodomo");
    }

    #[test]
    fn json_file_missing_reads_empty() {
        let store = JsonFileSettings::new(scratch_dir().join("absent.json"));
        assert!(store.get_setting(CONFIG_SETTING).unwrap().is_none());
    }

    #[test]
    fn json_file_creates_dirs_and_keeps_other_documents() {
        let dir = scratch_dir();
        let path = dir.join("nested").join("settings.json");
        let store = JsonFileSettings::new(&path);

        store.put_setting(CONFIG_SETTING, json!({"zones": 2})).unwrap();
        store.put_setting("macros", json!(["movie"])).unwrap();

        let reopened = JsonFileSettings::new(&path);
        assert_eq!(
            reopened.get_setting(CONFIG_SETTING).unwrap(),
            Some(json!({"zones": 2}))
        );
        assert_eq!(reopened.get_setting("macros").unwrap(), Some(json!(["movie"])));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn json_file_rejects_non_object() {
        let dir = scratch_dir();
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.json");
        fs::write(&path, "[1, 2, 3]").unwrap();

        let store = JsonFileSettings::new(&path);
        assert!(matches!(
            store.get_setting(CONFIG_SETTING),
            Err(SettingsError::NotAnObject(_))
        ));

        let _ = fs::remove_dir_all(dir);
    }
}
