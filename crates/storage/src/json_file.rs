use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use snafu::ResultExt;

use super::KeyValueStore;
use super::error::{
    CreateDirectorySnafu, InvariantViolationSnafu, ParseStoreFileSnafu, ReadStoreFileSnafu,
    RenameStoreFileSnafu, SerializeStoreSnafu, StorageResult, WriteStoreFileSnafu,
};

pub const DEFAULT_STORE_FILE_NAME: &str = "chat-store.json";

/// One JSON object on disk mapping keys to values, rewritten atomically on every change.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> StorageResult<BTreeMap<String, String>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BTreeMap::new());
            }
            Err(source) => {
                return Err(source).context(ReadStoreFileSnafu {
                    stage: "json-store-read",
                    path: display_path(&self.path),
                });
            }
        };

        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&text).context(ParseStoreFileSnafu {
            stage: "json-store-parse",
            path: display_path(&self.path),
        })
    }

    fn write_entries(&self, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context(CreateDirectorySnafu {
                stage: "json-store-create-directory",
                path: display_path(parent),
            })?;
        }

        let content = serde_json::to_string_pretty(entries).context(SerializeStoreSnafu {
            stage: "json-store-serialize",
        })?;

        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteStoreFileSnafu {
            stage: "json-store-write-temporary",
            path: display_path(&temp_path),
        })?;

        std::fs::rename(&temp_path, &self.path).context(RenameStoreFileSnafu {
            stage: "json-store-rename-temporary",
            from: display_path(&temp_path),
            to: display_path(&self.path),
        })
    }

    fn modify<F>(&self, stage: &'static str, change: F) -> StorageResult<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let _guard = self.write_lock.lock().map_err(|_| {
            InvariantViolationSnafu {
                stage,
                details: "json store write lock poisoned".to_string(),
            }
            .build()
        })?;

        let mut entries = self.read_entries()?;
        if change(&mut entries) {
            self.write_entries(&entries)?;
        }
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.read_entries()?.remove(key))
    }

    fn put(&self, key: &str, value: String) -> StorageResult<()> {
        self.modify("json-store-put", |entries| {
            entries.insert(key.to_string(), value);
            true
        })
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.modify("json-store-remove", |entries| entries.remove(key).is_some())
    }

    fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .read_entries()?
            .into_keys()
            .filter(|key| key.starts_with(prefix))
            .collect())
    }
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("vyoma-json-store-{}", uuid::Uuid::now_v7()))
            .join(name)
    }

    #[test]
    fn values_survive_reopening_the_file() {
        let path = scratch_path("store.json");
        let store = JsonFileStore::new(&path);
        store.put("vyoma:sessions", "[]".to_string()).unwrap();
        store.put("vyoma:messages:1", "[1]".to_string()).unwrap();
        drop(store);

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.get("vyoma:sessions").unwrap().as_deref(), Some("[]"));
        assert_eq!(reopened.keys("vyoma:messages:").unwrap(), vec!["vyoma:messages:1"]);

        reopened.remove("vyoma:messages:1").unwrap();
        assert_eq!(reopened.get("vyoma:messages:1").unwrap(), None);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let store = JsonFileStore::new(scratch_path("absent.json"));
        assert_eq!(store.get("anything").unwrap(), None);
        assert!(store.keys("").unwrap().is_empty());
    }

    #[test]
    fn corrupt_file_surfaces_parse_error() {
        let path = scratch_path("corrupt.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::new(&path);
        let error = store.get("vyoma:sessions").unwrap_err();
        assert!(matches!(error, StorageError::ParseStoreFile { .. }));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
