use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::KeyValueStore;
use super::error::{InvariantViolationSnafu, StorageResult};

/// In-process store. Lost on exit; used by tests and `--store memory`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self, stage: &'static str) -> StorageResult<RwLockReadGuard<'_, BTreeMap<String, String>>> {
        self.entries.read().map_err(|_| {
            InvariantViolationSnafu {
                stage,
                details: "memory store lock poisoned".to_string(),
            }
            .build()
        })
    }

    fn write(
        &self,
        stage: &'static str,
    ) -> StorageResult<RwLockWriteGuard<'_, BTreeMap<String, String>>> {
        self.entries.write().map_err(|_| {
            InvariantViolationSnafu {
                stage,
                details: "memory store lock poisoned".to_string(),
            }
            .build()
        })
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.read("memory-get")?.get(key).cloned())
    }

    fn put(&self, key: &str, value: String) -> StorageResult<()> {
        self.write("memory-put")?.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.write("memory-remove")?.remove(key);
        Ok(())
    }

    fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .read("memory-keys")?
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}
