pub mod error;
pub mod ids;
pub mod json_file;
pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use error::{StorageError, StorageResult};
pub use ids::{ConversationId, MessageId};
pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Durable string-keyed store holding serialized (JSON) values.
///
/// Values are opaque to the store; callers own the schema. Implementations are
/// synchronous so they can be shared behind `Arc<dyn KeyValueStore>` and called
/// from both async tasks and plain threads.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn put(&self, key: &str, value: String) -> StorageResult<()>;
    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> StorageResult<()>;
    /// Keys starting with `prefix`, sorted ascending.
    fn keys(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

/// Which backend `open_store` builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    Json,
    Sqlite,
}

pub async fn open_store(
    backend: StoreBackend,
    location: &str,
) -> StorageResult<Arc<dyn KeyValueStore>> {
    let store: Arc<dyn KeyValueStore> = match backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::Json => Arc::new(JsonFileStore::new(location)),
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(location).await?),
    };

    tracing::debug!(backend = ?backend, location, "opened key-value store");
    Ok(store)
}
