//! In-memory item store.
//!
//! Provides durability for the lifetime of the process only. Used by tests and
//! by host-side tooling that has no platform storage.

use std::collections::HashMap;
use std::sync::Mutex;

use super::error::StorageResult;
use super::traits::ItemStore;

/// [`ItemStore`] backed by a `HashMap`.
#[derive(Debug, Default, uniffi::Object)]
pub struct MemoryItemStore {
    items: Mutex<HashMap<String, String>>,
}

#[uniffi::export]
impl MemoryItemStore {
    /// Creates an empty store.
    #[uniffi::constructor]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored items.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.lock().len() as u64
    }

    /// Whether the store holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl MemoryItemStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.items
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl ItemStore for MemoryItemStore {
    async fn get_item(&self, key: String) -> StorageResult<Option<String>> {
        Ok(self.lock().get(&key).cloned())
    }

    async fn set_item(&self, key: String, value: String) -> StorageResult<()> {
        self.lock().insert(key, value);
        Ok(())
    }

    async fn remove_item(&self, key: String) -> StorageResult<()> {
        self.lock().remove(&key);
        Ok(())
    }
}
