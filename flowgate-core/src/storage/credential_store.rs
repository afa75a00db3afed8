//! Secure credential store facade over the platform storage capabilities.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use super::error::{StorageError, StorageResult};
use super::record::SessionRecord;
use super::traits::{DeviceKeystore, ItemStore, StorageProvider};
use super::{SEALED_VALUE_AD_PREFIX, SESSION_RECORD_KEY};
use crate::session::Session;

/// How values reach durable storage. Fixed when the store is constructed.
enum Backing {
    /// Values are sealed with the device keystore before hitting the item store.
    Sealed {
        keystore: Arc<dyn DeviceKeystore>,
        items: Arc<dyn ItemStore>,
    },
    /// Values are written as-is. Durable, but not confidential at rest.
    Fallback { items: Arc<dyn ItemStore> },
}

/// Key/value persistence for session credentials.
///
/// The platform capability (secure enclave or not) is resolved once, at
/// construction. All operations are asynchronous and report failures through
/// [`StorageResult`].
#[derive(uniffi::Object)]
pub struct SecureCredentialStore {
    backing: Backing,
}

impl std::fmt::Debug for SecureCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureCredentialStore")
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

#[uniffi::export(async_runtime = "tokio")]
impl SecureCredentialStore {
    /// Creates a store from a platform provider, sealing values when a keystore is available.
    #[uniffi::constructor]
    #[allow(clippy::needless_pass_by_value)]
    pub fn from_provider(provider: Arc<dyn StorageProvider>) -> Self {
        let items = provider.item_store();
        match provider.keystore() {
            Some(keystore) => Self::sealed(keystore, items),
            None => Self::fallback(items),
        }
    }

    /// Creates a store that seals every value with `keystore`.
    #[uniffi::constructor]
    #[must_use]
    pub fn sealed(keystore: Arc<dyn DeviceKeystore>, items: Arc<dyn ItemStore>) -> Self {
        Self {
            backing: Backing::Sealed { keystore, items },
        }
    }

    /// Creates a store without a device keystore.
    ///
    /// Credentials written through this store are not confidential at rest.
    #[uniffi::constructor]
    #[must_use]
    pub fn fallback(items: Arc<dyn ItemStore>) -> Self {
        log::warn!(
            "no device keystore available, session credentials will be persisted unsealed"
        );
        Self {
            backing: Backing::Fallback { items },
        }
    }

    /// Whether values are sealed by a device keystore.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        matches!(self.backing, Backing::Sealed { .. })
    }

    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or a sealed value cannot be opened.
    pub async fn get(&self, key: String) -> StorageResult<Option<String>> {
        match &self.backing {
            Backing::Fallback { items } => items.get_item(key).await,
            Backing::Sealed { keystore, items } => {
                let Some(encoded) = items.get_item(key.clone()).await? else {
                    return Ok(None);
                };
                let ciphertext = STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|err| StorageError::InvalidSealedValue(err.to_string()))?;
                let plaintext = keystore.open_sealed(associated_data(&key), ciphertext)?;
                String::from_utf8(plaintext)
                    .map(Some)
                    .map_err(|err| StorageError::InvalidSealedValue(err.to_string()))
            }
        }
    }

    /// Writes `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if sealing or the write fails.
    pub async fn set(&self, key: String, value: String) -> StorageResult<()> {
        match &self.backing {
            Backing::Fallback { items } => items.set_item(key, value).await,
            Backing::Sealed { keystore, items } => {
                let ciphertext =
                    keystore.seal(associated_data(&key), value.into_bytes())?;
                items.set_item(key, STANDARD.encode(ciphertext)).await
            }
        }
    }

    /// Removes the value under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn remove(&self, key: String) -> StorageResult<()> {
        self.items().remove_item(key).await
    }
}

impl SecureCredentialStore {
    fn items(&self) -> &Arc<dyn ItemStore> {
        match &self.backing {
            Backing::Sealed { items, .. } | Backing::Fallback { items } => items,
        }
    }

    /// Loads the persisted session record, if any.
    pub(crate) async fn load_session(&self) -> StorageResult<Option<Session>> {
        let Some(value) = self.get(SESSION_RECORD_KEY.to_string()).await? else {
            return Ok(None);
        };
        SessionRecord::decode(&value).map(|record| Some(record.session))
    }

    /// Replaces the persisted session record.
    pub(crate) async fn save_session(&self, session: &Session) -> StorageResult<()> {
        let value = SessionRecord::new(session.clone()).encode()?;
        self.set(SESSION_RECORD_KEY.to_string(), value).await
    }

    /// Removes the persisted session record.
    pub(crate) async fn clear_session(&self) -> StorageResult<()> {
        self.remove(SESSION_RECORD_KEY.to_string()).await
    }
}

fn associated_data(key: &str) -> Vec<u8> {
    let mut ad = Vec::with_capacity(SEALED_VALUE_AD_PREFIX.len() + key.len());
    ad.extend_from_slice(SEALED_VALUE_AD_PREFIX);
    ad.extend_from_slice(key.as_bytes());
    ad
}
