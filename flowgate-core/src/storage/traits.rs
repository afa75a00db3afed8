//! Platform interfaces for credential storage.

use std::sync::Arc;

use super::error::StorageResult;

/// Device keystore interface used to seal and open persisted credentials.
///
/// Platforms back this with their secure enclave or keystore (iOS Keychain with
/// a `ThisDeviceOnly` key, Android Keystore). Platforms without one simply do not
/// provide it, and the credential store falls back to unsealed persistence.
#[uniffi::export(with_foreign)]
pub trait DeviceKeystore: Send + Sync {
    /// Seals plaintext under the device-bound key, authenticating `associated_data`.
    ///
    /// The associated data is not encrypted, but it is integrity-protected as part
    /// of the seal operation. Any mismatch when opening must fail.
    ///
    /// # Errors
    ///
    /// Returns an error if the keystore refuses the operation or the seal fails.
    fn seal(
        &self,
        associated_data: Vec<u8>,
        plaintext: Vec<u8>,
    ) -> StorageResult<Vec<u8>>;

    /// Opens ciphertext under the device-bound key, verifying `associated_data`.
    ///
    /// # Errors
    ///
    /// Returns an error if authentication fails or the keystore cannot open.
    fn open_sealed(
        &self,
        associated_data: Vec<u8>,
        ciphertext: Vec<u8>,
    ) -> StorageResult<Vec<u8>>;
}

/// Durable string key/value persistence provided by the platform.
///
/// - **iOS/Android**: app-private preferences or the keychain itself
/// - **Browser**: `localStorage` (no confidentiality at rest)
///
/// Every method reports failures through its result and must not panic.
#[uniffi::export(with_foreign)]
#[async_trait::async_trait]
pub trait ItemStore: Send + Sync {
    /// Reads the value stored under `key`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    async fn get_item(&self, key: String) -> StorageResult<Option<String>>;

    /// Writes `value` under `key`, replacing any existing value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    async fn set_item(&self, key: String, value: String) -> StorageResult<()>;

    /// Removes the value under `key`. Removing a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    async fn remove_item(&self, key: String) -> StorageResult<()>;
}

/// Provider responsible for the platform-specific storage components.
#[uniffi::export(with_foreign)]
pub trait StorageProvider: Send + Sync {
    /// Returns the device keystore, or `None` when the platform has no secure enclave.
    fn keystore(&self) -> Option<Arc<dyn DeviceKeystore>>;

    /// Returns the durable item store.
    fn item_store(&self) -> Arc<dyn ItemStore>;
}
