//! Secure credential store: platform capabilities and the session record.

mod credential_store;
pub mod error;
pub mod memory;
mod record;
pub mod traits;

#[cfg(test)]
pub(crate) mod tests_utils;

pub use credential_store::SecureCredentialStore;
pub use error::{StorageError, StorageResult};
pub use memory::MemoryItemStore;
pub use traits::{DeviceKeystore, ItemStore, StorageProvider};

/// Stable key of the single persisted session record.
pub const SESSION_RECORD_KEY: &str = "flowgate.session.v1";

pub(crate) const SEALED_VALUE_AD_PREFIX: &[u8] = b"flowgate:credential:";
