//! Persisted session record helpers.

use serde::{Deserialize, Serialize};

use super::error::{StorageError, StorageResult};
use crate::session::Session;

const RECORD_VERSION: u32 = 1;

/// The single client-local record: the serialized session (token pair + expiry).
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub version: u32,
    pub session: Session,
}

impl SessionRecord {
    pub const fn new(session: Session) -> Self {
        Self {
            version: RECORD_VERSION,
            session,
        }
    }

    pub fn encode(&self) -> StorageResult<String> {
        serde_json::to_string(self)
            .map_err(|err| StorageError::Serialization(err.to_string()))
    }

    pub fn decode(value: &str) -> StorageResult<Self> {
        let record: Self = serde_json::from_str(value)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        if record.version != RECORD_VERSION {
            return Err(StorageError::UnsupportedRecordVersion(record.version));
        }
        Ok(record)
    }
}
