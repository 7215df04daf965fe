//! Record storage for CoopGrid
//!
//! Two layers. [`Storage`] reads and replaces opaque byte blobs under
//! slash-separated keys, backed by a directory tree ([`FileStorage`]) or a map
//! ([`MemoryStorage`]). [`RecordStore`] sits on top and reads or writes a
//! whole collection of records as one JSON document.
//!
//! Neither layer serializes concurrent writers. [`Repository`] does: it holds
//! a per-collection lock across each read-modify-write and checks the version
//! of records that carry one.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub mod file_storage;
pub mod memory_storage;
pub mod record;
pub mod repository;

pub use file_storage::FileStorage;
pub use memory_storage::MemoryStorage;
pub use record::{Collection, JsonRecordStore, Record, RecordStore};
pub use repository::Repository;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed record document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Rejected storage key {0:?}")]
    InvalidKey(String),

    #[error("Record {id} already exists in {collection}")]
    DuplicateRecord { collection: Collection, id: String },

    #[error("Version conflict on {collection}/{id}: expected {expected}, found {found}")]
    VersionConflict {
        collection: Collection,
        id: String,
        expected: u64,
        found: u64,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for coopgrid_common::Error {
    fn from(err: StorageError) -> Self {
        use coopgrid_common::Error;

        match err {
            StorageError::DuplicateRecord { .. } => Error::conflict(err.to_string()),
            StorageError::VersionConflict { .. } => Error::invariant(err.to_string()),
            StorageError::Json(e) => Error::serialization(e.to_string()),
            other => Error::storage(other.to_string()),
        }
    }
}

/// Tuning for durable backends
#[derive(Debug, Clone, Copy)]
pub struct StorageOptions {
    /// fsync each blob before it replaces the previous one
    pub sync_write: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self { sync_write: true }
    }
}

/// Keys are relative, slash-separated and never climb out of the root
pub(crate) fn check_key(key: &str) -> StorageResult<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        Err(StorageError::InvalidKey(key.to_string()))
    } else {
        Ok(())
    }
}

/// A flat namespace of byte blobs
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// The blob under `key`, or `None` if nothing was ever written there
    async fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Replace the blob under `key` in one step
    async fn write(&self, key: &str, bytes: &[u8]) -> StorageResult<()>;
}

/// JSON documents over any [`Storage`]
#[async_trait]
pub trait JsonStorage: Storage {
    async fn read_json<T: DeserializeOwned + Send>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.read(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn write_json<T: Serialize + Send + Sync>(&self, key: &str, value: &T) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write(key, &bytes).await
    }
}

#[async_trait]
impl<S: Storage + ?Sized> JsonStorage for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use coopgrid_common::Error;

    #[test]
    fn test_key_rules() {
        assert!(check_key("collections/clusters.json").is_ok());
        for key in ["", "/etc/passwd", "collections/../x", "a//b", "./a", "a\\b"] {
            assert!(
                matches!(check_key(key), Err(StorageError::InvalidKey(_))),
                "{:?} should be rejected",
                key
            );
        }
    }

    #[test]
    fn test_storage_error_mapping() {
        let err: Error = StorageError::DuplicateRecord {
            collection: Collection::Clusters,
            id: "c-1".to_string(),
        }
        .into();
        assert!(err.is_conflict());

        let err: Error = StorageError::VersionConflict {
            collection: Collection::Clusters,
            id: "c-1".to_string(),
            expected: 2,
            found: 3,
        }
        .into();
        assert!(matches!(err, Error::InvariantViolation(_)));

        let err: Error = StorageError::InvalidKey("..".to_string()).into();
        assert!(matches!(err, Error::Storage(_)));
    }
}
