//! Whole-collection record persistence

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{JsonStorage, Storage, StorageResult};

/// The record collections the engine persists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Clusters,
    Contributions,
    Decisions,
    PurchaseRequests,
    Distributions,
}

impl Collection {
    pub const COUNT: usize = 5;

    pub const ALL: [Collection; Collection::COUNT] = [
        Collection::Clusters,
        Collection::Contributions,
        Collection::Decisions,
        Collection::PurchaseRequests,
        Collection::Distributions,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::Clusters => "clusters",
            Collection::Contributions => "contributions",
            Collection::Decisions => "decisions",
            Collection::PurchaseRequests => "purchase_requests",
            Collection::Distributions => "distributions",
        }
    }

    /// Storage key holding the collection
    pub fn key(&self) -> String {
        format!("collections/{}.json", self.name())
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Collection::Clusters => 0,
            Collection::Contributions => 1,
            Collection::Decisions => 2,
            Collection::PurchaseRequests => 3,
            Collection::Distributions => 4,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A persisted entity, keyed by id within its collection
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: Collection;

    fn record_id(&self) -> &str;

    /// Monotonic version, for records written under optimistic concurrency
    fn version(&self) -> Option<u64> {
        None
    }
}

/// Whole-collection reads and writes. No partial updates, no queries.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Read every record of `T`'s collection; an absent collection is empty
    async fn read_all<T: Record>(&self) -> StorageResult<Vec<T>>;

    /// Replace `T`'s collection with `records`
    async fn write_all<T: Record>(&self, records: &[T]) -> StorageResult<()>;
}

/// A [`RecordStore`] keeping each collection as one JSON document
#[derive(Clone)]
pub struct JsonRecordStore {
    storage: Arc<dyn Storage>,
}

impl JsonRecordStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl RecordStore for JsonRecordStore {
    async fn read_all<T: Record>(&self) -> StorageResult<Vec<T>> {
        let key = T::COLLECTION.key();
        let records = self.storage.as_ref().read_json::<Vec<T>>(&key).await?;
        Ok(records.unwrap_or_default())
    }

    async fn write_all<T: Record>(&self, records: &[T]) -> StorageResult<()> {
        let key = T::COLLECTION.key();
        debug!("Writing {} records to {}", records.len(), T::COLLECTION);
        self.storage.as_ref().write_json(&key, &records).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        text: String,
    }

    impl Record for Note {
        const COLLECTION: Collection = Collection::Decisions;

        fn record_id(&self) -> &str {
            &self.id
        }
    }

    #[tokio::test]
    async fn test_missing_collection_reads_empty() {
        let store = JsonRecordStore::new(Arc::new(MemoryStorage::new()));
        let notes: Vec<Note> = store.read_all().await.unwrap();
        assert!(notes.is_empty());
    }

    #[tokio::test]
    async fn test_write_all_replaces_collection() {
        let memory = Arc::new(MemoryStorage::new());
        let store = JsonRecordStore::new(memory.clone());

        let first = vec![Note { id: "n1".into(), text: "a".into() }];
        store.write_all(&first).await.unwrap();

        let second = vec![
            Note { id: "n2".into(), text: "b".into() },
            Note { id: "n3".into(), text: "c".into() },
        ];
        store.write_all(&second).await.unwrap();

        let notes: Vec<Note> = store.read_all().await.unwrap();
        assert_eq!(notes, second);
        assert!(memory.read("collections/decisions.json").await.unwrap().is_some());
    }
}
