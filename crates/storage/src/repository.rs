//! Serialized access to record collections
//!
//! The underlying [`RecordStore`] is last-write-wins at collection
//! granularity. Every mutation here holds the collection's lock from the
//! read to the write, so two concurrent upserts to different records of the
//! same collection cannot overwrite each other.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::trace;

use crate::{Collection, Record, RecordStore, StorageError, StorageResult};

pub struct Repository<R> {
    store: Arc<R>,
    locks: [Mutex<()>; Collection::COUNT],
}

impl<R: RecordStore> Repository<R> {
    pub fn new(store: Arc<R>) -> Self {
        Self {
            store,
            locks: std::array::from_fn(|_| Mutex::new(())),
        }
    }

    fn lock_for(&self, collection: Collection) -> &Mutex<()> {
        &self.locks[collection.index()]
    }

    /// All records of a collection, in stored order
    pub async fn list<T: Record>(&self) -> StorageResult<Vec<T>> {
        let _guard = self.lock_for(T::COLLECTION).lock().await;
        self.store.read_all::<T>().await
    }

    /// Records matching a predicate, in stored order
    pub async fn filter<T, F>(&self, predicate: F) -> StorageResult<Vec<T>>
    where
        T: Record,
        F: Fn(&T) -> bool,
    {
        let records = self.list::<T>().await?;
        Ok(records.into_iter().filter(|r| predicate(r)).collect())
    }

    pub async fn find<T: Record>(&self, id: &str) -> StorageResult<Option<T>> {
        let records = self.list::<T>().await?;
        Ok(records.into_iter().find(|r| r.record_id() == id))
    }

    /// Append a record whose id must not exist yet
    pub async fn insert<T: Record>(&self, record: T) -> StorageResult<()> {
        let _guard = self.lock_for(T::COLLECTION).lock().await;
        let mut records = self.store.read_all::<T>().await?;

        if records.iter().any(|r| r.record_id() == record.record_id()) {
            return Err(StorageError::DuplicateRecord {
                collection: T::COLLECTION,
                id: record.record_id().to_string(),
            });
        }

        trace!("Inserting {}/{}", T::COLLECTION, record.record_id());
        records.push(record);
        self.store.write_all(&records).await
    }

    /// Insert or replace a record by id.
    ///
    /// Versioned records must arrive with the stored version plus one (or
    /// version 1 when new); anything else is a [`StorageError::VersionConflict`].
    pub async fn save<T: Record>(&self, record: T) -> StorageResult<()> {
        let _guard = self.lock_for(T::COLLECTION).lock().await;
        let mut records = self.store.read_all::<T>().await?;

        let position = records
            .iter()
            .position(|r| r.record_id() == record.record_id());

        if let Some(next) = record.version() {
            let stored = position
                .and_then(|i| records[i].version())
                .unwrap_or(0);
            if next != stored + 1 {
                return Err(StorageError::VersionConflict {
                    collection: T::COLLECTION,
                    id: record.record_id().to_string(),
                    expected: stored + 1,
                    found: next,
                });
            }
        }

        trace!("Saving {}/{}", T::COLLECTION, record.record_id());
        match position {
            Some(i) => records[i] = record,
            None => records.push(record),
        }
        self.store.write_all(&records).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JsonRecordStore, MemoryStorage};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Account {
        id: String,
        balance: f64,
        version: u64,
    }

    impl Record for Account {
        const COLLECTION: Collection = Collection::Clusters;

        fn record_id(&self) -> &str {
            &self.id
        }

        fn version(&self) -> Option<u64> {
            Some(self.version)
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Entry {
        id: String,
        amount: f64,
    }

    impl Record for Entry {
        const COLLECTION: Collection = Collection::Contributions;

        fn record_id(&self) -> &str {
            &self.id
        }
    }

    fn repository() -> Repository<JsonRecordStore> {
        Repository::new(Arc::new(JsonRecordStore::new(Arc::new(MemoryStorage::new()))))
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicates() {
        let repo = repository();
        repo.insert(Entry { id: "e1".into(), amount: 10.0 }).await.unwrap();

        let err = repo
            .insert(Entry { id: "e1".into(), amount: 20.0 })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateRecord { .. }));

        let entries: Vec<Entry> = repo.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].amount, 10.0);
    }

    #[tokio::test]
    async fn test_save_checks_versions() {
        let repo = repository();
        let mut account = Account { id: "a".into(), balance: 1.0, version: 1 };
        repo.save(account.clone()).await.unwrap();

        account.balance = 2.0;
        account.version = 2;
        repo.save(account.clone()).await.unwrap();

        let stale = Account { id: "a".into(), balance: 99.0, version: 2 };
        let err = repo.save(stale).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::VersionConflict { expected: 3, found: 2, .. }
        ));

        let stored: Option<Account> = repo.find("a").await.unwrap();
        assert_eq!(stored.unwrap().balance, 2.0);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_are_not_lost() {
        let repo = Arc::new(repository());

        let mut handles = Vec::new();
        for i in 0..16 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.insert(Entry { id: format!("e{}", i), amount: i as f64 })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let entries: Vec<Entry> = repo.list().await.unwrap();
        assert_eq!(entries.len(), 16);

        let large: Vec<Entry> = repo.filter(|e: &Entry| e.amount >= 8.0).await.unwrap();
        assert_eq!(large.len(), 8);
    }
}
