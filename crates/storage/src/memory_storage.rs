use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{check_key, Storage, StorageResult};

/// Blobs held in a sorted map. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    blobs: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        check_key(key)?;
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> StorageResult<()> {
        check_key(key)?;
        self.blobs.write().await.insert(key.to_owned(), bytes.to_vec());
        Ok(())
    }
}
