use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

use crate::{check_key, Storage, StorageOptions, StorageResult};

const STAGING_SUFFIX: &str = ".staged";

/// Blobs as files under a root directory.
///
/// A write lands in a staging file next to its target and is renamed over
/// it, so a crash leaves either the old document or the new one.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
    options: StorageOptions,
}

impl FileStorage {
    /// Open `root`, creating it if it does not exist yet
    pub async fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!("File storage rooted at {}", root.display());
        Ok(Self {
            root,
            options: StorageOptions::default(),
        })
    }

    pub fn with_options(self, options: StorageOptions) -> Self {
        Self { options, ..self }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn locate(&self, key: &str) -> StorageResult<PathBuf> {
        check_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |path, part| path.join(part)))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.locate(key)?;
        match fs::read(&path).await {
            Ok(bytes) => {
                trace!("Read {} bytes from {}", bytes.len(), key);
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> StorageResult<()> {
        let path = self.locate(key)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }

        let mut staged = path.clone().into_os_string();
        staged.push(STAGING_SUFFIX);
        let staged = PathBuf::from(staged);

        let mut file = fs::File::create(&staged).await?;
        file.write_all(bytes).await?;
        if self.options.sync_write {
            file.sync_all().await?;
        }
        drop(file);
        fs::rename(&staged, &path).await?;

        debug!("Wrote {} bytes to {}", bytes.len(), key);
        Ok(())
    }
}
