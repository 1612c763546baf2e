use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use super::KeyValueStore;
use crate::core::error::{SyncError, SyncResult};

const TEMP_PREFIX: &str = ".tmp-";

/// Store backed by a host directory: one sub-directory per partition, one
/// file per key. Key segments separated by `/` become nested directories.
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_dir(&self, partition: &str) -> SyncResult<PathBuf> {
        if !is_safe_segment(partition) {
            return Err(SyncError::storage(partition, "", "invalid partition name"));
        }
        Ok(self.root.join(partition))
    }

    fn key_path(&self, partition: &str, key: &str) -> SyncResult<PathBuf> {
        let mut path = self.partition_dir(partition)?;
        let mut segments = 0;
        for segment in key.split('/') {
            if !is_safe_segment(segment) || segment.starts_with(TEMP_PREFIX) {
                return Err(SyncError::storage(partition, key, "invalid key segment"));
            }
            path.push(segment);
            segments += 1;
        }
        if segments == 0 {
            return Err(SyncError::storage(partition, key, "empty key"));
        }
        Ok(path)
    }
}

fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty() && segment != "." && segment != ".." && !segment.contains('\\')
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SyncError + '_ {
    move |source| SyncError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl KeyValueStore for DiskStore {
    async fn get(&self, partition: &str, key: &str) -> SyncResult<Option<Vec<u8>>> {
        let path = self.key_path(partition, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    async fn set(&self, partition: &str, key: &str, value: Vec<u8>) -> SyncResult<()> {
        let path = self.key_path(partition, key)?;
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(io_err(&parent))?;

        // Write next to the target, then rename over it
        let temp = parent.join(format!("{}{}", TEMP_PREFIX, Uuid::new_v4()));
        {
            let mut file = tokio::fs::File::create(&temp)
                .await
                .map_err(io_err(&temp))?;
            file.write_all(&value).await.map_err(io_err(&temp))?;
            file.flush().await.map_err(io_err(&temp))?;
        }
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(io_err(&path)(e));
        }

        debug!("Stored {}/{} ({} bytes)", partition, key, value.len());
        Ok(())
    }

    async fn delete(&self, partition: &str, key: &str) -> SyncResult<()> {
        let path = self.key_path(partition, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    async fn keys(&self, partition: &str) -> SyncResult<Vec<String>> {
        let root = self.partition_dir(partition)?;
        let mut keys = Vec::new();
        let mut pending = vec![(root.clone(), String::new())];

        while let Some((dir, prefix)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(io_err(&dir)(e)),
            };

            while let Some(entry) = entries.next_entry().await.map_err(io_err(&dir))? {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with(TEMP_PREFIX) {
                    continue;
                }
                let key = if prefix.is_empty() {
                    name
                } else {
                    format!("{}/{}", prefix, name)
                };
                let file_type = entry.file_type().await.map_err(io_err(&dir))?;
                if file_type.is_dir() {
                    pending.push((entry.path(), key));
                } else {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn clear(&self, partition: &str) -> SyncResult<()> {
        let dir = self.partition_dir(partition)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&dir)(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_nested_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());

        store
            .set("files", "data/v1/music/intro.ogg", vec![1, 2, 3])
            .await
            .unwrap();
        store.set("files", "data/v1/_BASE", b"v0".to_vec()).await.unwrap();

        assert_eq!(
            store.get("files", "data/v1/music/intro.ogg").await.unwrap(),
            Some(vec![1, 2, 3])
        );
        assert_eq!(
            store.keys("files").await.unwrap(),
            vec!["data/v1/_BASE", "data/v1/music/intro.ogg"]
        );
    }

    #[tokio::test]
    async fn overwrite_replaces_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());

        store.set("files", "k", b"old".to_vec()).await.unwrap();
        store.set("files", "k", b"new".to_vec()).await.unwrap();

        assert_eq!(store.get("files", "k").await.unwrap(), Some(b"new".to_vec()));
        assert_eq!(store.keys("files").await.unwrap(), vec!["k"]);
    }

    #[tokio::test]
    async fn clear_and_missing_partition() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());

        assert!(store.keys("files").await.unwrap().is_empty());
        store.set("files", "data/v1/a", vec![0]).await.unwrap();
        store.clear("files").await.unwrap();
        store.clear("files").await.unwrap();

        assert_eq!(store.get("files", "data/v1/a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path());

        let err = store
            .set("files", "data/../../escape", vec![0])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Storage { .. }));
    }
}
