use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use super::KeyValueStore;
use crate::core::error::{SyncError, SyncResult};

type Partitions = HashMap<String, BTreeMap<String, Vec<u8>>>;

/// In-process store. Used for sessions without persistence and in tests.
#[derive(Default)]
pub struct MemoryStore {
    partitions: Mutex<Partitions>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_partitions<R>(&self, f: impl FnOnce(&mut Partitions) -> R) -> SyncResult<R> {
        let mut guard = self
            .partitions
            .lock()
            .map_err(|_| SyncError::Other("memory store lock poisoned".into()))?;
        Ok(f(&mut guard))
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, partition: &str, key: &str) -> SyncResult<Option<Vec<u8>>> {
        self.with_partitions(|p| p.get(partition).and_then(|m| m.get(key)).cloned())
    }

    async fn set(&self, partition: &str, key: &str, value: Vec<u8>) -> SyncResult<()> {
        self.with_partitions(|p| {
            p.entry(partition.to_string())
                .or_default()
                .insert(key.to_string(), value);
        })
    }

    async fn delete(&self, partition: &str, key: &str) -> SyncResult<()> {
        self.with_partitions(|p| {
            if let Some(map) = p.get_mut(partition) {
                map.remove(key);
            }
        })
    }

    async fn keys(&self, partition: &str) -> SyncResult<Vec<String>> {
        self.with_partitions(|p| {
            p.get(partition)
                .map(|m| m.keys().cloned().collect())
                .unwrap_or_default()
        })
    }

    async fn clear(&self, partition: &str) -> SyncResult<()> {
        self.with_partitions(|p| {
            p.remove(partition);
        })
    }
}
