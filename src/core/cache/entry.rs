use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::error::{SyncError, SyncResult};
use crate::core::storage::{composite_key, KeyValueStore};
use crate::core::version::Version;

/// Stored bytes for one file at one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEntry {
    pub bytes: Vec<u8>,
    /// MD5 marker the bytes were downloaded against.
    pub hash: String,
    pub stored_at: DateTime<Utc>,
}

impl ContentEntry {
    pub fn new(bytes: Vec<u8>, hash: impl Into<String>) -> Self {
        Self {
            bytes,
            hash: hash.into(),
            stored_at: Utc::now(),
        }
    }

    fn encode(&self) -> SyncResult<Vec<u8>> {
        let header = RecordHeader::Content {
            md5: self.hash.clone(),
            size: self.bytes.len() as u64,
            stored_at: self.stored_at,
        };
        encode_record(&header, &self.bytes)
    }
}

fn encode_record(header: &RecordHeader, body: &[u8]) -> SyncResult<Vec<u8>> {
    let mut out = serde_json::to_vec(header)?;
    out.push(b'\n');
    out.extend_from_slice(body);
    Ok(out)
}

/// Record for a `(filename, version)` key: either real content, or a pointer
/// to the later base version the file is inherited from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry {
    Content(ContentEntry),
    Reference { base: Version },
}

/// First line of an encoded record; content bytes follow the newline.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RecordHeader {
    Content {
        md5: String,
        size: u64,
        stored_at: DateTime<Utc>,
    },
    Reference {
        base: Version,
    },
}

impl CacheEntry {
    pub fn content(bytes: Vec<u8>, hash: impl Into<String>) -> Self {
        CacheEntry::Content(ContentEntry::new(bytes, hash))
    }

    pub fn reference(base: Version) -> Self {
        CacheEntry::Reference { base }
    }

    pub fn is_content(&self) -> bool {
        matches!(self, CacheEntry::Content(_))
    }

    pub fn encode(&self) -> SyncResult<Vec<u8>> {
        match self {
            CacheEntry::Content(content) => content.encode(),
            CacheEntry::Reference { base } => {
                encode_record(&RecordHeader::Reference { base: base.clone() }, &[])
            }
        }
    }

    pub fn decode(key: &str, raw: &[u8]) -> SyncResult<Self> {
        let corrupt = |message: String| SyncError::CorruptRecord {
            key: key.to_string(),
            message,
        };

        let split = raw
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| corrupt("missing record header".into()))?;
        let header: RecordHeader =
            serde_json::from_slice(&raw[..split]).map_err(|e| corrupt(e.to_string()))?;
        let body = &raw[split + 1..];

        match header {
            RecordHeader::Content {
                md5,
                size,
                stored_at,
            } => {
                if body.len() as u64 != size {
                    return Err(corrupt(format!(
                        "expected {} content bytes, found {}",
                        size,
                        body.len()
                    )));
                }
                Ok(CacheEntry::Content(ContentEntry {
                    bytes: body.to_vec(),
                    hash: md5,
                    stored_at,
                }))
            }
            RecordHeader::Reference { base } => Ok(CacheEntry::Reference { base }),
        }
    }
}

/// Typed view of one store partition holding cache records.
#[derive(Clone)]
pub struct EntryStore {
    store: Arc<dyn KeyValueStore>,
    partition: String,
}

impl EntryStore {
    pub fn new(store: Arc<dyn KeyValueStore>, partition: impl Into<String>) -> Self {
        Self {
            store,
            partition: partition.into(),
        }
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn raw(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Read the record for `(file, version)`.
    ///
    /// Unreadable or corrupt records read as absent so the caller falls back
    /// to the server.
    pub async fn load(&self, file: &str, version: &Version) -> Option<CacheEntry> {
        let key = composite_key(file, version.as_str());
        match self.store.get(&self.partition, &key).await {
            Ok(Some(raw)) => match CacheEntry::decode(&key, &raw) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Ignoring cache record: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    pub async fn save(&self, file: &str, version: &Version, entry: &CacheEntry) -> SyncResult<()> {
        let key = composite_key(file, version.as_str());
        self.store.set(&self.partition, &key, entry.encode()?).await
    }

    pub async fn save_content(
        &self,
        file: &str,
        version: &Version,
        content: &ContentEntry,
    ) -> SyncResult<()> {
        let key = composite_key(file, version.as_str());
        self.store.set(&self.partition, &key, content.encode()?).await
    }
}
