// Test doubles shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::cache::md5_hex;
use crate::core::downloader::{FetchResponse, Transport};
use crate::core::error::{SyncError, SyncResult};
use crate::core::storage::{KeyValueStore, MemoryStore};

/// In-memory data server. Unknown paths answer 404.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<HashMap<String, (u16, Vec<u8>)>>,
    unreachable: Mutex<HashSet<String>>,
    requests: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, path: &str, body: impl Into<Vec<u8>>) {
        self.responses
            .lock()
            .unwrap()
            .insert(path.to_string(), (200, body.into()));
    }

    pub fn set_status(&self, path: &str, status: u16) {
        self.responses
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, Vec::new()));
    }

    pub fn remove(&self, path: &str) {
        self.responses.lock().unwrap().remove(path);
    }

    /// Fail requests for `path` before any status is received.
    pub fn set_unreachable(&self, path: &str) {
        self.unreachable.lock().unwrap().insert(path.to_string());
    }

    /// Serve `data/{version}/{name}` together with its `.md5` marker.
    pub fn publish(&self, version: &str, name: &str, bytes: &[u8]) {
        let path = format!("data/{}/{}", version, name);
        self.put(&format!("{}.md5", path), md5_hex(bytes));
        self.put(&path, bytes.to_vec());
    }

    pub fn set_base(&self, version: &str, parent: &str) {
        self.put(&format!("data/{}/_BASE", version), parent.as_bytes().to_vec());
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.as_str() == path)
            .count()
    }

    pub fn count_matching(&self, predicate: impl Fn(&str) -> bool) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|p| predicate(p))
            .count()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn serve(&self, path: &str) -> SyncResult<FetchResponse<Vec<u8>>> {
        self.requests.lock().unwrap().push(path.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        // Give sibling requests a chance to start
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.unreachable.lock().unwrap().contains(path) {
            return Err(SyncError::Other(format!("connection refused: {}", path)));
        }

        let (status, body) = self
            .responses
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or((404, Vec::new()));
        Ok(FetchResponse {
            url: format!("mock://{}", path),
            status,
            body,
        })
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch_text(&self, path: &str) -> SyncResult<FetchResponse<String>> {
        let response = self.serve(path).await?;
        Ok(FetchResponse {
            url: response.url,
            status: response.status,
            body: String::from_utf8_lossy(&response.body).to_string(),
        })
    }

    async fn fetch_bytes(&self, path: &str) -> SyncResult<FetchResponse<Vec<u8>>> {
        self.serve(path).await
    }
}

/// Memory store whose writes fail for selected keys.
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    failing_keys: Mutex<HashSet<String>>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes_to(&self, key: &str) {
        self.failing_keys.lock().unwrap().insert(key.to_string());
    }
}

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, partition: &str, key: &str) -> SyncResult<Option<Vec<u8>>> {
        self.inner.get(partition, key).await
    }

    async fn set(&self, partition: &str, key: &str, value: Vec<u8>) -> SyncResult<()> {
        if self.failing_keys.lock().unwrap().contains(key) {
            return Err(SyncError::storage(partition, key, "quota exceeded"));
        }
        self.inner.set(partition, key, value).await
    }

    async fn delete(&self, partition: &str, key: &str) -> SyncResult<()> {
        self.inner.delete(partition, key).await
    }

    async fn keys(&self, partition: &str) -> SyncResult<Vec<String>> {
        self.inner.keys(partition).await
    }

    async fn clear(&self, partition: &str) -> SyncResult<()> {
        self.inner.clear(partition).await
    }
}
