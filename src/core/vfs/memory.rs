use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{normalize_path, FileMode, VirtualFilesystem};
use crate::core::error::{SyncError, SyncResult};

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File {
        bytes: Vec<u8>,
        modified: DateTime<Utc>,
    },
    Link(String),
}

/// In-memory filesystem with a flat node table.
///
/// Symlinks are only resolved through `readlink`; a path that passes through
/// a link is not traversed, as in the runtime's own filesystem.
pub struct MemoryFs {
    nodes: Mutex<BTreeMap<String, Node>>,
    syncs: Mutex<Vec<bool>>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir);
        Self {
            nodes: Mutex::new(nodes),
            syncs: Mutex::new(Vec::new()),
        }
    }
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// `populate` flags of every `sync` call so far.
    pub fn sync_history(&self) -> Vec<bool> {
        self.syncs.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn with_nodes<R>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, Node>) -> SyncResult<R>,
    ) -> SyncResult<R> {
        let mut nodes = self
            .nodes
            .lock()
            .map_err(|_| SyncError::Other("memory filesystem lock poisoned".into()))?;
        f(&mut nodes)
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn require_dir(nodes: &BTreeMap<String, Node>, dir: &str) -> SyncResult<()> {
    match nodes.get(dir) {
        Some(Node::Dir) => Ok(()),
        Some(_) => Err(SyncError::filesystem(dir, "not a directory")),
        None => Err(SyncError::NotFound(dir.to_string())),
    }
}

#[async_trait]
impl VirtualFilesystem for MemoryFs {
    async fn mkdir_tree(&self, path: &str) -> SyncResult<()> {
        let path = normalize_path(path);
        self.with_nodes(|nodes| {
            let mut current = String::new();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                current.push('/');
                current.push_str(segment);
                match nodes.get(&current) {
                    Some(Node::Dir) => {}
                    Some(_) => return Err(SyncError::filesystem(&current, "not a directory")),
                    None => {
                        nodes.insert(current.clone(), Node::Dir);
                    }
                }
            }
            Ok(())
        })
    }

    async fn symlink(&self, target: &str, link: &str) -> SyncResult<()> {
        let link = normalize_path(link);
        self.with_nodes(|nodes| {
            require_dir(nodes, parent_of(&link))?;
            if nodes.contains_key(&link) {
                return Err(SyncError::filesystem(&link, "already exists"));
            }
            nodes.insert(link.clone(), Node::Link(target.to_string()));
            Ok(())
        })
    }

    async fn lstat(&self, path: &str) -> SyncResult<FileMode> {
        let path = normalize_path(path);
        self.with_nodes(|nodes| match nodes.get(&path) {
            Some(Node::Dir) => Ok(FileMode(FileMode::DIRECTORY.0 | 0o755)),
            Some(Node::File { .. }) => Ok(FileMode(FileMode::REGULAR.0 | 0o644)),
            Some(Node::Link(_)) => Ok(FileMode(FileMode::SYMLINK.0 | 0o777)),
            None => Err(SyncError::NotFound(path.clone())),
        })
    }

    async fn readlink(&self, path: &str) -> SyncResult<String> {
        let path = normalize_path(path);
        self.with_nodes(|nodes| match nodes.get(&path) {
            Some(Node::Link(target)) => Ok(target.clone()),
            Some(_) => Err(SyncError::filesystem(&path, "not a symlink")),
            None => Err(SyncError::NotFound(path.clone())),
        })
    }

    async fn unlink(&self, path: &str) -> SyncResult<()> {
        let path = normalize_path(path);
        self.with_nodes(|nodes| match nodes.get(&path) {
            Some(Node::Dir) => Err(SyncError::filesystem(&path, "is a directory")),
            Some(_) => {
                nodes.remove(&path);
                Ok(())
            }
            None => Err(SyncError::NotFound(path.clone())),
        })
    }

    async fn create_file(&self, dir: &str, name: &str, bytes: &[u8]) -> SyncResult<()> {
        let dir = normalize_path(dir);
        let path = normalize_path(&format!("{}/{}", dir, name));
        self.with_nodes(|nodes| {
            require_dir(nodes, &dir)?;
            if nodes.contains_key(&path) {
                return Err(SyncError::filesystem(&path, "already exists"));
            }
            nodes.insert(
                path.clone(),
                Node::File {
                    bytes: bytes.to_vec(),
                    modified: Utc::now(),
                },
            );
            Ok(())
        })
    }

    async fn read_file(&self, path: &str) -> SyncResult<Vec<u8>> {
        let path = normalize_path(path);
        self.with_nodes(|nodes| match nodes.get(&path) {
            Some(Node::File { bytes, .. }) => Ok(bytes.clone()),
            Some(_) => Err(SyncError::filesystem(&path, "not a regular file")),
            None => Err(SyncError::NotFound(path.clone())),
        })
    }

    async fn read_dir(&self, path: &str) -> SyncResult<Vec<String>> {
        let path = normalize_path(path);
        self.with_nodes(|nodes| {
            require_dir(nodes, &path)?;
            let prefix = if path == "/" {
                "/".to_string()
            } else {
                format!("{}/", path)
            };
            Ok(nodes
                .range(prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(&prefix))
                .map(|(key, _)| &key[prefix.len()..])
                .filter(|rest| !rest.is_empty() && !rest.contains('/'))
                .map(str::to_string)
                .collect())
        })
    }

    async fn modified(&self, path: &str) -> SyncResult<Option<DateTime<Utc>>> {
        let path = normalize_path(path);
        self.with_nodes(|nodes| match nodes.get(&path) {
            Some(Node::File { modified, .. }) => Ok(Some(*modified)),
            Some(_) => Ok(None),
            None => Err(SyncError::NotFound(path.clone())),
        })
    }

    async fn sync(&self, populate: bool) -> SyncResult<()> {
        debug!("Memory filesystem sync (populate={})", populate);
        if let Ok(mut syncs) = self.syncs.lock() {
            syncs.push(populate);
        }
        Ok(())
    }
}
