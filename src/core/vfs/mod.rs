// ─── Virtual Filesystem ───
// Hierarchical path interface the game runtime reads its data from.

mod host;
mod materializer;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::error::SyncResult;

pub use host::HostFs;
pub use materializer::FilesystemMaterializer;
pub use memory::MemoryFs;

/// POSIX-style file mode of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMode(pub u32);

impl FileMode {
    pub const TYPE_MASK: u32 = 0o170000;
    pub const DIRECTORY: FileMode = FileMode(0o040000);
    pub const REGULAR: FileMode = FileMode(0o100000);
    pub const SYMLINK: FileMode = FileMode(0o120000);

    pub fn is_link(self) -> bool {
        self.0 & Self::TYPE_MASK == Self::SYMLINK.0
    }

    pub fn is_dir(self) -> bool {
        self.0 & Self::TYPE_MASK == Self::DIRECTORY.0
    }

    pub fn is_file(self) -> bool {
        self.0 & Self::TYPE_MASK == Self::REGULAR.0
    }
}

/// Filesystem consumed by the runtime. Paths are absolute and `/`-separated.
///
/// Missing nodes are reported as `SyncError::NotFound`.
#[async_trait]
pub trait VirtualFilesystem: Send + Sync {
    /// Create `path` and every missing ancestor.
    async fn mkdir_tree(&self, path: &str) -> SyncResult<()>;

    async fn symlink(&self, target: &str, link: &str) -> SyncResult<()>;

    /// Mode of `path` without following a final symlink.
    async fn lstat(&self, path: &str) -> SyncResult<FileMode>;

    async fn readlink(&self, path: &str) -> SyncResult<String>;

    /// Remove a file or symlink.
    async fn unlink(&self, path: &str) -> SyncResult<()>;

    async fn create_file(&self, dir: &str, name: &str, bytes: &[u8]) -> SyncResult<()>;

    async fn read_file(&self, path: &str) -> SyncResult<Vec<u8>>;

    /// Names of the direct children of the directory `path`, sorted.
    async fn read_dir(&self, path: &str) -> SyncResult<Vec<String>>;

    /// Last modification time of a regular file, when the backend tracks it.
    async fn modified(&self, _path: &str) -> SyncResult<Option<DateTime<Utc>>> {
        Ok(None)
    }

    /// Flush to (`populate == false`) or reload from (`true`) the persistent
    /// backing store.
    async fn sync(&self, populate: bool) -> SyncResult<()>;
}

/// Collapse repeated separators and drop `.` segments. Always absolute.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    format!("/{}", segments.join("/"))
}

pub fn join_path(dir: &str, name: &str) -> String {
    normalize_path(&format!("{}/{}", dir, name))
}

/// Every regular file at or below `root`, sorted. Symlinks are not followed.
pub async fn list_files(fs: &dyn VirtualFilesystem, root: &str) -> SyncResult<Vec<String>> {
    let root = normalize_path(root);
    let mode = fs.lstat(&root).await?;
    if mode.is_file() {
        return Ok(vec![root]);
    }
    if !mode.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut pending = vec![root];
    while let Some(dir) = pending.pop() {
        for name in fs.read_dir(&dir).await? {
            let path = join_path(&dir, &name);
            let mode = fs.lstat(&path).await?;
            if mode.is_dir() {
                pending.push(path);
            } else if mode.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_handles_separators() {
        assert_eq!(normalize_path("//addons/./userdata/"), "/addons/userdata");
        assert_eq!(normalize_path("music\\intro.ogg"), "/music/intro.ogg");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(join_path("/", "srb2.pk3"), "/srb2.pk3");
    }

    #[tokio::test]
    async fn list_files_walks_directories_but_not_links() {
        let fs = MemoryFs::new();
        fs.mkdir_tree("/home/web_user/.srb2/luafiles").await.unwrap();
        fs.create_file("/home/web_user/.srb2", "config.cfg", b"c")
            .await
            .unwrap();
        fs.create_file("/home/web_user/.srb2/luafiles", "save.dat", b"s")
            .await
            .unwrap();
        fs.mkdir_tree("/addons").await.unwrap();
        fs.symlink("/home/web_user/.srb2", "/addons/userdata")
            .await
            .unwrap();

        assert_eq!(
            list_files(&fs, "/").await.unwrap(),
            vec![
                "/home/web_user/.srb2/config.cfg",
                "/home/web_user/.srb2/luafiles/save.dat"
            ]
        );
        assert!(list_files(&fs, "/addons/userdata").await.unwrap().is_empty());
        assert_eq!(
            list_files(&fs, "/home/web_user/.srb2/config.cfg")
                .await
                .unwrap(),
            vec!["/home/web_user/.srb2/config.cfg"]
        );
    }

    #[test]
    fn file_mode_kinds() {
        assert!(FileMode::SYMLINK.is_link());
        assert!(!FileMode::SYMLINK.is_dir());
        assert!(FileMode(0o040755).is_dir());
        assert!(FileMode(0o100644).is_file());
    }
}
