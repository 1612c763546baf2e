use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{normalize_path, FileMode, VirtualFilesystem};
use crate::core::error::{SyncError, SyncResult};

/// Filesystem rooted at a host directory. VFS path `/a/b` maps to
/// `<root>/a/b`; symlink targets are stored as absolute host paths under the
/// root.
pub struct HostFs {
    root: PathBuf,
}

impl HostFs {
    /// A relative `root` is resolved against the current directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn host_path(&self, path: &str) -> SyncResult<PathBuf> {
        let normalized = normalize_path(path);
        let mut host = self.root.clone();
        for segment in normalized.split('/').filter(|s| !s.is_empty()) {
            if segment == ".." {
                return Err(SyncError::filesystem(path, "path escapes filesystem root"));
            }
            host.push(segment);
        }
        Ok(host)
    }

    fn vfs_path(&self, host: &Path) -> SyncResult<String> {
        let relative = host.strip_prefix(&self.root).map_err(|_| {
            SyncError::filesystem(&host.display().to_string(), "link points outside the root")
        })?;
        let segments: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().to_string()),
                _ => None,
            })
            .collect();
        Ok(format!("/{}", segments.join("/")))
    }
}

fn map_io(path: &str, source: std::io::Error) -> SyncError {
    if source.kind() == std::io::ErrorKind::NotFound {
        SyncError::NotFound(path.to_string())
    } else {
        SyncError::filesystem(path, source.to_string())
    }
}

#[async_trait]
impl VirtualFilesystem for HostFs {
    async fn mkdir_tree(&self, path: &str) -> SyncResult<()> {
        let host = self.host_path(path)?;
        tokio::fs::create_dir_all(&host)
            .await
            .map_err(|e| map_io(path, e))
    }

    #[cfg(unix)]
    async fn symlink(&self, target: &str, link: &str) -> SyncResult<()> {
        let host_target = self.host_path(target)?;
        let host_link = self.host_path(link)?;
        tokio::fs::symlink(&host_target, &host_link)
            .await
            .map_err(|e| map_io(link, e))
    }

    #[cfg(not(unix))]
    async fn symlink(&self, _target: &str, link: &str) -> SyncResult<()> {
        Err(SyncError::filesystem(link, "symlinks are not supported on this platform"))
    }

    async fn lstat(&self, path: &str) -> SyncResult<FileMode> {
        let host = self.host_path(path)?;
        let metadata = tokio::fs::symlink_metadata(&host)
            .await
            .map_err(|e| map_io(path, e))?;
        let file_type = metadata.file_type();

        Ok(if file_type.is_symlink() {
            FileMode::SYMLINK
        } else if file_type.is_dir() {
            FileMode::DIRECTORY
        } else {
            FileMode::REGULAR
        })
    }

    async fn readlink(&self, path: &str) -> SyncResult<String> {
        let host = self.host_path(path)?;
        let target = tokio::fs::read_link(&host)
            .await
            .map_err(|e| map_io(path, e))?;
        let absolute = if target.is_absolute() {
            target
        } else {
            host.parent().unwrap_or(&self.root).join(target)
        };
        self.vfs_path(&absolute)
    }

    async fn unlink(&self, path: &str) -> SyncResult<()> {
        let host = self.host_path(path)?;
        tokio::fs::remove_file(&host)
            .await
            .map_err(|e| map_io(path, e))
    }

    async fn create_file(&self, dir: &str, name: &str, bytes: &[u8]) -> SyncResult<()> {
        let vfs_path = format!("{}/{}", dir, name);
        let host = self.host_path(&vfs_path)?;

        // Write inside a block so the handle is dropped before returning
        {
            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&host)
                .await
                .map_err(|e| map_io(&vfs_path, e))?;
            file.write_all(bytes)
                .await
                .map_err(|e| map_io(&vfs_path, e))?;
            file.flush().await.map_err(|e| map_io(&vfs_path, e))?;
        }

        debug!("Wrote {} ({} bytes)", host.display(), bytes.len());
        Ok(())
    }

    async fn read_file(&self, path: &str) -> SyncResult<Vec<u8>> {
        let host = self.host_path(path)?;
        tokio::fs::read(&host).await.map_err(|e| map_io(path, e))
    }

    async fn read_dir(&self, path: &str) -> SyncResult<Vec<String>> {
        let host = self.host_path(path)?;
        let mut entries = tokio::fs::read_dir(&host)
            .await
            .map_err(|e| map_io(path, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| map_io(path, e))? {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(names)
    }

    async fn modified(&self, path: &str) -> SyncResult<Option<DateTime<Utc>>> {
        let host = self.host_path(path)?;
        let metadata = tokio::fs::symlink_metadata(&host)
            .await
            .map_err(|e| map_io(path, e))?;
        Ok(metadata.modified().ok().map(DateTime::<Utc>::from))
    }

    async fn sync(&self, populate: bool) -> SyncResult<()> {
        // Writes land on disk directly
        debug!("Host filesystem sync (populate={}) is a no-op", populate);
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::vfs::FilesystemMaterializer;

    #[tokio::test]
    async fn readlink_round_trips_vfs_paths() {
        let dir = tempfile::tempdir().unwrap();
        let fs = HostFs::new(dir.path());

        fs.mkdir_tree("/home/web_user/.srb2").await.unwrap();
        fs.mkdir_tree("/addons").await.unwrap();
        fs.symlink("/home/web_user/.srb2", "/addons/userdata")
            .await
            .unwrap();

        assert!(fs.lstat("/addons/userdata").await.unwrap().is_link());
        assert_eq!(
            fs.readlink("/addons/userdata").await.unwrap(),
            "/home/web_user/.srb2"
        );
    }

    #[tokio::test]
    async fn relative_root_keeps_links_inside_the_root() {
        let dir = tempfile::Builder::new().tempdir_in(".").unwrap();
        let relative = PathBuf::from(dir.path().file_name().unwrap());
        assert!(relative.is_relative());
        let fs = HostFs::new(relative.clone());
        assert!(fs.root().is_absolute());

        fs.mkdir_tree("/home/web_user/.srb2").await.unwrap();
        fs.mkdir_tree("/addons").await.unwrap();
        fs.symlink("/home/web_user/.srb2", "/addons/userdata")
            .await
            .unwrap();
        assert_eq!(
            fs.readlink("/addons/userdata").await.unwrap(),
            "/home/web_user/.srb2"
        );

        let written = FilesystemMaterializer::new(&fs)
            .write("/addons", "userdata/config.cfg", b"bind w forward")
            .await
            .unwrap();

        assert_eq!(written, "/home/web_user/.srb2/config.cfg");
        assert!(dir.path().join("home/web_user/.srb2/config.cfg").is_file());
    }

    #[tokio::test]
    async fn create_file_refuses_to_clobber() {
        let dir = tempfile::tempdir().unwrap();
        let fs = HostFs::new(dir.path());

        fs.create_file("/", "a.txt", b"one").await.unwrap();
        assert!(fs.create_file("/", "a.txt", b"two").await.is_err());
        fs.unlink("/a.txt").await.unwrap();
        fs.create_file("/", "a.txt", b"two").await.unwrap();

        assert_eq!(fs.read_file("/a.txt").await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn read_dir_and_modified() {
        let dir = tempfile::tempdir().unwrap();
        let fs = HostFs::new(dir.path());
        fs.mkdir_tree("/data/sub").await.unwrap();
        fs.create_file("/data", "b.txt", b"b").await.unwrap();
        fs.create_file("/data", "a.txt", b"a").await.unwrap();

        assert_eq!(fs.read_dir("/data").await.unwrap(), vec!["a.txt", "b.txt", "sub"]);
        assert!(fs.modified("/data/a.txt").await.unwrap().is_some());
        assert!(matches!(
            fs.read_dir("/missing").await.unwrap_err(),
            SyncError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn rejects_parent_segments() {
        let dir = tempfile::tempdir().unwrap();
        let fs = HostFs::new(dir.path());
        assert!(fs.mkdir_tree("/../outside").await.is_err());
    }
}
