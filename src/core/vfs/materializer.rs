use tracing::{debug, info};

use super::{join_path, normalize_path, VirtualFilesystem};
use crate::core::error::{SyncError, SyncResult};

/// Hops allowed when a link target is itself a link.
const MAX_LINK_HOPS: usize = 16;

/// Writes resolved files into the runtime's filesystem.
pub struct FilesystemMaterializer<'a> {
    fs: &'a dyn VirtualFilesystem,
}

impl<'a> FilesystemMaterializer<'a> {
    pub fn new(fs: &'a dyn VirtualFilesystem) -> Self {
        Self { fs }
    }

    /// Write `bytes` to `base_dir/relative_path`, replacing any existing node.
    ///
    /// Directory segments that are symlinks are replaced by their targets, so
    /// the file lands in the real directory. Missing directories are created.
    /// Returns the path actually written.
    pub async fn write(
        &self,
        base_dir: &str,
        relative_path: &str,
        bytes: &[u8],
    ) -> SyncResult<String> {
        let relative = relative_path.replace('\\', "/");
        let (dir, leaf) = match relative.rsplit_once('/') {
            Some((dir, leaf)) => (join_path(base_dir, dir), leaf),
            None => (normalize_path(base_dir), relative.as_str()),
        };
        if leaf.is_empty() || leaf == "." || leaf == ".." {
            return Err(SyncError::filesystem(relative_path, "missing file name"));
        }

        let dir = self.resolve_links(&dir).await?;
        let target = join_path(&dir, leaf);
        info!("Writing {} ({} bytes)", target, bytes.len());

        if let Err(e) = self.fs.mkdir_tree(&dir).await {
            debug!("mkdir_tree {}: {}", dir, e);
        }
        match self.fs.unlink(&target).await {
            Ok(()) | Err(SyncError::NotFound(_)) => {}
            Err(e) => debug!("unlink {}: {}", target, e),
        }

        self.fs.create_file(&dir, leaf, bytes).await?;
        Ok(target)
    }

    /// Walk `dir` segment by segment, substituting symlink targets.
    async fn resolve_links(&self, dir: &str) -> SyncResult<String> {
        let mut resolved = String::from("/");

        for segment in normalize_path(dir).split('/').filter(|s| !s.is_empty()) {
            if segment == ".." {
                return Err(SyncError::filesystem(dir, "parent segments are not allowed"));
            }

            let mut candidate = join_path(&resolved, segment);
            let mut hops = 0;
            while let Ok(mode) = self.fs.lstat(&candidate).await {
                if !mode.is_link() {
                    break;
                }
                if hops == MAX_LINK_HOPS {
                    return Err(SyncError::filesystem(&candidate, "too many levels of symlinks"));
                }
                let link_target = self.fs.readlink(&candidate).await?;
                candidate = if link_target.starts_with('/') {
                    normalize_path(&link_target)
                } else {
                    join_path(&resolved, &link_target)
                };
                hops += 1;
            }
            resolved = candidate;
        }

        Ok(resolved)
    }
}
