// ─── Addon Archives ───
// Unpacks user-supplied zip archives into the runtime filesystem.

use std::io::{Cursor, Read};

use tracing::{debug, info, warn};

use crate::core::error::SyncResult;
use crate::core::vfs::{join_path, FilesystemMaterializer, VirtualFilesystem};

/// Extract every file of the zip `archive` under `dest_dir`.
///
/// Entries whose names would escape `dest_dir` are skipped. Returns the paths
/// written, in archive order.
pub async fn extract_archive(
    fs: &dyn VirtualFilesystem,
    dest_dir: &str,
    archive: &[u8],
) -> SyncResult<Vec<String>> {
    let (dirs, files) = read_entries(archive)?;

    for dir in &dirs {
        let path = join_path(dest_dir, dir);
        if let Err(e) = fs.mkdir_tree(&path).await {
            debug!("mkdir_tree {}: {}", path, e);
        }
    }

    let materializer = FilesystemMaterializer::new(fs);
    let mut written = Vec::with_capacity(files.len());
    for (name, bytes) in files {
        written.push(materializer.write(dest_dir, &name, &bytes).await?);
    }

    fs.sync(false).await?;
    info!("Extracted {} files into {}", written.len(), dest_dir);
    Ok(written)
}

/// Upper bound on the buffer reserved from an entry's declared size.
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

type ArchiveEntries = (Vec<String>, Vec<(String, Vec<u8>)>);

/// Read the archive fully before touching the filesystem.
fn read_entries(archive: &[u8]) -> SyncResult<ArchiveEntries> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))?;
    let mut dirs = Vec::new();
    let mut files = Vec::new();

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(name) = entry.enclosed_name() else {
            warn!("Skipping unsafe archive entry {:?}", entry.name());
            continue;
        };
        let name = name.to_string_lossy().replace('\\', "/");

        if entry.is_dir() {
            dirs.push(name);
            continue;
        }

        let mut bytes = Vec::with_capacity(entry.size().min(MAX_PREALLOC) as usize);
        entry.read_to_end(&mut bytes)?;
        files.push((name, bytes));
    }

    Ok((dirs, files))
}
