// ─── User Data ───
// Export and removal of files kept in the persistent user directory.

use std::io::{Cursor, Write};

use chrono::{DateTime, Datelike, Timelike, Utc};
use tracing::{info, warn};
use zip::write::SimpleFileOptions;

use crate::core::error::{SyncError, SyncResult};
use crate::core::vfs::{list_files, normalize_path, VirtualFilesystem};

/// Flush the filesystem, then zip every file under `prefix`.
///
/// Entry names are relative to the parent of `prefix`, so exporting
/// `/home/web_user/.srb2` yields `.srb2/...` entries.
pub async fn export_archive(fs: &dyn VirtualFilesystem, prefix: &str) -> SyncResult<Vec<u8>> {
    fs.sync(false).await?;

    let prefix = normalize_path(prefix);
    let base = match prefix.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &prefix[..idx],
    };
    let files = list_files(fs, &prefix).await?;

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for path in &files {
        let bytes = fs.read_file(path).await?;
        let modified = fs.modified(path).await?.unwrap_or_else(Utc::now);
        let name = path[base.len()..].trim_start_matches('/');

        let options = SimpleFileOptions::default().last_modified_time(zip_time(modified));
        writer.start_file(name, options)?;
        writer.write_all(&bytes)?;
    }
    let archive = writer.finish()?.into_inner();

    info!(
        "Exported {} files from {} ({} bytes)",
        files.len(),
        prefix,
        archive.len()
    );
    Ok(archive)
}

/// Remove `path` and, for a directory, every file below it, then flush.
///
/// Directories themselves are kept. Returns the number of entries removed.
pub async fn delete_tree(fs: &dyn VirtualFilesystem, path: &str) -> SyncResult<usize> {
    let path = normalize_path(path);
    let targets = match fs.lstat(&path).await {
        Ok(mode) if mode.is_link() => vec![path.clone()],
        Ok(_) => list_files(fs, &path).await?,
        Err(SyncError::NotFound(_)) => Vec::new(),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    for target in &targets {
        match fs.unlink(target).await {
            Ok(()) => removed += 1,
            Err(e) => warn!("Could not delete {}: {}", target, e),
        }
    }

    fs.sync(false).await?;
    info!("Deleted {} entries under {}", removed, path);
    Ok(removed)
}

/// Zip timestamps start at 1980; anything earlier maps to that epoch.
fn zip_time(at: DateTime<Utc>) -> zip::DateTime {
    let year = u16::try_from(at.year()).unwrap_or_default();
    zip::DateTime::from_date_and_time(
        year,
        at.month() as u8,
        at.day() as u8,
        at.hour() as u8,
        at.minute() as u8,
        at.second() as u8,
    )
    .unwrap_or_default()
}
