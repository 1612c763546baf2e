// ─── Asset Sync Core ───
// Versioned data synchronization with a hash-validated local cache.
//
// Architecture:
//   core/
//     version/    — `_BASE` chain resolution with cycle guard
//     cache/      — Cache records + per-file reuse/fetch/fallback resolver
//     downloader/ — Server transport + bounded fetch scheduler
//     vfs/        — Runtime filesystem, symlink-aware materializer
//     manifest/   — `_INSTALL`/`_PERSISTENT`/`_STARTUP`/`_REQUIRED` lists
//     storage/    — Partitioned key-value stores
//     addons      — Zip archive extraction into the filesystem
//     state/      — Settings + session state
//     userdata    — Export/removal of the persistent user directory

pub mod addons;
pub mod cache;
pub mod downloader;
pub mod error;
pub mod http;
pub mod manifest;
pub mod state;
pub mod storage;
pub mod userdata;
pub mod version;
pub mod vfs;

#[cfg(test)]
pub(crate) mod testing;
