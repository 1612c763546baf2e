// ─── Commands ───
// Operations exposed to the front end. Each takes the session state and
// reports progress through callbacks only.

use tracing::{debug, info, warn};

use crate::core::{addons, userdata};
use crate::core::cache::{ResolveOptions, ResolvedFile};
use crate::core::downloader::{FetchPolicy, FetchProgress, FetchReport, FetchScheduler};
use crate::core::error::{SyncError, SyncResult};
use crate::core::manifest::ManifestLoader;
use crate::core::state::SyncState;
use crate::core::version::Version;
use crate::core::vfs::join_path;

/// Server file naming the default program version.
const DEFAULT_VERSION_FILE: &str = "version-package.txt";

/// Make sure every file in `files` is cached for `version`.
///
/// With `check_server`, stored copies are revalidated against the server's
/// markers. Fails on the first required file that is missing or on any
/// transport error; `on_done` runs only on success.
pub async fn check_install_file_list<P, D>(
    state: &SyncState,
    files: &[String],
    version: &Version,
    check_server: bool,
    on_progress: P,
    on_done: D,
) -> SyncResult<FetchReport>
where
    P: FnMut(FetchProgress<'_>),
    D: FnOnce(&FetchReport),
{
    let chain = state.chains.resolve_chain(version).await?;
    let policy = FetchPolicy {
        force_hash_check: check_server,
        required: state.file_lists.required_set(),
    };

    FetchScheduler::new(&state.resolver)
        .with_concurrency(state.settings.concurrency)
        .run(files, &chain, &policy, on_progress, on_done)
        .await
}

/// Wipe all cached program data. Failures are logged, never returned.
pub async fn reset_program_data(state: &SyncState) {
    for partition in &state.settings.reset_partitions {
        if let Err(e) = state.store().clear(partition).await {
            warn!("Could not clear {}: {}", partition, e);
        }
    }
    state.chains.cache().clear();
    info!("Program data reset");
}

/// Resolve `name` for `version`, from storage when possible.
///
/// `None` means the file is optional and no base provides it.
pub async fn retrieve_installed_file(
    state: &SyncState,
    name: &str,
    version: &Version,
    check_server: bool,
) -> SyncResult<Option<ResolvedFile>> {
    let chain = state.chains.resolve_chain(version).await?;
    let options = ResolveOptions {
        force_hash_check: check_server,
        required: state.is_required(name),
    };

    let resolution = state
        .resolver
        .resolve(name, chain.versions(), &chain, options)
        .await?;
    Ok(resolution.into_file())
}

/// Resolve `name` and write it into the filesystem under the data root.
///
/// Returns the path written, or `None` when the file is not needed.
pub async fn write_installed_file_to_fs(
    state: &SyncState,
    name: &str,
    version: &Version,
    check_server: bool,
) -> SyncResult<Option<String>> {
    let Some(file) = retrieve_installed_file(state, name, version, check_server).await? else {
        return Ok(None);
    };

    let path = state
        .materializer()
        .write(&state.settings.data_root, name, &file.bytes)
        .await?;
    Ok(Some(path))
}

/// Refresh the manifests of `version` into `state.file_lists`.
pub async fn load_file_lists(state: &mut SyncState, version: &Version) -> SyncResult<()> {
    let SyncState {
        settings,
        file_lists,
        chains,
        resolver,
        ..
    } = state;

    ManifestLoader::new(chains, resolver)
        .with_concurrency(settings.concurrency)
        .with_required_manifests(&settings.required_manifests)
        .load(version, file_lists)
        .await
}

/// Load the file lists of `version`, then cache every install file.
pub async fn install_program<P, D>(
    state: &mut SyncState,
    version: &Version,
    check_server: bool,
    on_progress: P,
    on_done: D,
) -> SyncResult<FetchReport>
where
    P: FnMut(FetchProgress<'_>),
    D: FnOnce(&FetchReport),
{
    load_file_lists(state, version).await?;
    let files = state.file_lists.install.clone();
    check_install_file_list(state, &files, version, check_server, on_progress, on_done).await
}

/// Write every startup file into the filesystem and flush it.
pub async fn write_startup_files(
    state: &SyncState,
    version: &Version,
    check_server: bool,
) -> SyncResult<Vec<String>> {
    let mut written = Vec::new();
    for name in &state.file_lists.startup {
        if let Some(path) = write_installed_file_to_fs(state, name, version, check_server).await? {
            written.push(path);
        }
    }

    state.fs().sync(false).await?;
    info!("Placed {} startup files", written.len());
    Ok(written)
}

/// Remove `name` from the filesystem unless it is a persistent file.
///
/// Returns whether the file was eligible for removal.
pub async fn delete_installed_file_from_fs(state: &SyncState, name: &str) -> SyncResult<bool> {
    if state.file_lists.is_persistent(name) {
        return Ok(false);
    }

    let path = join_path(&state.settings.data_root, name);
    match state.fs().unlink(&path).await {
        Ok(()) | Err(SyncError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }
    state.fs().sync(false).await?;
    Ok(true)
}

/// Create the addons directory, link it into the persistent user directory
/// and load persisted contents.
pub async fn initialize_fs(state: &SyncState) -> SyncResult<()> {
    let fs = state.fs();
    let mount = &state.settings.persistent_mount;

    fs.mkdir_tree(&mount.addons_dir).await?;
    fs.mkdir_tree(&mount.user_dir).await?;
    for name in &mount.links {
        let link = join_path(&mount.addons_dir, name);
        if fs.lstat(&link).await.is_ok() {
            continue;
        }
        fs.symlink(&mount.user_dir, &link).await?;
    }

    fs.sync(true).await
}

/// Unpack a zip archive of addons under `dest_dir`.
pub async fn extract_addon_archive(
    state: &SyncState,
    dest_dir: &str,
    archive: &[u8],
) -> SyncResult<Vec<String>> {
    addons::extract_archive(state.fs().as_ref(), dest_dir, archive).await
}

/// Ask the server for its default program version and record it as the
/// saved default.
///
/// Returns the new default only when it replaces a different one recorded
/// earlier. A missing or empty version file changes nothing.
pub async fn check_default_version(state: &mut SyncState) -> SyncResult<Option<Version>> {
    let response = state.transport().fetch_text(DEFAULT_VERSION_FILE).await?;
    if response.is_not_found() {
        debug!("Server has no {}", DEFAULT_VERSION_FILE);
        return Ok(None);
    }
    let text = response.into_success()?;
    let latest = text.trim();
    if latest.is_empty() {
        return Ok(None);
    }

    let previous = state.settings.default_version.replace(latest.to_string());
    if let Some(data_dir) = state.data_dir() {
        if let Err(e) = state.settings.save(data_dir) {
            warn!("Could not save default version {}: {}", latest, e);
        }
    }

    match previous {
        Some(previous) if previous != latest => {
            info!("New default program version {} (was {})", latest, previous);
            Ok(Some(Version::from(latest)))
        }
        _ => Ok(None),
    }
}

/// Zip every persisted file under `prefix` for download.
pub async fn export_user_data(state: &SyncState, prefix: &str) -> SyncResult<Vec<u8>> {
    userdata::export_archive(state.fs().as_ref(), prefix).await
}

/// Delete `path` (a file, link or whole directory of files) from persistent
/// storage. Returns the number of entries removed.
pub async fn delete_user_data(state: &SyncState, path: &str) -> SyncResult<usize> {
    userdata::delete_tree(state.fs().as_ref(), path).await
}
