use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::settings::SyncSettings;
use crate::core::cache::{CacheEntryResolver, EntryStore};
use crate::core::downloader::{HttpTransport, Transport};
use crate::core::error::SyncResult;
use crate::core::http::build_http_client;
use crate::core::manifest::FileLists;
use crate::core::storage::{DiskStore, KeyValueStore, FILES_PARTITION};
use crate::core::version::VersionChainResolver;
use crate::core::vfs::{FilesystemMaterializer, HostFs, VirtualFilesystem};

/// Everything one sync session needs: settings, loaded file lists, and the
/// resolvers bound to the session's store, server and filesystem.
pub struct SyncState {
    pub settings: SyncSettings,
    pub file_lists: FileLists,
    pub(crate) chains: VersionChainResolver,
    pub(crate) resolver: CacheEntryResolver,
    store: Arc<dyn KeyValueStore>,
    transport: Arc<dyn Transport>,
    fs: Arc<dyn VirtualFilesystem>,
    /// Where `settings` are saved back to, if anywhere.
    data_dir: Option<PathBuf>,
}

impl SyncState {
    pub fn new(
        settings: SyncSettings,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn Transport>,
        fs: Arc<dyn VirtualFilesystem>,
    ) -> Self {
        let chains = VersionChainResolver::new(store.clone(), transport.clone(), FILES_PARTITION);
        let resolver = CacheEntryResolver::new(
            EntryStore::new(store.clone(), FILES_PARTITION),
            transport.clone(),
        )
        .with_content_verification(settings.verify_content_digest);

        Self {
            settings,
            file_lists: FileLists::default(),
            chains,
            resolver,
            store,
            transport,
            fs,
            data_dir: None,
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    /// Session over HTTP with the store under `<data_dir>/store` and the
    /// filesystem under `<data_dir>/fs`.
    pub fn open(settings: SyncSettings, data_dir: &Path) -> SyncResult<Self> {
        let client = build_http_client(settings.request_timeout_secs.map(Duration::from_secs))?;
        let transport = Arc::new(HttpTransport::new(client, settings.server_url.clone()));
        let store = Arc::new(DiskStore::new(data_dir.join("store")));
        let fs = Arc::new(HostFs::new(data_dir.join("fs")));
        Ok(Self::new(settings, store, transport, fs).with_data_dir(data_dir))
    }

    pub fn chains(&self) -> &VersionChainResolver {
        &self.chains
    }

    pub fn resolver(&self) -> &CacheEntryResolver {
        &self.resolver
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    pub fn fs(&self) -> &Arc<dyn VirtualFilesystem> {
        &self.fs
    }

    pub fn materializer(&self) -> FilesystemMaterializer<'_> {
        FilesystemMaterializer::new(self.fs.as_ref())
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.file_lists.required.iter().any(|r| r == name)
    }
}
