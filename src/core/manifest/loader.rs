use tracing::{debug, info, warn};

use super::file_lists::{parse_manifest, FileLists, ManifestKind};
use crate::core::cache::{CacheEntryResolver, Resolution, ResolveOptions};
use crate::core::downloader::{FetchPolicy, FetchScheduler, DEFAULT_CONCURRENCY};
use crate::core::error::{SyncError, SyncResult};
use crate::core::version::{Version, VersionChainResolver};

/// Fetches the reserved manifests of a version and fills `FileLists`.
pub struct ManifestLoader<'a> {
    chains: &'a VersionChainResolver,
    resolver: &'a CacheEntryResolver,
    concurrency: usize,
    required_manifests: &'a [String],
}

impl<'a> ManifestLoader<'a> {
    pub fn new(chains: &'a VersionChainResolver, resolver: &'a CacheEntryResolver) -> Self {
        Self {
            chains,
            resolver,
            concurrency: DEFAULT_CONCURRENCY,
            required_manifests: &[],
        }
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    /// Manifest file names (e.g. `_INSTALL`) whose absence fails the load.
    pub fn with_required_manifests(mut self, names: &'a [String]) -> Self {
        self.required_manifests = names;
        self
    }

    /// Refresh the manifests of `version` and repopulate `lists` in place.
    ///
    /// Refresh failures fall back to cached copies. Only a missing required
    /// manifest, or a failure to resolve the base chain, is an error.
    pub async fn load(&self, version: &Version, lists: &mut FileLists) -> SyncResult<()> {
        let chain = self.chains.resolve_chain(version).await?;
        let names: Vec<String> = ManifestKind::ALL
            .iter()
            .map(|kind| kind.file_name().to_string())
            .collect();

        // 1. Refresh against the server
        let refresh = FetchPolicy {
            force_hash_check: true,
            ..FetchPolicy::default()
        };
        if let Err(e) = FetchScheduler::new(self.resolver)
            .with_concurrency(self.concurrency)
            .run(&names, &chain, &refresh, |_| {}, |_| {})
            .await
        {
            warn!("Could not refresh file lists for {}: {}", version, e);
        }

        // 2. Populate from the cache
        for kind in ManifestKind::ALL {
            let name = kind.file_name();
            let list = lists.list_mut(kind);
            list.clear();

            let options = ResolveOptions {
                force_hash_check: false,
                required: self.required_manifests.iter().any(|r| r == name),
            };
            match self
                .resolver
                .resolve(name, chain.versions(), &chain, options)
                .await
            {
                Ok(Resolution::Resolved(file)) => {
                    let text = String::from_utf8_lossy(&file.bytes);
                    list.extend(parse_manifest(&text));
                    debug!("{} lists {} files", name, list.len());
                }
                Ok(Resolution::NotNeeded) => debug!("No {} for {}", name, version),
                Err(e @ SyncError::RequiredFileMissing { .. }) => return Err(e),
                Err(e) => warn!("Could not populate {}: {}", name, e),
            }
        }

        lists.merge_persistent_into_startup();
        info!(
            "Loaded file lists for {}: {} install, {} startup, {} required",
            version,
            lists.install.len(),
            lists.startup.len(),
            lists.required.len()
        );
        Ok(())
    }
}
