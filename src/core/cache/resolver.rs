// ─── Cache Entry Resolver ───
// Decides, for one file, between the stored copy, a fresh download, or a
// fallback to an older base version.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::digest::{md5_hex, parse_digest};
use super::entry::{CacheEntry, ContentEntry, EntryStore};
use crate::core::downloader::Transport;
use crate::core::error::{SyncError, SyncResult};
use crate::core::storage::composite_key;
use crate::core::version::{BaseChain, Version};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Compare stored content against the server's marker even when a local
    /// copy exists.
    pub force_hash_check: bool,
    /// Absence across every candidate version is an error rather than
    /// `NotNeeded`.
    pub required: bool,
}

/// Content of a file together with the version it was found at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub name: String,
    pub version: Version,
    pub bytes: Vec<u8>,
    pub hash: String,
}

impl ResolvedFile {
    fn from_entry(name: &str, version: &Version, entry: ContentEntry) -> Self {
        Self {
            name: name.to_string(),
            version: version.clone(),
            bytes: entry.bytes,
            hash: entry.hash,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(ResolvedFile),
    /// Optional file that no candidate version provides.
    NotNeeded,
}

impl Resolution {
    pub fn into_file(self) -> Option<ResolvedFile> {
        match self {
            Resolution::Resolved(file) => Some(file),
            Resolution::NotNeeded => None,
        }
    }
}

/// Read-through cache over the data server for `(filename, version)` pairs.
pub struct CacheEntryResolver {
    entries: EntryStore,
    transport: Arc<dyn Transport>,
    verify_content_digest: bool,
}

impl CacheEntryResolver {
    pub fn new(entries: EntryStore, transport: Arc<dyn Transport>) -> Self {
        Self {
            entries,
            transport,
            verify_content_digest: true,
        }
    }

    pub fn with_content_verification(mut self, enabled: bool) -> Self {
        self.verify_content_digest = enabled;
        self
    }

    pub fn entries(&self) -> &EntryStore {
        &self.entries
    }

    /// Resolve `filename`, trying `versions_to_try` in order.
    ///
    /// `full_chain` is the complete chain of the requested version; it decides
    /// which versions receive a reference once the file is found.
    pub async fn resolve(
        &self,
        filename: &str,
        versions_to_try: &[Version],
        full_chain: &BaseChain,
        options: ResolveOptions,
    ) -> SyncResult<Resolution> {
        let mut candidates = versions_to_try.to_vec();
        let mut cursor = 0;
        let mut followed = HashSet::new();

        while cursor < candidates.len() {
            let version = candidates[cursor].clone();

            // 1. Local record
            let stored = match self.entries.load(filename, &version).await {
                Some(CacheEntry::Reference { base }) => {
                    if base != version && followed.insert(version.clone()) {
                        debug!("{} ({}) is inherited from {}", filename, version, base);
                        candidates = vec![base];
                        cursor = 0;
                        continue;
                    }
                    warn!(
                        "Ignoring looping reference for {} ({} -> {})",
                        filename, version, base
                    );
                    None
                }
                Some(CacheEntry::Content(content)) => {
                    if !options.force_hash_check {
                        debug!("Retrieved {} ({}) from storage", filename, version);
                        return Ok(Resolution::Resolved(ResolvedFile::from_entry(
                            filename, &version, content,
                        )));
                    }
                    Some(content)
                }
                None => None,
            };

            // 2. Server marker
            let Some(remote_hash) = self.remote_digest(filename, &version).await? else {
                cursor += 1;
                continue;
            };

            if let Some(content) = stored.filter(|c| c.hash == remote_hash) {
                self.log_references(filename, &version, full_chain).await;
                debug!("Retrieved {} ({}) from storage, marker unchanged", filename, version);
                return Ok(Resolution::Resolved(ResolvedFile::from_entry(
                    filename, &version, content,
                )));
            }

            // 3. Marker differs or nothing stored: download
            let bytes = self.download(filename, &version, &remote_hash).await?;
            self.log_references(filename, &version, full_chain).await;

            let content = ContentEntry::new(bytes, remote_hash);
            if let Err(e) = self.entries.save_content(filename, &version, &content).await {
                warn!("Could not cache {} ({}): {}", filename, version, e);
            }
            info!("Downloaded {} ({}) from server", filename, version);

            return Ok(Resolution::Resolved(ResolvedFile::from_entry(
                filename, &version, content,
            )));
        }

        if options.required {
            return Err(SyncError::RequiredFileMissing {
                name: filename.to_string(),
                version: full_chain.head().to_string(),
            });
        }

        debug!("{} is not provided by any base of {}", filename, full_chain.head());
        Ok(Resolution::NotNeeded)
    }

    /// Server MD5 for `(filename, version)`. A 404 or a malformed marker is
    /// `None`.
    async fn remote_digest(&self, filename: &str, version: &Version) -> SyncResult<Option<String>> {
        let path = format!("{}.md5", composite_key(filename, version.as_str()));
        let response = self.transport.fetch_text(&path).await?;
        if response.is_not_found() {
            return Ok(None);
        }

        let text = response.into_success()?;
        match parse_digest(&text) {
            Some(hash) => Ok(Some(hash)),
            None => {
                warn!("Malformed marker {}; treating {} as absent", path, filename);
                Ok(None)
            }
        }
    }

    async fn download(&self, filename: &str, version: &Version, expected: &str) -> SyncResult<Vec<u8>> {
        let path = composite_key(filename, version.as_str());
        let response = self.transport.fetch_bytes(&path).await?;
        let url = response.url.clone();
        let bytes = response.into_success()?;

        if self.verify_content_digest {
            let actual = md5_hex(&bytes);
            if actual != expected {
                return Err(SyncError::DigestMismatch {
                    url,
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        Ok(bytes)
    }

    /// Point every chain member that inherits from `version` at it.
    ///
    /// Existing content is never replaced, and neither is a reference that
    /// already names another base. Failures are logged only.
    async fn log_references(&self, filename: &str, version: &Version, full_chain: &BaseChain) {
        for descendant in full_chain.descendants_of(version) {
            match self.entries.load(filename, descendant).await {
                Some(CacheEntry::Content(_)) => {
                    warn!(
                        "Not logging base {} for {} ({}): version already has its own file",
                        version, filename, descendant
                    );
                }
                Some(CacheEntry::Reference { base }) if &base == version => {}
                Some(CacheEntry::Reference { base }) => {
                    debug!(
                        "Keeping existing reference {} -> {} for {}",
                        descendant, base, filename
                    );
                }
                None => {
                    debug!("Logging base {} for {} ({})", version, filename, descendant);
                    let reference = CacheEntry::reference(version.clone());
                    if let Err(e) = self.entries.save(filename, descendant, &reference).await {
                        warn!(
                            "Could not log base {} for {} ({}): {}",
                            version, filename, descendant, e
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::{KeyValueStore, MemoryStore, FILES_PARTITION};
    use crate::core::testing::{FailingStore, MockTransport};

    const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

    struct Fixture {
        transport: Arc<MockTransport>,
        resolver: CacheEntryResolver,
    }

    fn fixture_with_store(store: Arc<dyn KeyValueStore>) -> Fixture {
        let transport = Arc::new(MockTransport::new());
        let resolver = CacheEntryResolver::new(
            EntryStore::new(store, FILES_PARTITION),
            transport.clone(),
        );
        Fixture {
            transport,
            resolver,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_store(Arc::new(MemoryStore::new()))
    }

    fn chain(versions: &[&str]) -> BaseChain {
        BaseChain::new(
            Version::from(versions[0]),
            versions[1..].iter().copied().map(Version::from),
        )
    }

    fn optional() -> ResolveOptions {
        ResolveOptions::default()
    }

    fn forced() -> ResolveOptions {
        ResolveOptions {
            force_hash_check: true,
            required: false,
        }
    }

    fn is_content_fetch(path: &str) -> bool {
        path.starts_with("data/") && !path.ends_with(".md5") && !path.ends_with("_BASE")
    }

    #[tokio::test]
    async fn inherited_file_is_fetched_from_base_and_referenced() {
        let fx = fixture();
        fx.transport.set_base("v2", "v1");
        fx.transport.put("data/v1/readme.txt.md5", EMPTY_MD5);
        fx.transport.put("data/v1/readme.txt", Vec::new());
        let chain = chain(&["v2", "v1"]);

        let resolved = fx
            .resolver
            .resolve("readme.txt", chain.versions(), &chain, forced())
            .await
            .unwrap()
            .into_file()
            .unwrap();

        assert_eq!(resolved.version, Version::from("v1"));
        assert_eq!(resolved.hash, EMPTY_MD5);
        assert!(resolved.bytes.is_empty());
        assert_eq!(
            fx.resolver.entries().load("readme.txt", &Version::from("v2")).await,
            Some(CacheEntry::reference(Version::from("v1")))
        );
    }

    #[tokio::test]
    async fn unchanged_marker_is_a_cache_hit() {
        let fx = fixture();
        fx.transport.publish("v1", "srb2.pk3", b"game data");
        let chain = chain(&["v1"]);

        fx.resolver
            .resolve("srb2.pk3", chain.versions(), &chain, forced())
            .await
            .unwrap();
        let before = fx.transport.request_count();
        let resolved = fx
            .resolver
            .resolve("srb2.pk3", chain.versions(), &chain, forced())
            .await
            .unwrap()
            .into_file()
            .unwrap();

        assert_eq!(resolved.bytes, b"game data");
        assert_eq!(fx.transport.request_count() - before, 1);
        assert_eq!(fx.transport.count("data/v1/srb2.pk3.md5"), 2);
        assert_eq!(fx.transport.count("data/v1/srb2.pk3"), 1);
    }

    #[tokio::test]
    async fn stored_content_without_forced_check_skips_the_network() {
        let fx = fixture();
        fx.transport.publish("v1", "a.txt", b"a");
        let chain = chain(&["v1"]);

        fx.resolver
            .resolve("a.txt", chain.versions(), &chain, optional())
            .await
            .unwrap();
        let before = fx.transport.request_count();
        fx.resolver
            .resolve("a.txt", chain.versions(), &chain, optional())
            .await
            .unwrap();

        assert_eq!(fx.transport.request_count(), before);
    }

    #[tokio::test]
    async fn changed_marker_downloads_and_updates_hash() {
        let fx = fixture();
        fx.transport.publish("v1", "a.txt", b"old");
        let chain = chain(&["v1"]);
        fx.resolver
            .resolve("a.txt", chain.versions(), &chain, forced())
            .await
            .unwrap();

        fx.transport.publish("v1", "a.txt", b"new");
        let resolved = fx
            .resolver
            .resolve("a.txt", chain.versions(), &chain, forced())
            .await
            .unwrap()
            .into_file()
            .unwrap();

        assert_eq!(resolved.bytes, b"new");
        assert_eq!(fx.transport.count("data/v1/a.txt"), 2);
        match fx.resolver.entries().load("a.txt", &Version::from("v1")).await {
            Some(CacheEntry::Content(c)) => assert_eq!(c.hash, md5_hex(b"new")),
            other => panic!("unexpected entry: {:?}", other),
        }
    }

    #[tokio::test]
    async fn reference_logging_never_overwrites_content() {
        let fx = fixture();
        let v2 = Version::from("v2");
        let own = CacheEntry::content(b"v2 only".to_vec(), md5_hex(b"v2 only"));
        fx.resolver
            .entries()
            .save("a.txt", &v2, &own)
            .await
            .unwrap();
        fx.transport.publish("v1", "a.txt", b"base copy");
        let chain = chain(&["v2", "v1"]);

        // Resolve starting at the base so that v2 is a descendant
        fx.resolver
            .resolve("a.txt", &[Version::from("v1")], &chain, forced())
            .await
            .unwrap();

        assert_eq!(fx.resolver.entries().load("a.txt", &v2).await, Some(own));
    }

    #[tokio::test]
    async fn existing_reference_to_another_base_is_kept() {
        let fx = fixture();
        let v3 = Version::from("v3");
        let first = CacheEntry::reference(Version::from("v2"));
        fx.resolver.entries().save("a.txt", &v3, &first).await.unwrap();
        fx.transport.publish("v1", "a.txt", b"a");
        let chain = chain(&["v3", "v2", "v1"]);

        fx.resolver
            .resolve("a.txt", &[Version::from("v1")], &chain, forced())
            .await
            .unwrap();

        assert_eq!(fx.resolver.entries().load("a.txt", &v3).await, Some(first));
        assert_eq!(
            fx.resolver.entries().load("a.txt", &Version::from("v2")).await,
            Some(CacheEntry::reference(Version::from("v1")))
        );
    }

    #[tokio::test]
    async fn stored_reference_is_followed_without_sibling_retry() {
        let fx = fixture();
        fx.transport.publish("v1", "a.txt", b"a");
        let chain = chain(&["v3", "v2", "v1"]);
        fx.resolver
            .resolve("a.txt", chain.versions(), &chain, optional())
            .await
            .unwrap();
        let before = fx.transport.request_count();

        let resolved = fx
            .resolver
            .resolve("a.txt", chain.versions(), &chain, optional())
            .await
            .unwrap()
            .into_file()
            .unwrap();

        assert_eq!(resolved.version, Version::from("v1"));
        assert_eq!(fx.transport.request_count(), before);
    }

    #[tokio::test]
    async fn missing_required_file_is_an_error() {
        let fx = fixture();
        let chain = chain(&["v2", "v1"]);
        let options = ResolveOptions {
            force_hash_check: false,
            required: true,
        };

        let err = fx
            .resolver
            .resolve("srb2.pk3", chain.versions(), &chain, options)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::RequiredFileMissing { .. }));
        assert_eq!(fx.transport.count("data/v2/srb2.pk3.md5"), 1);
        assert_eq!(fx.transport.count("data/v1/srb2.pk3.md5"), 1);
    }

    #[tokio::test]
    async fn missing_optional_file_is_not_needed() {
        let fx = fixture();
        let chain = chain(&["v2", "v1"]);

        let resolution = fx
            .resolver
            .resolve("music.dta", chain.versions(), &chain, optional())
            .await
            .unwrap();

        assert_eq!(resolution, Resolution::NotNeeded);
        assert_eq!(fx.transport.count_matching(is_content_fetch), 0);
    }

    #[tokio::test]
    async fn malformed_marker_falls_back_like_a_missing_one() {
        let fx = fixture();
        fx.transport.put("data/v2/a.txt.md5", "<html>oops</html>");
        fx.transport.put("data/v2/a.txt", b"never fetched".to_vec());
        fx.transport.publish("v1", "a.txt", b"from base");
        let chain = chain(&["v2", "v1"]);

        let resolved = fx
            .resolver
            .resolve("a.txt", chain.versions(), &chain, forced())
            .await
            .unwrap()
            .into_file()
            .unwrap();

        assert_eq!(resolved.bytes, b"from base");
        assert_eq!(fx.transport.count("data/v2/a.txt"), 0);
    }

    #[tokio::test]
    async fn server_error_on_marker_propagates() {
        let fx = fixture();
        fx.transport.set_status("data/v1/a.txt.md5", 502);
        let chain = chain(&["v1"]);

        let err = fx
            .resolver
            .resolve("a.txt", chain.versions(), &chain, optional())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Transport { status: 502, .. }));
    }

    #[tokio::test]
    async fn corrupted_download_is_rejected() {
        let fx = fixture();
        fx.transport.put("data/v1/a.txt.md5", EMPTY_MD5);
        fx.transport.put("data/v1/a.txt", b"not empty".to_vec());
        let chain = chain(&["v1"]);

        let err = fx
            .resolver
            .resolve("a.txt", chain.versions(), &chain, optional())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::DigestMismatch { .. }));
        assert_eq!(
            fx.resolver.entries().load("a.txt", &Version::from("v1")).await,
            None
        );
    }

    #[tokio::test]
    async fn failed_reference_write_is_swallowed() {
        let store = Arc::new(FailingStore::new());
        store.fail_writes_to("data/v2/a.txt");
        let fx = fixture_with_store(store);
        fx.transport.publish("v1", "a.txt", b"a");
        let chain = chain(&["v2", "v1"]);

        let resolved = fx
            .resolver
            .resolve("a.txt", chain.versions(), &chain, optional())
            .await
            .unwrap()
            .into_file()
            .unwrap();

        assert_eq!(resolved.version, Version::from("v1"));
        assert_eq!(
            fx.resolver.entries().load("a.txt", &Version::from("v2")).await,
            None
        );
    }
}
