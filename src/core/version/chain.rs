// ─── Version Chain ───
// Resolves the `_BASE` inheritance chain of a data release.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::downloader::Transport;
use crate::core::error::SyncResult;
use crate::core::storage::{composite_key, KeyValueStore};

/// Reserved file name of the parent-version marker.
pub const BASE_MARKER: &str = "_BASE";

/// Opaque identifier of a data release.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for Version {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A version followed by its ancestors, nearest first. Never contains
/// duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseChain(Vec<Version>);

impl BaseChain {
    /// Build a chain from `head` and its ancestors, dropping repeats.
    pub fn new(head: Version, ancestors: impl IntoIterator<Item = Version>) -> Self {
        let mut versions = vec![head];
        for version in ancestors {
            if !versions.contains(&version) {
                versions.push(version);
            }
        }
        Self(versions)
    }

    pub fn single(version: Version) -> Self {
        Self(vec![version])
    }

    pub fn head(&self) -> &Version {
        &self.0[0]
    }

    pub fn versions(&self) -> &[Version] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn position(&self, version: &Version) -> Option<usize> {
        self.0.iter().position(|v| v == version)
    }

    /// Chain members that inherit from `version` (those before it).
    /// Empty when `version` is not part of the chain.
    pub fn descendants_of(&self, version: &Version) -> &[Version] {
        match self.position(version) {
            Some(idx) => &self.0[..idx],
            None => &[],
        }
    }
}

impl From<BaseChain> for Vec<Version> {
    fn from(chain: BaseChain) -> Self {
        chain.0
    }
}

/// Session-scoped memo of resolved chains.
#[derive(Default)]
pub struct ChainCache {
    chains: Mutex<HashMap<Version, BaseChain>>,
}

impl ChainCache {
    pub fn get(&self, version: &Version) -> Option<BaseChain> {
        self.chains
            .lock()
            .ok()
            .and_then(|chains| chains.get(version).cloned())
    }

    pub fn insert(&self, chain: BaseChain) {
        if let Ok(mut chains) = self.chains.lock() {
            chains.insert(chain.head().clone(), chain);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut chains) = self.chains.lock() {
            chains.clear();
        }
    }
}

/// Where a parent marker was read from.
enum MarkerLookup {
    /// Persisted marker; `None` means "explicitly no parent".
    Local(Option<Version>),
    /// Server marker; `None` means the server returned an empty marker.
    Remote(Option<Version>),
    /// Server has no marker (404). Nothing is persisted.
    Missing,
}

/// Resolves and memoizes base chains.
pub struct VersionChainResolver {
    store: Arc<dyn KeyValueStore>,
    transport: Arc<dyn Transport>,
    partition: String,
    cache: ChainCache,
}

impl VersionChainResolver {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn Transport>,
        partition: impl Into<String>,
    ) -> Self {
        Self {
            store,
            transport,
            partition: partition.into(),
            cache: ChainCache::default(),
        }
    }

    pub fn cache(&self) -> &ChainCache {
        &self.cache
    }

    /// Resolve the chain for `version`.
    ///
    /// A 404 on a marker ends the chain. Any other transport failure is
    /// returned and nothing is memoized.
    pub async fn resolve_chain(&self, version: &Version) -> SyncResult<BaseChain> {
        if let Some(chain) = self.cache.get(version) {
            return Ok(chain);
        }

        let mut chain = vec![version.clone()];
        let mut current = version.clone();

        loop {
            let (parent, from_server) = match self.lookup_parent(&current).await? {
                MarkerLookup::Local(parent) => (parent, false),
                MarkerLookup::Remote(parent) => (parent, true),
                MarkerLookup::Missing => break,
            };

            let Some(parent) = parent else {
                if from_server {
                    self.persist_marker(&current, "").await;
                }
                break;
            };

            if chain.contains(&parent) {
                warn!(
                    "Base chain of {} loops back to {} at {}; stopping",
                    version, parent, current
                );
                if from_server {
                    self.persist_marker(&current, "").await;
                }
                break;
            }

            if from_server {
                info!("Logging base {} for version {}", parent, current);
                self.persist_marker(&current, parent.as_str()).await;
            }
            chain.push(parent.clone());
            current = parent;
        }

        debug!("Base chain for {}: {:?}", version, chain);
        let chain = BaseChain(chain);
        self.cache.insert(chain.clone());
        Ok(chain)
    }

    async fn lookup_parent(&self, version: &Version) -> SyncResult<MarkerLookup> {
        let key = composite_key(BASE_MARKER, version.as_str());

        match self.store.get(&self.partition, &key).await {
            Ok(Some(raw)) => {
                let text = String::from_utf8_lossy(&raw);
                return Ok(MarkerLookup::Local(parse_parent(&text)));
            }
            Ok(None) => {}
            Err(e) => warn!("Could not read {} from storage: {}", key, e),
        }

        let response = self.transport.fetch_text(&key).await?;
        if response.is_not_found() {
            debug!("No {} on server; treating {} as a root", BASE_MARKER, version);
            return Ok(MarkerLookup::Missing);
        }
        let text = response.into_success()?;
        Ok(MarkerLookup::Remote(parse_parent(&text)))
    }

    async fn persist_marker(&self, version: &Version, parent: &str) {
        let key = composite_key(BASE_MARKER, version.as_str());
        if let Err(e) = self
            .store
            .set(&self.partition, &key, parent.as_bytes().to_vec())
            .await
        {
            warn!("Could not persist {}: {}", key, e);
        }
    }
}

fn parse_parent(text: &str) -> Option<Version> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(Version::from(trimmed))
    }
}
