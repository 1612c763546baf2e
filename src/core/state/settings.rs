use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::downloader::DEFAULT_CONCURRENCY;
use crate::core::error::{SyncError, SyncResult};
use crate::core::manifest::ManifestKind;
use crate::core::storage::{
    FILES_PARTITION, PRELOAD_METADATA_PARTITION, PRELOAD_PACKAGES_PARTITION,
};

const APP_DIR_NAME: &str = "asset-sync";
const SETTINGS_FILE: &str = "sync_settings.json";

/// Layout linking the addons directory into the persistent user partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentMount {
    pub addons_dir: String,
    pub user_dir: String,
    /// Names under `addons_dir` that become symlinks to `user_dir`.
    pub links: Vec<String>,
}

impl Default for PersistentMount {
    fn default() -> Self {
        Self {
            addons_dir: "/addons".into(),
            user_dir: "/home/web_user/.srb2".into(),
            links: vec![".srb2".into(), "userdata".into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Root URL the `data/` tree is served from.
    pub server_url: String,
    pub default_version: Option<String>,
    /// Resolves in flight per batch.
    pub concurrency: usize,
    pub verify_content_digest: bool,
    pub request_timeout_secs: Option<u64>,
    /// Manifests whose absence fails `load_file_lists`.
    pub required_manifests: Vec<String>,
    /// Partitions wiped by `reset_program_data`.
    pub reset_partitions: Vec<String>,
    /// Filesystem directory program files are written to.
    pub data_root: String,
    pub persistent_mount: PersistentMount,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".into(),
            default_version: None,
            concurrency: DEFAULT_CONCURRENCY,
            verify_content_digest: true,
            request_timeout_secs: Some(60),
            required_manifests: vec![ManifestKind::Install.file_name().to_string()],
            reset_partitions: vec![
                FILES_PARTITION.into(),
                PRELOAD_METADATA_PARTITION.into(),
                PRELOAD_PACKAGES_PARTITION.into(),
            ],
            data_root: "/".into(),
            persistent_mount: PersistentMount::default(),
        }
    }
}

impl SyncSettings {
    /// Settings from `data_dir`, or defaults when absent or unreadable.
    pub fn load(data_dir: &Path) -> Self {
        load_settings_from_disk(data_dir).unwrap_or_default()
    }

    pub fn save(&self, data_dir: &Path) -> SyncResult<()> {
        std::fs::create_dir_all(data_dir).map_err(|source| SyncError::Io {
            path: data_dir.to_path_buf(),
            source,
        })?;
        let path = data_dir.join(SETTINGS_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).map_err(|source| SyncError::Io { path, source })
    }
}

fn load_settings_from_disk(data_dir: &Path) -> Option<SyncSettings> {
    let path = data_dir.join(SETTINGS_FILE);
    let raw = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(settings) => Some(settings),
        Err(e) => {
            warn!("Ignoring malformed {:?}: {}", path, e);
            None
        }
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings_fill_in_defaults() {
        let settings: SyncSettings =
            serde_json::from_str(r#"{ "server_url": "https://cdn.example.com", "concurrency": 6 }"#)
                .unwrap();
        assert_eq!(settings.server_url, "https://cdn.example.com");
        assert_eq!(settings.concurrency, 6);
        assert!(settings.verify_content_digest);
        assert_eq!(settings.required_manifests, vec!["_INSTALL"]);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SyncSettings {
            default_version: Some("2.2.13".into()),
            ..SyncSettings::default()
        };
        settings.save(dir.path()).unwrap();
        assert_eq!(SyncSettings::load(dir.path()), settings);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "{ nope").unwrap();
        assert_eq!(SyncSettings::load(dir.path()), SyncSettings::default());
    }
}
