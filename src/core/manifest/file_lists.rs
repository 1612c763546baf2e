use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Reserved manifests published next to the data files of every version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManifestKind {
    /// Files downloaded on first run.
    Install,
    /// Files kept in the filesystem when lumps are unloaded.
    Persistent,
    /// Files placed in the filesystem on game startup.
    Startup,
    /// Files whose absence aborts startup.
    Required,
}

impl ManifestKind {
    pub const ALL: [ManifestKind; 4] = [
        ManifestKind::Install,
        ManifestKind::Persistent,
        ManifestKind::Startup,
        ManifestKind::Required,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            ManifestKind::Install => "_INSTALL",
            ManifestKind::Persistent => "_PERSISTENT",
            ManifestKind::Startup => "_STARTUP",
            ManifestKind::Required => "_REQUIRED",
        }
    }
}

/// File-name lists driving installation and startup.
///
/// `startup` also contains every persistent file once loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLists {
    pub install: Vec<String>,
    pub persistent: Vec<String>,
    pub startup: Vec<String>,
    pub required: Vec<String>,
}

impl FileLists {
    pub fn list(&self, kind: ManifestKind) -> &[String] {
        match kind {
            ManifestKind::Install => &self.install,
            ManifestKind::Persistent => &self.persistent,
            ManifestKind::Startup => &self.startup,
            ManifestKind::Required => &self.required,
        }
    }

    pub fn list_mut(&mut self, kind: ManifestKind) -> &mut Vec<String> {
        match kind {
            ManifestKind::Install => &mut self.install,
            ManifestKind::Persistent => &mut self.persistent,
            ManifestKind::Startup => &mut self.startup,
            ManifestKind::Required => &mut self.required,
        }
    }

    pub fn required_set(&self) -> HashSet<String> {
        self.required.iter().cloned().collect()
    }

    pub fn is_persistent(&self, name: &str) -> bool {
        self.persistent.iter().any(|p| p == name)
    }

    /// Append persistent files missing from the startup list.
    pub fn merge_persistent_into_startup(&mut self) {
        for name in &self.persistent {
            if !self.startup.contains(name) {
                self.startup.push(name.clone());
            }
        }
    }
}

/// Parse a manifest body: one file name per line, blank lines and `//`
/// comments ignored.
pub fn parse_manifest(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("//"))
        .map(str::to_string)
        .collect()
}
