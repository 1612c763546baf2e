use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the sync core.
/// Every module returns `Result<T, SyncError>`.
#[derive(Debug, Error)]
pub enum SyncError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request failed for {url}: HTTP {status}")]
    Transport { url: String, status: u16 },

    // ── Integrity ───────────────────────────────────────
    #[error("MD5 mismatch for {url}: expected {expected}, got {actual}")]
    DigestMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    // ── Resolution ──────────────────────────────────────
    #[error("Required file {name} is missing from every base of version {version}")]
    RequiredFileMissing { name: String, version: String },

    // ── Storage ─────────────────────────────────────────
    #[error("Storage error in {partition}/{key}: {message}")]
    Storage {
        partition: String,
        key: String,
        message: String,
    },

    #[error("Corrupt cache record {key}: {message}")]
    CorruptRecord { key: String, message: String },

    // ── Virtual filesystem ──────────────────────────────
    #[error("Filesystem error at {path}: {message}")]
    Filesystem { path: String, message: String },

    #[error("No such file or directory: {0}")]
    NotFound(String),

    // ── JSON ────────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Archive ─────────────────────────────────────────
    #[error("Zip extraction error: {0}")]
    Zip(#[from] zip::result::ZipError),

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// Errors on the startup path that warrant a retry/reset prompt rather
    /// than silently omitting a file.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SyncError::RequiredFileMissing { .. }
                | SyncError::Transport { .. }
                | SyncError::Http(_)
                | SyncError::DigestMismatch { .. }
        )
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn storage(partition: &str, key: &str, message: impl Into<String>) -> Self {
        SyncError::Storage {
            partition: partition.to_string(),
            key: key.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn filesystem(path: &str, message: impl Into<String>) -> Self {
        SyncError::Filesystem {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(source: std::io::Error) -> Self {
        SyncError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}
