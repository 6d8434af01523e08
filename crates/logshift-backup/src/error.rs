//! Error types for the backup store

use std::path::PathBuf;

/// Errors raised by backup, write and restore operations
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Filesystem failure
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Manifest could not be encoded or decoded
    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    /// The file changed between backup and write
    #[error("stale receipt for {path}: backed up {expected}, found {actual}")]
    StaleReceipt {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// A backup no longer matches the digest recorded when it was taken
    #[error("backup for {original} is corrupt ({backup})")]
    Corrupt { original: PathBuf, backup: PathBuf },

    /// No manifest found in a run directory
    #[error("no backup manifest in {0}")]
    NoManifest(PathBuf),
}

impl BackupError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for backup operations
pub type BackupResult<T> = Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_names_path() {
        let err = BackupError::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("/tmp/x"));
    }
}
