use thiserror::Error;

use crate::types::ContentHash;

/// Restore error taxonomy. Each variant carries the policy implied by
/// its doc comment; callers match on these to decide per-file vs. global
/// fatality, the way `EncryptionError`/`CompressionError` are matched
/// elsewhere in this workspace.
#[derive(Error, Debug)]
pub enum RestoreError {
    /// Inconsistent catalog rows (e.g. a block with no owning volume).
    /// Fatal: abort the whole restore.
    #[error("catalog corrupt: {0}")]
    CatalogCorrupt(String),

    /// Download or decrypt failed after retries. Per-file fatal, global
    /// non-fatal unless `--strict`.
    #[error("volume {volume_id} unavailable: {reason}")]
    VolumeUnavailable { volume_id: u64, reason: String },

    /// Volume content hash or block hash mismatch. Same policy as
    /// `VolumeUnavailable`.
    #[error("integrity error on volume {volume_id}: {reason}")]
    IntegrityError { volume_id: u64, reason: String },

    /// Catalog row for a requested block hash does not exist.
    #[error("missing block {0}")]
    MissingBlock(ContentHash),

    /// Local filesystem write failed. Per-file fatal.
    #[error("write error for file {file_id}: {source}")]
    WriteError {
        file_id: u64,
        #[source]
        source: std::io::Error,
    },

    /// Assembled file hash did not match the catalog's expected hash.
    /// Per-file fatal.
    #[error("hash mismatch for file {file_id}: expected {expected}, got {actual}")]
    HashMismatch {
        file_id: u64,
        expected: ContentHash,
        actual: ContentHash,
    },

    /// Could not set mtime/permissions/xattrs. Warning only, never fatal.
    #[error("metadata warning for file {file_id}: {reason}")]
    MetadataWarning { file_id: u64, reason: String },

    /// User-requested cancellation. Clean shutdown, not a failure.
    #[error("restore cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RestoreError {
    /// Whether this error should abort the file it occurred on but allow
    /// the overall restore to continue (unless running in `--strict`).
    pub fn is_per_file_fatal(&self) -> bool {
        matches!(
            self,
            RestoreError::VolumeUnavailable { .. }
                | RestoreError::IntegrityError { .. }
                | RestoreError::MissingBlock(_)
                | RestoreError::WriteError { .. }
                | RestoreError::HashMismatch { .. }
        )
    }

    /// Whether this error aborts the entire restore regardless of
    /// `--strict`.
    pub fn is_globally_fatal(&self) -> bool {
        matches!(self, RestoreError::CatalogCorrupt(_))
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, RestoreError::MetadataWarning { .. })
    }
}

pub type RestoreResult<T> = std::result::Result<T, RestoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_file_vs_global_fatality() {
        let e = RestoreError::VolumeUnavailable {
            volume_id: 1,
            reason: "timeout".into(),
        };
        assert!(e.is_per_file_fatal());
        assert!(!e.is_globally_fatal());

        let e = RestoreError::CatalogCorrupt("dangling block".into());
        assert!(e.is_globally_fatal());
        assert!(!e.is_per_file_fatal());

        let e = RestoreError::MetadataWarning {
            file_id: 7,
            reason: "chmod denied".into(),
        };
        assert!(e.is_warning());
    }

    #[test]
    fn test_display() {
        let e = RestoreError::HashMismatch {
            file_id: 3,
            expected: ContentHash::from_bytes([1; 32]),
            actual: ContentHash::from_bytes([2; 32]),
        };
        assert!(e.to_string().contains("hash mismatch"));
    }
}
