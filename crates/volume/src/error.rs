use thiserror::Error;

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a coldvault volume container (bad magic)")]
    BadMagic,

    #[error("unsupported container format version {0}")]
    UnsupportedVersion(u16),

    #[error("truncated or corrupt container: {0}")]
    Truncated(String),

    #[error("manifest entry missing or undecodable: {0}")]
    BadManifest(#[from] serde_json::Error),

    #[error("no entry named {0:?} in this container")]
    EntryNotFound(String),

    #[error("container index root hash mismatch: footer is truncated or reordered")]
    IndexHashMismatch,

    #[error("entry {name:?} is {actual} bytes, expected {expected}")]
    LengthMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("does not match the volume filename grammar: {0:?}")]
    BadFilename(String),
}
