use serde::{Deserialize, Serialize};

/// Decoded payload of the container's special `manifest` entry. `blockhash`
/// and `filehash` name the hash algorithm blocks and whole-file hashes were
/// computed with (e.g. `"blake3"`), not a hash value; a reader checks these
/// against its own configured algorithm before trusting any block entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeManifest {
    pub blocksize: u32,
    pub blockhash: String,
    pub filehash: String,
}

impl VolumeManifest {
    pub const ENTRY_NAME: &'static str = "manifest";

    /// The only hash algorithm this codebase writes or restores.
    pub const HASH_ALGORITHM: &'static str = "blake3";

    pub fn new(blocksize: u32) -> Self {
        Self {
            blocksize,
            blockhash: Self::HASH_ALGORITHM.to_string(),
            filehash: Self::HASH_ALGORITHM.to_string(),
        }
    }

    /// Whether a reader configured for `expected_blocksize` can safely read
    /// blocks out of this container.
    pub fn is_compatible(&self, expected_blocksize: u32) -> bool {
        self.blocksize == expected_blocksize
            && self.blockhash == Self::HASH_ALGORITHM
            && self.filehash == Self::HASH_ALGORITHM
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("VolumeManifest serializes")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
