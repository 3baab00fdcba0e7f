use serde::{Deserialize, Serialize};

/// A BLAKE3 content hash, used throughout the catalog and restore pipeline
/// as the identity of blocks, blocksets, volumes and whole files.
///
/// This codebase hashes everything with BLAKE3 rather than SHA-256; see
/// DESIGN.md for the rationale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(#[serde(with = "hex_bytes")] pub [u8; 32]);

impl ContentHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(d)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32-byte hash"))
    }
}

/// Canonical `RemoteVolume.state` spellings. Only `Verified` and
/// `Uploaded` volumes are eligible restore sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeState {
    Temporary,
    Uploading,
    Uploaded,
    Verified,
    Deleting,
    Deleted,
}

impl VolumeState {
    /// Whether a volume in this state may be used to satisfy a restore.
    pub fn is_restorable(&self) -> bool {
        matches!(self, VolumeState::Verified | VolumeState::Uploaded)
    }
}

/// `RemoteVolume.kind` — the middle letter of the volume filename grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeKind {
    Blocks,
    Index,
    Files,
}

impl VolumeKind {
    pub fn filename_letter(&self) -> char {
        match self {
            VolumeKind::Blocks => 'b',
            VolumeKind::Index => 'i',
            VolumeKind::Files => 'f',
        }
    }
}

/// A remote archive containing many blocks; the unit of fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteVolume {
    pub id: u64,
    pub name: String,
    pub size: u64,
    pub content_hash: ContentHash,
    pub kind: VolumeKind,
    pub state: VolumeState,
    /// Present on the catalog row for parity with the source schema; not
    /// consulted anywhere on the restore path.
    pub verification_count: u32,
}

/// A single content-addressed chunk, as recorded in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: u64,
    pub hash: ContentHash,
    pub size: u32,
    pub volume_id: u64,
}

/// Ordered list of blocks reconstituting a file's content or metadata blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blockset {
    pub id: u64,
    pub length: u64,
    pub fullhash: ContentHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocksetEntry {
    pub blockset_id: u64,
    pub index: u32,
    pub block_id: u64,
}

/// A file as recorded in a fileset: path plus pointers to its content and
/// metadata blocksets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogFile {
    pub id: u64,
    pub path: String,
    pub blockset_id: u64,
    pub metadata_id: u64,
    /// Stable identifier shared by files that should be restored as
    /// hardlinks to a single inode.
    pub hardlink_target_id: Option<u64>,
}

/// A point-in-time snapshot: the set of files and their blocksets at a
/// timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fileset {
    pub id: u64,
    pub timestamp: i64,
    pub volume_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesetEntry {
    pub fileset_id: u64,
    pub file_id: u64,
}

/// Metadata blob (mtime, permissions, xattrs, symlink target) addressed by
/// its own blockset, the way file content is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadataset {
    pub id: u64,
    pub blockset_id: u64,
}

/// One planned block fetch, created by the block source and consumed by
/// the volume manager. `evict_hint` is set on the last planned request for
/// a given volume so the manager can release it promptly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRequest {
    pub volume_id: u64,
    pub block_id: u64,
    pub block_hash: ContentHash,
    pub block_size: u32,
    pub file_id: u64,
    pub file_offset: u64,
    pub evict_hint: bool,
}

/// Decoded file metadata (mtime/permissions/symlink target) ready to apply
/// once a file's content has been fully written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub mtime_unix_secs: Option<i64>,
    pub unix_mode: Option<u32>,
    pub symlink_target: Option<String>,
    pub xattrs: Vec<(String, Vec<u8>)>,
}

/// Announces a new file about to be restored, sent by the Block Source to
/// the File Assembler before the first `BlockRequest` of that file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePlan {
    pub file_id: u64,
    pub target_path: String,
    pub expected_length: u64,
    pub expected_hash: ContentHash,
    pub hardlink_target_id: Option<u64>,
    pub metadata: FileMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_roundtrip() {
        let hash = ContentHash::of(b"hello coldvault");
        let json = serde_json::to_string(&hash).unwrap();
        let back: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, back);
    }

    #[test]
    fn test_content_hash_display_is_hex() {
        let hash = ContentHash::from_bytes([0xab; 32]);
        assert_eq!(hash.to_string(), "ab".repeat(32));
    }

    #[test]
    fn test_volume_state_restorable() {
        assert!(VolumeState::Verified.is_restorable());
        assert!(VolumeState::Uploaded.is_restorable());
        assert!(!VolumeState::Temporary.is_restorable());
        assert!(!VolumeState::Deleted.is_restorable());
    }

    #[test]
    fn test_volume_kind_filename_letter() {
        assert_eq!(VolumeKind::Blocks.filename_letter(), 'b');
        assert_eq!(VolumeKind::Index.filename_letter(), 'i');
        assert_eq!(VolumeKind::Files.filename_letter(), 'f');
    }
}
