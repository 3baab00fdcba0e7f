//! Loads a [`MemCatalog`] from a JSON snapshot file, the same way this
//! tool's CLI rehydrates other on-disk state at startup: a flat JSON
//! file read once with `serde_json` rather than a long-lived store. A
//! real deployment's catalog lives in a relational store (out of scope
//! here); this snapshot format is the restore CLI's on-disk stand-in
//! for that store, and the shape a `coldvault` backup job would dump
//! its catalog rows into.

use std::path::Path;

use serde::{Deserialize, Serialize};

use common::{Block, Blockset, BlocksetEntry, CatalogFile, FileMetadata, Fileset, RemoteVolume};

use crate::error::CatalogError;
use crate::memory::MemCatalog;

/// On-disk catalog snapshot: one row list per table named in spec.md §6,
/// restricted to the tables the restore path actually reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub volumes: Vec<RemoteVolume>,
    pub blocks: Vec<Block>,
    /// `(blockset, its ordered entries)` pairs, mirroring the
    /// `Blockset ⋈ BlocksetEntry` join the block source streams.
    pub blocksets: Vec<(Blockset, Vec<BlocksetEntry>)>,
    pub files: Vec<CatalogFile>,
    /// `(metadata_id, metadata)` pairs; `CatalogFile::metadata_id` points
    /// into this table the way it points into `blocksets` via
    /// `blockset_id`.
    pub file_metadata: Vec<(u64, FileMetadata)>,
    /// `(fileset, member file ids)` pairs.
    pub filesets: Vec<(Fileset, Vec<u64>)>,
}

impl CatalogSnapshot {
    pub fn into_catalog(self) -> MemCatalog {
        let mut builder = MemCatalog::builder();
        for volume in self.volumes {
            builder = builder.add_volume(volume);
        }
        for block in self.blocks {
            builder = builder.add_block(block);
        }
        for (blockset, entries) in self.blocksets {
            builder = builder.add_blockset(blockset, entries);
        }
        for file in self.files {
            builder = builder.add_file(file);
        }
        for (metadata_id, metadata) in self.file_metadata {
            builder = builder.add_file_metadata(metadata_id, metadata);
        }
        for (fileset, file_ids) in self.filesets {
            builder = builder.add_fileset(fileset, file_ids);
        }
        builder.build()
    }

    /// Reads and parses a snapshot file from disk in one shot.
    pub fn load(path: impl AsRef<Path>) -> Result<MemCatalog, CatalogError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CatalogError::Corrupt(format!("reading catalog snapshot {}: {e}", path.display()))
        })?;
        let snapshot: CatalogSnapshot = serde_json::from_str(&text).map_err(|e| {
            CatalogError::Corrupt(format!("parsing catalog snapshot {}: {e}", path.display()))
        })?;
        Ok(snapshot.into_catalog())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ContentHash, VolumeKind, VolumeState};

    fn sample_snapshot() -> CatalogSnapshot {
        let volume = RemoteVolume {
            id: 1,
            name: "bk-b-00000000-0000-0000-0000-000000000001-2026-01-01T00:00:00Z.none".into(),
            size: 128,
            content_hash: ContentHash::of(b"volume bytes"),
            kind: VolumeKind::Blocks,
            state: VolumeState::Verified,
            verification_count: 0,
        };
        let block = Block { id: 1, hash: ContentHash::of(b"block"), size: 5, volume_id: 1 };
        let blockset = Blockset { id: 1, length: 5, fullhash: ContentHash::of(b"block") };
        let entry = BlocksetEntry { blockset_id: 1, index: 0, block_id: 1 };
        let file = CatalogFile {
            id: 1,
            path: "hello.txt".into(),
            blockset_id: 1,
            metadata_id: 1,
            hardlink_target_id: None,
        };
        let fileset = Fileset { id: 1, timestamp: 1_700_000_000, volume_id: 1 };

        CatalogSnapshot {
            volumes: vec![volume],
            blocks: vec![block],
            blocksets: vec![(blockset, vec![entry])],
            files: vec![file],
            file_metadata: vec![(1, FileMetadata::default())],
            filesets: vec![(fileset, vec![1])],
        }
    }

    #[test]
    fn test_roundtrip_through_json() {
        let snapshot = sample_snapshot();
        let json = serde_json::to_string_pretty(&snapshot).unwrap();
        let parsed: CatalogSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.files.len(), 1);
        assert_eq!(parsed.volumes[0].id, 1);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, serde_json::to_vec(&sample_snapshot()).unwrap()).unwrap();

        let catalog = CatalogSnapshot::load(&path).unwrap();
        assert!(crate::Catalog::get_volume(&catalog, 1).await.is_ok());
    }

    #[test]
    fn test_load_missing_file_is_corrupt_error() {
        let err = CatalogSnapshot::load("/nonexistent/catalog.json").unwrap_err();
        assert!(matches!(err, CatalogError::Corrupt(_)));
    }

    #[test]
    fn test_load_malformed_json_is_corrupt_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, b"not json").unwrap();
        let err = CatalogSnapshot::load(&path).unwrap_err();
        assert!(matches!(err, CatalogError::Corrupt(_)));
    }
}
