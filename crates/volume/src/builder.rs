use std::fs::File;
use std::io::Write;
use std::path::Path;

use common::ContentHash;

use crate::container::{ContainerIndex, IndexRecord, FORMAT_VERSION, MAGIC, TRAILER_MAGIC};
use crate::error::VolumeError;
use crate::manifest::VolumeManifest;

/// Writes a volume container: header, raw entry bytes back to back, the
/// `manifest` entry, then a JSON footer and fixed trailer. Used by write-path
/// fixtures and by restore's test doubles to synthesize containers; the
/// restore data plane itself only ever reads containers via [`crate::VolumeReader`].
pub struct VolumeBuilder {
    blocksize: u32,
    entries: Vec<(String, Vec<u8>)>,
}

impl VolumeBuilder {
    pub fn new(blocksize: u32) -> Self {
        Self {
            blocksize,
            entries: Vec::new(),
        }
    }

    /// Add a block keyed by the BLAKE3 hash of its plaintext, storing
    /// `stored_bytes` (e.g. compressed bytes) as the entry payload.
    pub fn add_block_with_stored_bytes(
        &mut self,
        plaintext_hash: ContentHash,
        stored_bytes: Vec<u8>,
    ) -> ContentHash {
        self.entries.push((plaintext_hash.to_hex(), stored_bytes));
        plaintext_hash
    }

    /// Add a block, storing the plaintext itself (no compression applied).
    pub fn add_block(&mut self, plaintext: &[u8]) -> ContentHash {
        let hash = ContentHash::of(plaintext);
        self.add_block_with_stored_bytes(hash, plaintext.to_vec())
    }

    pub fn finish(self, path: impl AsRef<Path>) -> Result<(), VolumeError> {
        let mut file = File::create(path)?;
        file.write_all(MAGIC)?;
        file.write_all(&FORMAT_VERSION.to_le_bytes())?;

        let mut index = ContainerIndex::default();
        let mut offset = (MAGIC.len() + 2) as u64;

        for (name, bytes) in &self.entries {
            file.write_all(bytes)?;
            index.records.push(IndexRecord {
                name: name.clone(),
                offset,
                len: bytes.len() as u64,
            });
            offset += bytes.len() as u64;
        }

        let manifest_bytes = VolumeManifest::new(self.blocksize).to_bytes();
        file.write_all(&manifest_bytes)?;
        index.records.push(IndexRecord {
            name: VolumeManifest::ENTRY_NAME.to_string(),
            offset,
            len: manifest_bytes.len() as u64,
        });
        offset += manifest_bytes.len() as u64;

        index.compute_root_hash();
        let footer_offset = offset;
        let footer_bytes =
            serde_json::to_vec(&index).map_err(|e| VolumeError::Truncated(e.to_string()))?;
        file.write_all(&footer_bytes)?;

        file.write_all(&footer_offset.to_le_bytes())?;
        file.write_all(TRAILER_MAGIC)?;
        file.flush()?;
        Ok(())
    }
}
