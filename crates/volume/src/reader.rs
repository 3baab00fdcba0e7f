use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use tracing::instrument;

use common::ContentHash;

use crate::container::{ContainerIndex, IndexRecord, MAGIC, TRAILER_LEN, TRAILER_MAGIC};
use crate::error::VolumeError;
use crate::manifest::VolumeManifest;

/// Random-access view over a plaintext volume container: the entity a
/// cache entry hands to the block decompressor once a volume is ready.
///
/// Opening parses the footer once and keeps the file handle open behind a
/// mutex so concurrent decompress workers can read different entries of the
/// same volume without re-opening the file; the container format only
/// supports one in-flight positioned read at a time per handle.
pub struct VolumeReader {
    file: Mutex<File>,
    index: ContainerIndex,
    manifest: VolumeManifest,
}

impl VolumeReader {
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VolumeError> {
        let mut file = File::open(path)?;
        let file_len = file.seek(SeekFrom::End(0))?;

        let mut header = [0u8; 6];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;
        if &header[0..4] != MAGIC {
            return Err(VolumeError::BadMagic);
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != crate::container::FORMAT_VERSION {
            return Err(VolumeError::UnsupportedVersion(version));
        }

        if file_len < TRAILER_LEN {
            return Err(VolumeError::Truncated("file shorter than trailer".into()));
        }
        file.seek(SeekFrom::Start(file_len - TRAILER_LEN))?;
        let mut trailer = [0u8; TRAILER_LEN as usize];
        file.read_exact(&mut trailer)?;
        let footer_offset = u64::from_le_bytes(trailer[0..8].try_into().unwrap());
        if &trailer[8..16] != TRAILER_MAGIC {
            return Err(VolumeError::Truncated("missing trailer magic".into()));
        }

        let footer_len = file_len - TRAILER_LEN - footer_offset;
        file.seek(SeekFrom::Start(footer_offset))?;
        let mut footer_bytes = vec![0u8; footer_len as usize];
        file.read_exact(&mut footer_bytes)?;
        let index: ContainerIndex = serde_json::from_slice(&footer_bytes)?;
        if !index.verify_root_hash() {
            return Err(VolumeError::IndexHashMismatch);
        }

        let manifest_record = index
            .find(VolumeManifest::ENTRY_NAME)
            .ok_or_else(|| VolumeError::EntryNotFound(VolumeManifest::ENTRY_NAME.into()))?
            .clone();
        let manifest_bytes = read_entry_bytes(&mut file, &manifest_record)?;
        let manifest = VolumeManifest::from_bytes(&manifest_bytes)?;

        Ok(Self {
            file: Mutex::new(file),
            index,
            manifest,
        })
    }

    pub fn manifest(&self) -> &VolumeManifest {
        &self.manifest
    }

    pub fn is_compatible(&self, expected_blocksize: u32) -> bool {
        self.manifest.is_compatible(expected_blocksize)
    }

    /// Every block hash this container holds, in no particular order.
    pub fn block_hashes(&self) -> impl Iterator<Item = ContentHash> + '_ {
        self.index
            .records
            .iter()
            .filter(|r| r.name != VolumeManifest::ENTRY_NAME)
            .filter_map(|r| decode_block_name(&r.name))
    }

    pub fn contains_block(&self, hash: &ContentHash) -> bool {
        self.index.find(&hash.to_hex()).is_some()
    }

    /// Read the compressed bytes for a block, by content hash, without
    /// decompressing them. The block decompressor owns decompression and
    /// the plaintext-length check against the planned block size.
    #[instrument(skip(self))]
    pub fn read_block(&self, hash: &ContentHash) -> Result<Vec<u8>, VolumeError> {
        let name = hash.to_hex();
        let record = self
            .index
            .find(&name)
            .ok_or_else(|| VolumeError::EntryNotFound(name.clone()))?
            .clone();
        let mut file = self.file.lock().expect("volume reader mutex poisoned");
        read_entry_bytes(&mut file, &record)
    }

    pub fn entry_count(&self) -> usize {
        self.index.records.len()
    }
}

fn read_entry_bytes(file: &mut File, record: &IndexRecord) -> Result<Vec<u8>, VolumeError> {
    file.seek(SeekFrom::Start(record.offset))?;
    let mut buf = vec![0u8; record.len as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

fn decode_block_name(name: &str) -> Option<ContentHash> {
    let bytes = hex::decode(name).ok()?;
    let array: [u8; 32] = bytes.try_into().ok()?;
    Some(ContentHash::from_bytes(array))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::VolumeBuilder;
    use tempfile::NamedTempFile;

    #[test]
    fn test_open_and_read_block() {
        let tmp = NamedTempFile::new().unwrap();
        let mut builder = VolumeBuilder::new(4096);
        let hash = builder.add_block(b"hello volume");
        builder.finish(tmp.path()).unwrap();

        let reader = VolumeReader::open(tmp.path()).unwrap();
        assert_eq!(reader.manifest().blocksize, 4096);
        assert!(reader.contains_block(&hash));
        let bytes = reader.read_block(&hash).unwrap();
        assert_eq!(bytes, b"hello volume");
    }

    #[test]
    fn test_missing_block() {
        let tmp = NamedTempFile::new().unwrap();
        let mut builder = VolumeBuilder::new(4096);
        builder.add_block(b"present");
        builder.finish(tmp.path()).unwrap();

        let reader = VolumeReader::open(tmp.path()).unwrap();
        let absent = ContentHash::of(b"absent");
        assert!(!reader.contains_block(&absent));
        assert!(matches!(
            reader.read_block(&absent),
            Err(VolumeError::EntryNotFound(_))
        ));
    }

    #[test]
    fn test_rejects_bad_magic() {
        let tmp = NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), b"not a volume at all").unwrap();
        assert!(matches!(
            VolumeReader::open(tmp.path()),
            Err(VolumeError::BadMagic)
        ));
    }

    /// A footer whose record order was tampered with after `compute_root_hash`
    /// wrote `root_hash` is still well-formed JSON, so only the hash check
    /// catches it.
    #[test]
    fn test_rejects_reordered_footer_records() {
        let tmp = NamedTempFile::new().unwrap();
        let mut builder = VolumeBuilder::new(4096);
        builder.add_block(b"first block");
        builder.add_block(b"second block");
        builder.finish(tmp.path()).unwrap();

        let mut bytes = std::fs::read(tmp.path()).unwrap();
        let trailer_start = bytes.len() - TRAILER_LEN as usize;
        let footer_offset = u64::from_le_bytes(bytes[trailer_start..trailer_start + 8].try_into().unwrap());
        let footer_bytes = &bytes[footer_offset as usize..trailer_start];
        let mut index: ContainerIndex = serde_json::from_slice(footer_bytes).unwrap();
        index.records.swap(0, 1);
        let tampered = serde_json::to_vec(&index).unwrap();
        assert_eq!(tampered.len(), footer_bytes.len(), "swap must not change footer length");
        bytes[footer_offset as usize..trailer_start].copy_from_slice(&tampered);
        std::fs::write(tmp.path(), &bytes).unwrap();

        assert!(matches!(
            VolumeReader::open(tmp.path()),
            Err(VolumeError::IndexHashMismatch)
        ));
    }
}
