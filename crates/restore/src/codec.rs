//! Runtime dispatch from an algorithm name (recorded in the volume
//! manifest or filename) to the concrete `compression`/`encryption`
//! transform. Implements §9's "Dynamic dispatch over codecs" design
//! note: the restore pipeline never references a concrete codec, only
//! this registry.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use encryption::{EncryptionMetadata, EncryptionStats, KeyManager};

use common::RestoreError;

/// Magic prefix identifying an encrypted volume envelope: four bytes of
/// magic, a little-endian `u32` metadata length, the JSON-encoded
/// [`EncryptionMetadata`], then the ciphertext. Volumes uploaded without
/// encryption are the plaintext container verbatim and never carry this
/// prefix.
pub const ENCRYPTED_ENVELOPE_MAGIC: &[u8; 4] = b"CVXT";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EnvelopeHeader {
    metadata: EncryptionMetadata,
}

/// Wrap ciphertext with its encryption metadata into the on-disk envelope
/// the Decryptor expects to find when a volume's filename carries an
/// encryption suffix.
pub fn wrap_envelope(metadata: &EncryptionMetadata, ciphertext: &[u8]) -> Vec<u8> {
    let header = EnvelopeHeader {
        metadata: metadata.clone(),
    };
    let header_bytes = serde_json::to_vec(&header).expect("metadata serializes");
    let mut out = Vec::with_capacity(8 + header_bytes.len() + ciphertext.len());
    out.extend_from_slice(ENCRYPTED_ENVELOPE_MAGIC);
    out.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(ciphertext);
    out
}

/// Split a downloaded blob into its encryption metadata and ciphertext, if
/// it carries the envelope prefix. Returns `None` for an unencrypted
/// volume, which the Decryptor passes through untouched.
pub fn split_envelope(bytes: &[u8]) -> Option<(EncryptionMetadata, &[u8])> {
    if bytes.len() < 8 || &bytes[0..4] != ENCRYPTED_ENVELOPE_MAGIC {
        return None;
    }
    let len = u32::from_le_bytes(bytes[4..8].try_into().ok()?) as usize;
    let body = bytes.get(8..8 + len)?;
    let header: EnvelopeHeader = serde_json::from_slice(body).ok()?;
    Some((header.metadata, &bytes[8 + len..]))
}

/// Resolves codec names to the concrete compression/encryption transforms.
/// Cloneable and cheap: the owned state is the shared key manager plus a
/// running tally of how many volumes were decrypted vs. passed through.
#[derive(Clone)]
pub struct CodecRegistry {
    key_manager: Arc<Mutex<KeyManager>>,
    stats: Arc<Mutex<EncryptionStats>>,
}

impl CodecRegistry {
    pub fn new(key_manager: KeyManager) -> Self {
        Self {
            key_manager: Arc::new(Mutex::new(key_manager)),
            stats: Arc::new(Mutex::new(EncryptionStats::new())),
        }
    }

    pub fn with_shared_key_manager(key_manager: Arc<Mutex<KeyManager>>) -> Self {
        Self {
            key_manager,
            stats: Arc::new(Mutex::new(EncryptionStats::new())),
        }
    }

    /// Decrypt a volume blob given its content hash (used to derive the
    /// deterministic XTS tweak) and encryption metadata. Verifies the MAC
    /// before decrypting, per §4.5.
    pub async fn decrypt_volume(
        &self,
        ciphertext: &[u8],
        metadata: &EncryptionMetadata,
    ) -> Result<Vec<u8>, RestoreError> {
        let key_version = metadata.key_version.ok_or_else(|| {
            RestoreError::Other(anyhow::anyhow!("encrypted volume metadata missing key_version"))
        })?;

        let mut manager = self.key_manager.lock().await;
        let key_pair = manager
            .get_key(key_version)
            .map_err(|e| RestoreError::Other(anyhow::anyhow!("key lookup failed: {e}")))?
            .clone();
        drop(manager);

        encryption::verify_mac(ciphertext, metadata, key_pair.key1(), key_pair.key2())
            .map_err(|e| RestoreError::Other(anyhow::anyhow!("MAC verification failed: {e}")))?;

        let plaintext = encryption::decrypt_segment(ciphertext, &key_pair, metadata)
            .map_err(|e| RestoreError::Other(anyhow::anyhow!("decryption failed: {e}")))?;

        self.stats.lock().await.add_encrypted(key_version, ciphertext.len() as u64);
        Ok(plaintext)
    }

    /// Records a volume that was stored (and served) as plaintext, for the
    /// same end-of-run report `decrypt_volume` feeds.
    pub async fn record_unencrypted_volume(&self) {
        self.stats.lock().await.add_unencrypted();
    }

    /// Snapshot of how many volumes this registry has decrypted vs. passed
    /// through unencrypted since it was created.
    pub async fn encryption_stats(&self) -> EncryptionStats {
        self.stats.lock().await.clone()
    }

    /// Decompress a block by the algorithm name recorded in its volume's
    /// manifest entry.
    pub fn decompress_block(&self, algorithm: &str, data: &[u8]) -> Result<Vec<u8>, RestoreError> {
        compression::decompress_by_name(algorithm, data)
            .map_err(|e| RestoreError::Other(anyhow::anyhow!("decompression failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encryption::keymanager::MASTER_KEY_SIZE;

    #[test]
    fn test_envelope_roundtrip() {
        let metadata = EncryptionMetadata::new_xts(1, [7u8; 16], 5);
        let wrapped = wrap_envelope(&metadata, b"ciphr");
        let (decoded_meta, ciphertext) = split_envelope(&wrapped).unwrap();
        assert_eq!(decoded_meta.key_version, Some(1));
        assert_eq!(ciphertext, b"ciphr");
    }

    #[test]
    fn test_split_envelope_rejects_plaintext() {
        assert!(split_envelope(b"CVOL plain container bytes").is_none());
    }

    #[tokio::test]
    async fn test_decrypt_volume_roundtrip() {
        let manager = KeyManager::new([3u8; MASTER_KEY_SIZE]);
        let registry = CodecRegistry::new(manager);

        let plaintext = b"a whole plaintext volume container".repeat(4);
        let key_pair = {
            let mut mgr = registry.key_manager.lock().await;
            mgr.get_key(1).unwrap().clone()
        };
        let tweak = encryption::derive_tweak_from_hash(blake3::hash(b"vol-1").as_bytes());
        let (ciphertext, mut metadata) =
            encryption::encrypt_segment(&plaintext, &key_pair, 1, tweak).unwrap();
        let mac = encryption::compute_mac(&ciphertext, &metadata, key_pair.key1(), key_pair.key2())
            .unwrap();
        metadata.set_integrity_tag(mac);

        let decrypted = registry.decrypt_volume(&ciphertext, &metadata).await.unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[tokio::test]
    async fn test_encryption_stats_track_encrypted_and_unencrypted_volumes() {
        let manager = KeyManager::new([9u8; MASTER_KEY_SIZE]);
        let registry = CodecRegistry::new(manager);

        registry.record_unencrypted_volume().await;
        registry.record_unencrypted_volume().await;

        let plaintext = b"stats fixture volume container".repeat(2);
        let key_pair = {
            let mut mgr = registry.key_manager.lock().await;
            mgr.get_key(1).unwrap().clone()
        };
        let tweak = encryption::derive_tweak_from_hash(blake3::hash(b"vol-stats").as_bytes());
        let (ciphertext, mut metadata) =
            encryption::encrypt_segment(&plaintext, &key_pair, 1, tweak).unwrap();
        let mac = encryption::compute_mac(&ciphertext, &metadata, key_pair.key1(), key_pair.key2())
            .unwrap();
        metadata.set_integrity_tag(mac);
        registry.decrypt_volume(&ciphertext, &metadata).await.unwrap();

        let stats = registry.encryption_stats().await;
        assert_eq!(stats.encrypted_segments, 1);
        assert_eq!(stats.unencrypted_segments, 2);
        assert_eq!(stats.total_segments(), 3);
        assert!(stats.key_versions_used.contains(&1));
    }
}
