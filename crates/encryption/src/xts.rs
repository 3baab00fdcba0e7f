//! XTS-AES-256 Encryption/Decryption
//!
//! Implements XTS mode (XEX-based tweaked-codebook mode with ciphertext stealing)
//! for disk encryption. XTS is specifically designed for encrypting data at rest
//! with sector-level granularity.
//!
//! ## Features
//!
//! - XTS-AES-256 with 512-bit keys (two AES-256 keys)
//! - Deterministic tweaks derived from content hashes
//! - Hardware acceleration via AES-NI when available
//! - Preserves deduplication (same plaintext + tweak = same ciphertext)
//!
//! ## Security Properties
//!
//! - Confidentiality: AES-256 strength
//! - Deterministic: Enables deduplication
//! - No authentication: Use Poly1305 MAC separately (see mac.rs)

use crate::error::{EncryptionError, Result};
use crate::keymanager::XtsKeyPair;
use crate::policy::EncryptionMetadata;
use aes::Aes256;
use cipher::KeyInit;
use xts_mode::Xts128;

/// XTS block size (128 bits / 16 bytes)
const XTS_BLOCK_SIZE: usize = 16;

/// Minimum data size for XTS (one block)
const MIN_SECTOR_SIZE: usize = XTS_BLOCK_SIZE;

// Hardware feature detection (e.g. AES-NI) is handled internally by the `aes`
// crate via the `cpufeatures` integration, so we can rely on it directly.

/// Encrypt data using XTS-AES-256
///
/// # Arguments
///
/// * `plaintext` - Data to encrypt (must be >= 16 bytes)
/// * `key_pair` - XTS key pair (512 bits)
/// * `tweak` - 128-bit tweak (derived from content hash)
///
/// # Returns
///
/// Encrypted data (same length as plaintext)
///
/// # Errors
///
/// Returns error if:
/// - Plaintext is too short (< 16 bytes)
/// - Key pair is invalid
/// - Encryption operation fails
pub fn encrypt(plaintext: &[u8], key_pair: &XtsKeyPair, tweak: &[u8; 16]) -> Result<Vec<u8>> {
    // Validate input size
    if plaintext.len() < MIN_SECTOR_SIZE {
        return Err(EncryptionError::InvalidCiphertextLength(plaintext.len()));
    }

    // Create cipher instances using KeyInit trait
    let cipher1 = Aes256::new(key_pair.key1().into());
    let cipher2 = Aes256::new(key_pair.key2().into());

    // Create XTS instance
    let xts = Xts128::<Aes256>::new(cipher1, cipher2);

    // Prepare output buffer
    let mut ciphertext = plaintext.to_vec();

    // Encrypt in place - xts-mode expects [u8; 16] directly
    xts.encrypt_sector(&mut ciphertext, *tweak);

    Ok(ciphertext)
}

/// Decrypt data using XTS-AES-256
///
/// # Arguments
///
/// * `ciphertext` - Encrypted data (must be >= 16 bytes)
/// * `key_pair` - XTS key pair (512 bits)
/// * `tweak` - 128-bit tweak (same as used for encryption)
///
/// # Returns
///
/// Decrypted data (same length as ciphertext)
///
/// # Errors
///
/// Returns error if:
/// - Ciphertext is too short (< 16 bytes)
/// - Key pair is invalid
/// - Decryption operation fails
pub fn decrypt(ciphertext: &[u8], key_pair: &XtsKeyPair, tweak: &[u8; 16]) -> Result<Vec<u8>> {
    // Validate input size
    if ciphertext.len() < MIN_SECTOR_SIZE {
        return Err(EncryptionError::InvalidCiphertextLength(ciphertext.len()));
    }

    // Create cipher instances using KeyInit trait
    let cipher1 = Aes256::new(key_pair.key1().into());
    let cipher2 = Aes256::new(key_pair.key2().into());

    // Create XTS instance
    let xts = Xts128::<Aes256>::new(cipher1, cipher2);

    // Prepare output buffer
    let mut plaintext = ciphertext.to_vec();

    // Decrypt in place - xts-mode expects [u8; 16] directly
    xts.decrypt_sector(&mut plaintext, *tweak);

    Ok(plaintext)
}

/// Encrypt segment with metadata creation
///
/// Convenience function that encrypts data and creates metadata in one call.
/// This is the primary interface for the pipeline.
///
/// # Arguments
///
/// * `plaintext` - Segment data to encrypt
/// * `key_pair` - XTS key pair
/// * `key_version` - Key version (for metadata)
/// * `tweak` - Deterministic tweak derived from content hash
///
/// # Returns
///
/// Tuple of (ciphertext, metadata with encryption info)
pub fn encrypt_segment(
    plaintext: &[u8],
    key_pair: &XtsKeyPair,
    key_version: u32,
    tweak: [u8; 16],
) -> Result<(Vec<u8>, EncryptionMetadata)> {
    // Encrypt the data
    let ciphertext = encrypt(plaintext, key_pair, &tweak)?;

    // Create metadata
    let metadata = EncryptionMetadata::new_xts(key_version, tweak, ciphertext.len() as u32);

    Ok((ciphertext, metadata))
}

/// Decrypt segment using metadata
///
/// Convenience function that extracts info from metadata and decrypts.
/// This is the primary interface for the pipeline.
///
/// # Arguments
///
/// * `ciphertext` - Encrypted segment data
/// * `key_pair` - XTS key pair (must match key_version in metadata)
/// * `metadata` - Encryption metadata containing tweak and length
///
/// # Returns
///
/// Decrypted plaintext data
pub fn decrypt_segment(
    ciphertext: &[u8],
    key_pair: &XtsKeyPair,
    metadata: &EncryptionMetadata,
) -> Result<Vec<u8>> {
    // Verify metadata is present
    if !metadata.is_encrypted() {
        return Err(EncryptionError::MissingMetadata);
    }

    // Extract tweak from metadata
    let tweak = metadata
        .require_tweak()
        .map_err(|e| EncryptionError::CorruptedMetadata(e.to_string()))?;

    // Verify length matches
    let expected_len = metadata
        .ciphertext_len
        .ok_or_else(|| EncryptionError::MissingMetadata)?;

    if ciphertext.len() != expected_len as usize {
        return Err(EncryptionError::InvalidCiphertextLength(ciphertext.len()));
    }

    // Decrypt the data
    decrypt(ciphertext, key_pair, &tweak)
}

/// Derive deterministic tweak from content hash
///
/// Takes a BLAKE3 hash (32 bytes) and extracts the first 16 bytes as a tweak.
/// This ensures identical content produces identical tweaks, preserving dedup.
///
/// # Arguments
///
/// * `content_hash` - BLAKE3 hash of compressed data (32 bytes)
///
/// # Returns
///
/// 16-byte tweak for XTS mode
pub fn derive_tweak_from_hash(content_hash: &[u8]) -> [u8; 16] {
    let mut tweak = [0u8; 16];

    // Take first 16 bytes of hash
    let copy_len = content_hash.len().min(16);
    tweak[..copy_len].copy_from_slice(&content_hash[..copy_len]);

    tweak
}
