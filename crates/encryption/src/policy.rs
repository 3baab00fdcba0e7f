use serde::{Deserialize, Serialize};

/// Whether a volume segment is encrypted, and if so with which key.
/// Mirrors the two states `EncryptionMetadata::is_encrypted` distinguishes;
/// callers that only need the state (not the full metadata) use this.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum EncryptionPolicy {
    /// Segment is stored in plaintext.
    None,

    /// XTS-AES-256 with a BLAKE3-keyed MAC.
    ///
    /// 512-bit keys (two AES-256 keys for XTS mode), with a deterministic
    /// tweak derived from the content hash so identical plaintext still
    /// dedups under encryption.
    XtsAes256 {
        /// Key version to use for encryption
        key_version: u32,
    },
}

impl Default for EncryptionPolicy {
    fn default() -> Self {
        EncryptionPolicy::None
    }
}

impl EncryptionPolicy {
    /// Check if encryption is enabled
    pub fn is_enabled(&self) -> bool {
        !matches!(self, EncryptionPolicy::None)
    }

    /// Get the key version (if applicable)
    pub fn key_version(&self) -> Option<u32> {
        match self {
            EncryptionPolicy::None => None,
            EncryptionPolicy::XtsAes256 { key_version } => Some(*key_version),
        }
    }

    /// Get encryption algorithm name (for logging/metrics)
    pub fn algorithm_name(&self) -> &str {
        match self {
            EncryptionPolicy::None => "none",
            EncryptionPolicy::XtsAes256 { .. } => "xts-aes-256",
        }
    }
}

/// Per-segment encryption metadata
///
/// These fields are optional: unencrypted segments populate none of them.
/// All encrypted segments must populate every field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EncryptionMetadata {
    /// Encryption format version. `None` means unencrypted; `Some(1)` means
    /// XTS-AES-256 with a BLAKE3-keyed MAC, the only format this crate writes.
    pub encryption_version: Option<u16>,

    /// Key version used for this segment
    ///
    /// Enables key rotation without re-encrypting all data immediately.
    /// Old segments remain readable with old keys until re-encrypted.
    pub key_version: Option<u32>,

    /// Tweak/nonce for XTS mode (16 bytes)
    ///
    /// Derived deterministically from content hash:
    /// `tweak = BLAKE3(content_hash)[0..16]`
    ///
    /// This ensures identical plaintext → identical ciphertext,
    /// which preserves deduplication.
    pub tweak_nonce: Option<[u8; 16]>,

    /// BLAKE3-keyed MAC tag (16 bytes)
    ///
    /// Computed over: ciphertext || serialized_metadata
    /// Verified on read to detect tampering or corruption.
    pub integrity_tag: Option<[u8; 16]>,

    /// Length of ciphertext in bytes
    ///
    /// May differ from plaintext length due to block padding.
    /// Used for validation and offset calculations.
    pub ciphertext_len: Option<u32>,
}

impl EncryptionMetadata {
    /// Create new metadata for XTS encryption
    pub fn new_xts(key_version: u32, tweak: [u8; 16], ciphertext_len: u32) -> Self {
        Self {
            encryption_version: Some(1), // Version 1 = XTS-AES-256
            key_version: Some(key_version),
            tweak_nonce: Some(tweak),
            integrity_tag: None, // Set after MAC computation
            ciphertext_len: Some(ciphertext_len),
        }
    }

    /// Create unencrypted metadata (all None)
    pub fn new_unencrypted() -> Self {
        Self::default()
    }

    /// Check if segment is encrypted
    pub fn is_encrypted(&self) -> bool {
        self.encryption_version.is_some()
    }

    /// Verify integrity tag is present
    pub fn has_integrity_tag(&self) -> bool {
        self.integrity_tag.is_some()
    }

    /// Set the integrity tag (called after MAC computation)
    pub fn set_integrity_tag(&mut self, tag: [u8; 16]) {
        self.integrity_tag = Some(tag);
    }

    /// Get the encryption version or error if not encrypted
    pub fn require_version(&self) -> Result<u16, &'static str> {
        self.encryption_version.ok_or("Segment is not encrypted")
    }

    /// Get the key version or error if not encrypted
    pub fn require_key_version(&self) -> Result<u32, &'static str> {
        self.key_version.ok_or("Segment is not encrypted")
    }

    /// Get the tweak or error if not present
    pub fn require_tweak(&self) -> Result<[u8; 16], &'static str> {
        self.tweak_nonce.ok_or("Missing tweak nonce")
    }

    /// Get the integrity tag or error if not present
    pub fn require_integrity_tag(&self) -> Result<[u8; 16], &'static str> {
        self.integrity_tag.ok_or("Missing integrity tag")
    }
}

/// Encryption statistics for monitoring
///
/// Tracks encryption ratio, key versions in use, and total bytes encrypted.
/// Used for observability and compliance reporting.
#[derive(Debug, Clone, Default)]
pub struct EncryptionStats {
    pub encrypted_segments: usize,
    pub unencrypted_segments: usize,
    pub total_ciphertext_bytes: u64,
    pub key_versions_used: std::collections::HashSet<u32>,
}

impl EncryptionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an encrypted segment
    pub fn add_encrypted(&mut self, key_version: u32, bytes: u64) {
        self.encrypted_segments += 1;
        self.total_ciphertext_bytes += bytes;
        self.key_versions_used.insert(key_version);
    }

    /// Record an unencrypted segment
    pub fn add_unencrypted(&mut self) {
        self.unencrypted_segments += 1;
    }

    /// Calculate encryption ratio (0.0 to 1.0)
    pub fn encryption_ratio(&self) -> f32 {
        let total = self.encrypted_segments + self.unencrypted_segments;
        if total == 0 {
            return 0.0;
        }
        self.encrypted_segments as f32 / total as f32
    }

    /// Get total segments processed
    pub fn total_segments(&self) -> usize {
        self.encrypted_segments + self.unencrypted_segments
    }

    /// Check if any encryption has occurred
    pub fn has_encrypted_data(&self) -> bool {
        self.encrypted_segments > 0
    }
}
