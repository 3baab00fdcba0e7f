//! # Encryption Module
//!
//! Provides per-segment encryption with deduplication preservation for the
//! restore data plane.
//!
//! ## Features
//!
//! - **XTS-AES-256**: Disk encryption mode with deterministic tweaks
//! - **BLAKE3-keyed MAC**: Integrity verification for encrypted segments
//! - **Key Management**: Versioned keys with rotation support
//! - **Dedup Preservation**: Identical plaintext → identical ciphertext
//! - **Hardware Acceleration**: AES-NI support when available
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use encryption::{EncryptionPolicy, EncryptionMetadata};
//!
//! // Configure encryption policy
//! let policy = EncryptionPolicy::XtsAes256 { key_version: 1 };
//!
//! // Encryption metadata is created during encryption
//! let metadata = EncryptionMetadata::new_xts(1, tweak, ciphertext.len() as u32);
//!
//! // Check if segment is encrypted
//! if metadata.is_encrypted() {
//!     println!("Segment encrypted with key version {}",
//!              metadata.require_key_version().unwrap());
//! }
//! ```
//!
//! ## Security Considerations
//!
//! - **Key Storage**: Keys must be stored securely (TPM, KMS, or env vars)
//! - **Key Rotation**: Old keys must remain available for reading old segments
//! - **Tweak Derivation**: Tweaks are derived from content hashes (deterministic)
//! - **Integrity**: Always verify MAC before trusting decrypted data
//!
//! ## Architecture Integration
//!
//! This crate integrates with the rest of the restore data plane:
//!
//! ```text
//! restore/pipeline.rs
//!     ↓ (uses)
//! encryption crate
//!     ↓ (provides)
//! - Policy types
//! - Encryption/decryption functions
//! - Key management
//! - Integrity verification
//! ```

// Module declarations
pub mod error;
pub mod keymanager;
pub mod mac;
pub mod policy;
pub mod xts;

// Re-exports for convenience
pub use error::{EncryptionError, Result};
pub use keymanager::{KeyManager, XtsKeyPair};
pub use mac::{compute_mac, verify_mac, MAC_TAG_SIZE};
pub use policy::{EncryptionMetadata, EncryptionPolicy, EncryptionStats};
pub use xts::{decrypt_segment, derive_tweak_from_hash, encrypt_segment};

// Version information
/// Encryption crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current encryption format version (XTS-AES-256 with Poly1305)
pub const ENCRYPTION_FORMAT_VERSION: u16 = 1;

/// Tweak/nonce length for XTS mode (128 bits)
pub const TWEAK_LENGTH: usize = 16;

/// Poly1305 MAC tag length (128 bits)
pub const MAC_TAG_LENGTH: usize = 16;

/// XTS key length (512 bits = 2 x AES-256 keys)
pub const XTS_KEY_LENGTH: usize = 64;
