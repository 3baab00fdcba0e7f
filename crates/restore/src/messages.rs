//! Inter-stage channel payloads. Every arrow in the pipeline diagram (§2)
//! is one of these types flowing over a bounded `mpsc` channel.

use std::path::PathBuf;
use std::sync::Arc;

use common::{BlockRequest, FileMetadata, FilePlan};
use volume::VolumeReader;

use crate::types::VolumeBlob;

/// Everything the Volume Manager needs to know about: new block requests
/// from the Block Source, volume-ready/failed notifications from the
/// Decryptor, and a nudge to re-check eviction from whichever decompress
/// worker just finished the last planned read of a volume. Coalescing
/// these three producers into one enum channel is what lets the Manager's
/// recv loop do without `select!` (§9 "channel workaround" resolution).
pub enum ManagerMessage {
    Request(BlockRequest),
    Ready(Result<ReadyVolume, VolumeFailure>),
    Evict(u64),
}

/// A volume whose plaintext container is open and ready to serve reads.
#[derive(Clone)]
pub struct ReadyVolume {
    pub volume_id: u64,
    pub blob: Arc<VolumeBlob>,
    pub reader: Arc<VolumeReader>,
    pub compression: String,
}

#[derive(Debug, Clone)]
pub struct VolumeFailure {
    pub volume_id: u64,
    pub reason: String,
}

/// Sent by the Volume Manager to the Volume Downloader pool to kick off a
/// fetch for a volume no cache entry or in-flight download covers yet.
#[derive(Debug, Clone, Copy)]
pub struct DownloadRequest {
    pub volume_id: u64,
}

/// Raw bytes fetched from the backend, still possibly encrypted, handed to
/// the Decryptor. `compression`/`encryption` come from the parsed
/// [`volume::VolumeFilename`].
pub struct DownloadedVolume {
    pub volume_id: u64,
    pub bytes: Vec<u8>,
    pub compression: String,
    pub encryption: Option<String>,
}

/// One block read+decompress assignment, handed from the Manager to a
/// decompress worker. `evict_hint` is copied from the triggering
/// `BlockRequest` so the worker knows to send `ManagerMessage::Evict` once
/// it has dropped its `reader` clone.
pub struct DecompressTask {
    pub request: BlockRequest,
    pub reader: Arc<VolumeReader>,
    pub compression: String,
    pub evict_hint: bool,
}

/// Everything the File Assembler consumes: new file announcements,
/// successfully decompressed blocks, and failures from any upstream stage
/// (catalog resolution, download, decrypt, decompress, or integrity).
pub enum AssemblerMessage {
    Plan(FilePlan),
    Block {
        file_id: u64,
        file_offset: u64,
        bytes: Vec<u8>,
    },
    BlockFailed {
        file_id: u64,
        reason: String,
    },
}

/// A file whose content has been fully written and hashed successfully,
/// handed to the Metadata/Verifier stage to apply mtime/permissions/
/// symlink/xattrs and resolve hardlink coalescing.
pub struct FinalizedFile {
    pub file_id: u64,
    pub part_path: PathBuf,
    pub target_path: PathBuf,
    pub metadata: FileMetadata,
    pub hardlink_target_id: Option<u64>,
}
