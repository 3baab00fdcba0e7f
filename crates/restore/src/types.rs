//! Restore-pipeline-internal entities: the ones named in the data model
//! that depend on runtime resources (open files, readers, refcounts) and
//! therefore don't belong in `common` alongside the catalog-facing
//! entities.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;

use common::ContentHash;
use volume::VolumeReader;

/// A plaintext volume's on-disk temp file. Deleted when dropped (via
/// `NamedTempFile`'s own `Drop`), which is what "evicted" means in
/// practice: the cache simply lets its last reference to this go.
pub struct VolumeBlob {
    file: NamedTempFile,
}

impl VolumeBlob {
    pub fn new(file: NamedTempFile) -> Self {
        Self { file }
    }

    pub fn path(&self) -> &std::path::Path {
        self.file.path()
    }
}

/// A cached, ready-to-read volume. `reader` is handed out to as many
/// concurrent decompress workers as have an outstanding request against
/// this volume; `Arc::strong_count(&reader)` above 1 (the cache's own
/// reference) is this entry's refcount, per DESIGN.md's resolution of the
/// "cycles via references to the container" design note.
pub struct CacheEntry {
    pub blob: Arc<VolumeBlob>,
    pub reader: Arc<VolumeReader>,
    pub compression: String,
    pub size_bytes: u64,
    pub last_use: Instant,
    /// Set once the last planned request for this volume has been seen;
    /// the entry is evicted as soon as its refcount permits, instead of
    /// waiting for LRU pressure.
    pub pending_eviction: bool,
}

impl CacheEntry {
    /// Outstanding decompress workers still holding a clone of `reader`,
    /// not counting the cache's own reference.
    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.reader).saturating_sub(1)
    }
}

/// Requests waiting on a volume's download+decrypt to complete, in arrival
/// order (FIFO waiter wakeup, per the testable properties).
#[derive(Default)]
pub struct InFlightEntry {
    pub waiters: Vec<common::BlockRequest>,
}

/// Per-file assembler state: output handle, expected shape, and the
/// out-of-order reorder buffer.
pub struct FileJob {
    pub file_id: u64,
    pub target_path: std::path::PathBuf,
    pub part_path: std::path::PathBuf,
    pub expected_length: u64,
    pub expected_hash: ContentHash,
    pub hardlink_target_id: Option<u64>,
    pub metadata: common::FileMetadata,
    pub writer: std::fs::File,
    pub hasher: blake3::Hasher,
    /// Next byte offset the hasher/writer expects; blocks that arrive
    /// out of order are buffered in `pending` until their turn.
    pub next_offset: u64,
    pub total_blocks: usize,
    pub blocks_written: usize,
    pub pending: BTreeMap<u64, Vec<u8>>,
}

/// Aggregated counters for a single restore run, returned to the CLI and
/// used to pick its exit code.
#[derive(Debug, Clone, Default)]
pub struct RestoreSummary {
    pub files_restored: u64,
    pub files_failed: u64,
    pub files_skipped: u64,
    pub bytes_written: u64,
    pub volumes_downloaded: u64,
    pub hardlinks_created: u64,
    pub metadata_warnings: u64,
    pub duration: Duration,
    pub failures: Vec<FileFailure>,
}

impl RestoreSummary {
    /// Exit code per §6: 0 full success, 2 partial, 3 total failure.
    /// Callers add 4/5 for argument/catalog errors that never reach here.
    pub fn exit_code(&self) -> i32 {
        if self.files_failed == 0 {
            0
        } else if self.files_restored > 0 {
            2
        } else {
            3
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileFailure {
    pub file_id: Option<u64>,
    pub path: Option<String>,
    pub reason: String,
}

/// Per-run observability counters, logged at `info!`/`debug!` rather than
/// returned to the caller — mirrors this codebase's small stats-struct
/// pattern (`EncryptionStats`, `DedupStats`-shaped types).
#[derive(Debug, Clone, Default)]
pub struct RestorePlanStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub evictions: u64,
    pub download_retries: u64,
}
