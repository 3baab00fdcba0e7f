//! File Assembler: owns one `FileJob` per in-flight file, reassembling
//! decompressed blocks into `.part` files in file order and verifying the
//! whole-file hash before handing off to the Metadata/Verifier stage.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use common::ContentHash;

use crate::messages::{AssemblerMessage, FinalizedFile};
use crate::types::{FileFailure, FileJob};

pub struct AssemblerOutcome {
    pub bytes_written: u64,
    pub files_skipped: u64,
    pub failures: Vec<FileFailure>,
}

/// A message that arrived for a file whose `Plan` has been accepted but is
/// still waiting for an admission slot (see `MAX_CONCURRENT_FILES` below).
/// Replayed, in arrival order, once the file is admitted.
enum BufferedMessage {
    Block { file_offset: u64, bytes: Vec<u8> },
    Failed { reason: String },
}

/// A file plan that arrived while `jobs` was already at
/// `max_concurrent_files`; its `.part` file is not opened until it is
/// admitted, so it holds no file handle while queued.
struct QueuedFile {
    plan: common::FilePlan,
    buffered: Vec<BufferedMessage>,
}

/// Runs until `rx` closes (the Block Source and Manager/Decompressor have
/// both finished), finalizing every file whose last block has arrived.
/// `write_timeout` bounds each individual block application (the write to
/// the `.part` file plus any buffered blocks it unblocks); a timeout aborts
/// that file the same way a write error does. `max_concurrent_files` bounds
/// how many `FileJob`s (open `.part` handles) exist at once, per spec §4.2
/// — plans beyond that cap are queued and admitted in arrival order as
/// earlier files finalize or abort.
#[tracing::instrument(skip(rx, finalized_tx))]
pub async fn run_assembler(
    output_root: PathBuf,
    overwrite: bool,
    write_timeout: Duration,
    max_concurrent_files: usize,
    mut rx: mpsc::Receiver<AssemblerMessage>,
    finalized_tx: mpsc::Sender<FinalizedFile>,
) -> AssemblerOutcome {
    let max_concurrent_files = max_concurrent_files.max(1);
    let mut jobs: HashMap<u64, FileJob> = HashMap::new();
    let mut queue: VecDeque<QueuedFile> = VecDeque::new();
    let mut bytes_written = 0u64;
    let mut files_skipped = 0u64;
    let mut failures = Vec::new();

    loop {
        let msg = match rx.recv().await {
            Some(msg) => msg,
            None => {
                info!("assembler channel closed, shutting down");
                break;
            }
        };

        match msg {
            AssemblerMessage::Plan(plan) => {
                if jobs.len() < max_concurrent_files {
                    admit(
                        plan,
                        &output_root,
                        overwrite,
                        &finalized_tx,
                        &mut jobs,
                        &mut bytes_written,
                        &mut files_skipped,
                        &mut failures,
                    )
                    .await;
                } else {
                    debug!(
                        file_id = plan.file_id,
                        in_flight = jobs.len(),
                        queued = queue.len() + 1,
                        "deferring file plan: MAX_CONCURRENT_FILES reached"
                    );
                    queue.push_back(QueuedFile { plan, buffered: Vec::new() });
                }
            }

            AssemblerMessage::Block { file_id, file_offset, bytes } => {
                if jobs.contains_key(&file_id) {
                    apply_to_job(file_id, file_offset, bytes, write_timeout, &finalized_tx, &mut jobs, &mut bytes_written, &mut failures).await;
                } else if let Some(q) = queue.iter_mut().find(|q| q.plan.file_id == file_id) {
                    q.buffered.push(BufferedMessage::Block { file_offset, bytes });
                } else {
                    debug!(file_id, "block arrived for unknown or already-finalized file");
                }
            }

            AssemblerMessage::BlockFailed { file_id, reason } => {
                if jobs.contains_key(&file_id) {
                    abort_job(file_id, reason, &mut jobs, &mut failures);
                } else if let Some(q) = queue.iter_mut().find(|q| q.plan.file_id == file_id) {
                    q.buffered.push(BufferedMessage::Failed { reason });
                }
            }
        }

        drain_queue(
            &output_root,
            overwrite,
            write_timeout,
            max_concurrent_files,
            &finalized_tx,
            &mut jobs,
            &mut queue,
            &mut bytes_written,
            &mut files_skipped,
            &mut failures,
        )
        .await;
    }

    AssemblerOutcome { bytes_written, files_skipped, failures }
}

/// Admits as many queued plans as fit under `max_concurrent_files`,
/// replaying each one's buffered messages (in arrival order) against its
/// freshly opened `FileJob`. Called after every message so a file that
/// just finalized or aborted immediately frees its slot to the next queued
/// plan, per spec §4.2's "multiple files in flight" bound.
#[allow(clippy::too_many_arguments)]
async fn drain_queue(
    output_root: &Path,
    overwrite: bool,
    write_timeout: Duration,
    max_concurrent_files: usize,
    finalized_tx: &mpsc::Sender<FinalizedFile>,
    jobs: &mut HashMap<u64, FileJob>,
    queue: &mut VecDeque<QueuedFile>,
    bytes_written: &mut u64,
    files_skipped: &mut u64,
    failures: &mut Vec<FileFailure>,
) {
    while jobs.len() < max_concurrent_files {
        let Some(queued) = queue.pop_front() else { break };
        let file_id = queued.plan.file_id;

        admit(queued.plan, output_root, overwrite, finalized_tx, jobs, bytes_written, files_skipped, failures).await;

        for msg in queued.buffered {
            if !jobs.contains_key(&file_id) {
                // Admission skipped/failed this file, or an earlier
                // buffered message already finalized/aborted it.
                break;
            }
            match msg {
                BufferedMessage::Block { file_offset, bytes } => {
                    apply_to_job(file_id, file_offset, bytes, write_timeout, finalized_tx, jobs, bytes_written, failures).await;
                }
                BufferedMessage::Failed { reason } => {
                    abort_job(file_id, reason, jobs, failures);
                }
            }
        }
    }
}

/// Opens `plan`'s `.part` file and either inserts a `FileJob` (non-empty
/// file), finalizes it immediately (zero-length file), records it as
/// skipped (already exists, `!overwrite`), or records a failure (couldn't
/// create the parent directory or the `.part` file).
#[allow(clippy::too_many_arguments)]
async fn admit(
    plan: common::FilePlan,
    output_root: &Path,
    overwrite: bool,
    finalized_tx: &mpsc::Sender<FinalizedFile>,
    jobs: &mut HashMap<u64, FileJob>,
    bytes_written: &mut u64,
    files_skipped: &mut u64,
    failures: &mut Vec<FileFailure>,
) {
    let target_path = output_root.join(&plan.target_path);
    let part_path = part_path_for(&target_path);

    if !overwrite && target_path.exists() {
        debug!(file_id = plan.file_id, path = %plan.target_path, "skipping existing file, not overwriting");
        *files_skipped += 1;
        return;
    }

    if let Some(parent) = target_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            error!(file_id = plan.file_id, error = %e, "failed to create parent directory");
            failures.push(FileFailure {
                file_id: Some(plan.file_id),
                path: Some(plan.target_path.clone()),
                reason: format!("create_dir_all failed: {e}"),
            });
            return;
        }
    }

    let writer = match std::fs::File::create(&part_path) {
        Ok(f) => f,
        Err(e) => {
            error!(file_id = plan.file_id, error = %e, "failed to create .part file");
            failures.push(FileFailure {
                file_id: Some(plan.file_id),
                path: Some(plan.target_path.clone()),
                reason: format!("could not create part file: {e}"),
            });
            return;
        }
    };

    let job = FileJob {
        file_id: plan.file_id,
        target_path,
        part_path,
        expected_length: plan.expected_length,
        expected_hash: plan.expected_hash,
        hardlink_target_id: plan.hardlink_target_id,
        metadata: plan.metadata,
        writer,
        hasher: blake3::Hasher::new(),
        next_offset: 0,
        total_blocks: 0,
        blocks_written: 0,
        pending: BTreeMap::new(),
    };

    if job.expected_length == 0 {
        debug!(file_id = job.file_id, "zero-block file, finalizing immediately");
        finalize(job, finalized_tx, bytes_written, failures).await;
    } else {
        jobs.insert(plan.file_id, job);
    }
}

/// Applies one block to an already-admitted job, finalizing or aborting it
/// in place when the write fails, times out, or completes the file.
async fn apply_to_job(
    file_id: u64,
    file_offset: u64,
    bytes: Vec<u8>,
    write_timeout: Duration,
    finalized_tx: &mpsc::Sender<FinalizedFile>,
    jobs: &mut HashMap<u64, FileJob>,
    bytes_written: &mut u64,
    failures: &mut Vec<FileFailure>,
) {
    let result = {
        let job = jobs.get_mut(&file_id).expect("caller checked contains_key");
        tokio::time::timeout(write_timeout, async { apply_block(job, file_offset, bytes) }).await
    };

    let failure_reason = match result {
        Ok(Ok(())) => None,
        Ok(Err(reason)) => Some(reason),
        Err(_) => Some(format!("write to .part file timed out after {write_timeout:?}")),
    };

    if let Some(reason) = failure_reason {
        abort_job(file_id, reason, jobs, failures);
        return;
    }

    let done = jobs
        .get(&file_id)
        .map(|job| job.next_offset >= job.expected_length)
        .unwrap_or(false);
    if done {
        let job = jobs.remove(&file_id).unwrap();
        finalize(job, finalized_tx, bytes_written, failures).await;
    }
}

/// Removes and discards an admitted job's `.part` file, recording a
/// failure. Shared by the write-error/timeout path and `BlockFailed`.
fn abort_job(file_id: u64, reason: String, jobs: &mut HashMap<u64, FileJob>, failures: &mut Vec<FileFailure>) {
    if let Some(job) = jobs.remove(&file_id) {
        error!(file_id, reason = %reason, "aborting file, deleting .part");
        discard_part(&job);
        failures.push(FileFailure {
            file_id: Some(file_id),
            path: Some(job.target_path.display().to_string()),
            reason,
        });
    }
}

/// Removes a job's `.part` file after it has been aborted. Errors are
/// logged and otherwise ignored, matching `verifier.rs`'s own fs-error
/// handling for a stage that is already unwinding a failure.
fn discard_part(job: &FileJob) {
    if let Err(e) = std::fs::remove_file(&job.part_path) {
        warn!(file_id = job.file_id, path = %job.part_path.display(), error = %e, "failed to remove .part file");
    }
}

/// Applies one block, draining any now-contiguous buffered blocks behind
/// it. Out-of-order blocks are buffered in `job.pending`, capped at
/// `common::MAX_REORDER_BUFFER_BLOCKS`; a block that would push the buffer
/// past that cap is reported as a failure instead of growing it further.
fn apply_block(job: &mut FileJob, file_offset: u64, bytes: Vec<u8>) -> Result<(), String> {
    if file_offset == job.next_offset {
        write_block(job, &bytes)?;
        job.next_offset += bytes.len() as u64;
        job.blocks_written += 1;

        while let Some(next_bytes) = job.pending.remove(&job.next_offset) {
            write_block(job, &next_bytes)?;
            job.next_offset += next_bytes.len() as u64;
            job.blocks_written += 1;
        }
        Ok(())
    } else {
        if job.pending.len() >= common::MAX_REORDER_BUFFER_BLOCKS {
            return Err(format!(
                "reorder buffer exceeded {} buffered out-of-order blocks",
                common::MAX_REORDER_BUFFER_BLOCKS
            ));
        }
        job.pending.insert(file_offset, bytes);
        Ok(())
    }
}

fn write_block(job: &mut FileJob, bytes: &[u8]) -> Result<(), String> {
    job.hasher.update(bytes);
    job.writer
        .write_all(bytes)
        .map_err(|e| format!("write to .part file failed: {e}"))
}

async fn finalize(
    mut job: FileJob,
    finalized_tx: &mpsc::Sender<FinalizedFile>,
    bytes_written: &mut u64,
    failures: &mut Vec<FileFailure>,
) {
    if let Err(e) = job.writer.flush() {
        discard_part(&job);
        failures.push(FileFailure {
            file_id: Some(job.file_id),
            path: Some(job.target_path.display().to_string()),
            reason: format!("flush failed: {e}"),
        });
        return;
    }

    let actual = ContentHash::from_bytes(*job.hasher.finalize().as_bytes());
    if actual != job.expected_hash {
        error!(
            file_id = job.file_id,
            expected = %job.expected_hash,
            actual = %actual,
            "whole-file hash mismatch"
        );
        discard_part(&job);
        failures.push(FileFailure {
            file_id: Some(job.file_id),
            path: Some(job.target_path.display().to_string()),
            reason: format!(
                "hash mismatch: expected {}, got {}",
                job.expected_hash, actual
            ),
        });
        return;
    }

    *bytes_written += job.next_offset;
    debug!(file_id = job.file_id, bytes = job.next_offset, "file content verified");

    let file_id = job.file_id;
    let finalized = FinalizedFile {
        file_id,
        part_path: job.part_path,
        target_path: job.target_path,
        metadata: job.metadata,
        hardlink_target_id: job.hardlink_target_id,
    };
    if finalized_tx.send(finalized).await.is_err() {
        warn!(file_id, "verifier channel closed, dropping finalized file");
    }
}

fn part_path_for(target_path: &Path) -> PathBuf {
    let mut name = target_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    target_path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::FileMetadata;
    use tempfile::TempDir;

    const TEST_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
    const TEST_MAX_CONCURRENT_FILES: usize = 8;

    fn plan(file_id: u64, path: &str, content: &[u8]) -> common::FilePlan {
        common::FilePlan {
            file_id,
            target_path: path.to_string(),
            expected_length: content.len() as u64,
            expected_hash: ContentHash::of(content),
            hardlink_target_id: None,
            metadata: FileMetadata::default(),
        }
    }

    #[tokio::test]
    async fn test_single_block_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let (tx, rx) = mpsc::channel(8);
        let (finalized_tx, mut finalized_rx) = mpsc::channel(8);

        let content = b"hello restore world";
        tx.send(AssemblerMessage::Plan(plan(1, "out.txt", content)))
            .await
            .unwrap();
        tx.send(AssemblerMessage::Block {
            file_id: 1,
            file_offset: 0,
            bytes: content.to_vec(),
        })
        .await
        .unwrap();
        drop(tx);

        let outcome = run_assembler(dir.path().to_path_buf(), true, TEST_WRITE_TIMEOUT, TEST_MAX_CONCURRENT_FILES, rx, finalized_tx).await;
        assert_eq!(outcome.bytes_written, content.len() as u64);
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.files_skipped, 0);

        let finalized = finalized_rx.recv().await.unwrap();
        assert_eq!(finalized.file_id, 1);
        let written = std::fs::read(&finalized.part_path).unwrap();
        assert_eq!(written, content);
    }

    #[tokio::test]
    async fn test_out_of_order_blocks_reassemble_correctly() {
        let dir = TempDir::new().unwrap();
        let (tx, rx) = mpsc::channel(8);
        let (finalized_tx, mut finalized_rx) = mpsc::channel(8);

        let content = b"ABCDEFGHIJKLMNOP".to_vec();
        let (first, second) = content.split_at(8);
        tx.send(AssemblerMessage::Plan(plan(2, "ooo.bin", &content)))
            .await
            .unwrap();
        // second half arrives first
        tx.send(AssemblerMessage::Block {
            file_id: 2,
            file_offset: 8,
            bytes: second.to_vec(),
        })
        .await
        .unwrap();
        tx.send(AssemblerMessage::Block {
            file_id: 2,
            file_offset: 0,
            bytes: first.to_vec(),
        })
        .await
        .unwrap();
        drop(tx);

        let outcome = run_assembler(dir.path().to_path_buf(), true, TEST_WRITE_TIMEOUT, TEST_MAX_CONCURRENT_FILES, rx, finalized_tx).await;
        assert!(outcome.failures.is_empty());
        let finalized = finalized_rx.recv().await.unwrap();
        let written = std::fs::read(&finalized.part_path).unwrap();
        assert_eq!(written, content);
    }

    #[tokio::test]
    async fn test_zero_block_file_finalizes_without_blocks() {
        let dir = TempDir::new().unwrap();
        let (tx, rx) = mpsc::channel(8);
        let (finalized_tx, mut finalized_rx) = mpsc::channel(8);

        tx.send(AssemblerMessage::Plan(plan(3, "empty.txt", b"")))
            .await
            .unwrap();
        drop(tx);

        let outcome = run_assembler(dir.path().to_path_buf(), true, TEST_WRITE_TIMEOUT, TEST_MAX_CONCURRENT_FILES, rx, finalized_tx).await;
        assert!(outcome.failures.is_empty());
        assert!(finalized_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_hash_mismatch_is_recorded_as_failure_and_part_is_deleted() {
        let dir = TempDir::new().unwrap();
        let (tx, rx) = mpsc::channel(8);
        let (finalized_tx, mut finalized_rx) = mpsc::channel(8);

        let mut p = plan(4, "bad.bin", b"expected content");
        p.expected_hash = ContentHash::of(b"something else entirely");
        tx.send(AssemblerMessage::Plan(p)).await.unwrap();
        tx.send(AssemblerMessage::Block {
            file_id: 4,
            file_offset: 0,
            bytes: b"expected content".to_vec(),
        })
        .await
        .unwrap();
        drop(tx);

        let outcome = run_assembler(dir.path().to_path_buf(), true, TEST_WRITE_TIMEOUT, TEST_MAX_CONCURRENT_FILES, rx, finalized_tx).await;
        assert_eq!(outcome.failures.len(), 1);
        assert!(finalized_rx.try_recv().is_err());
        assert!(!dir.path().join("bad.bin.part").exists());
    }

    #[tokio::test]
    async fn test_block_failed_message_deletes_part_file() {
        let dir = TempDir::new().unwrap();
        let (tx, rx) = mpsc::channel(8);
        let (finalized_tx, _finalized_rx) = mpsc::channel(8);

        tx.send(AssemblerMessage::Plan(plan(6, "partial.bin", b"0123456789")))
            .await
            .unwrap();
        tx.send(AssemblerMessage::BlockFailed {
            file_id: 6,
            reason: "decompress failed".into(),
        })
        .await
        .unwrap();
        drop(tx);

        let outcome = run_assembler(dir.path().to_path_buf(), true, TEST_WRITE_TIMEOUT, TEST_MAX_CONCURRENT_FILES, rx, finalized_tx).await;
        assert_eq!(outcome.failures.len(), 1);
        assert!(!dir.path().join("partial.bin.part").exists());
    }

    #[tokio::test]
    async fn test_existing_file_skipped_without_overwrite() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("already.txt"), b"old").unwrap();
        let (tx, rx) = mpsc::channel(8);
        let (finalized_tx, _finalized_rx) = mpsc::channel(8);

        tx.send(AssemblerMessage::Plan(plan(5, "already.txt", b"new")))
            .await
            .unwrap();
        drop(tx);

        let outcome = run_assembler(dir.path().to_path_buf(), false, TEST_WRITE_TIMEOUT, TEST_MAX_CONCURRENT_FILES, rx, finalized_tx).await;
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.files_skipped, 1);
    }

    #[tokio::test]
    async fn test_reorder_buffer_overflow_aborts_file() {
        let dir = TempDir::new().unwrap();
        let (tx, rx) = mpsc::channel(common::MAX_REORDER_BUFFER_BLOCKS + 8);
        let (finalized_tx, _finalized_rx) = mpsc::channel(8);

        // One block per offset, sized so the whole file never completes;
        // all but the first offset land in the reorder buffer, which is
        // capped at `MAX_REORDER_BUFFER_BLOCKS`.
        let total_blocks = common::MAX_REORDER_BUFFER_BLOCKS + 2;
        let content = vec![0u8; total_blocks + 1];
        tx.send(AssemblerMessage::Plan(plan(7, "overflow.bin", &content)))
            .await
            .unwrap();
        // Never send offset 0, so nothing drains the buffer.
        for offset in 1..=total_blocks as u64 {
            tx.send(AssemblerMessage::Block {
                file_id: 7,
                file_offset: offset,
                bytes: vec![0u8; 1],
            })
            .await
            .unwrap();
        }
        drop(tx);

        let outcome = run_assembler(dir.path().to_path_buf(), true, TEST_WRITE_TIMEOUT, TEST_MAX_CONCURRENT_FILES, rx, finalized_tx).await;
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].reason.contains("reorder buffer"));
        assert!(!dir.path().join("overflow.bin.part").exists());
    }

    /// Spec §4.2: at most `max_concurrent_files` files are ever in flight.
    /// Sends plans for twice the cap, all before any blocks, then blocks for
    /// every file in arbitrary order; a file queued past the cap must still
    /// reassemble correctly once an earlier file frees its slot.
    #[tokio::test]
    async fn test_plans_beyond_cap_are_queued_and_admitted_in_turn() {
        const CAP: usize = 2;
        let dir = TempDir::new().unwrap();
        let (tx, rx) = mpsc::channel(32);
        let (finalized_tx, mut finalized_rx) = mpsc::channel(32);

        let contents: Vec<Vec<u8>> = (0..4).map(|i| format!("file-{i}-content").into_bytes()).collect();
        for (i, content) in contents.iter().enumerate() {
            tx.send(AssemblerMessage::Plan(plan(i as u64, &format!("f{i}.txt"), content)))
                .await
                .unwrap();
        }
        // Only the first CAP plans should have a `.part` file yet; the rest
        // are queued with no file handle open at all.
        for (i, content) in contents.iter().enumerate() {
            tx.send(AssemblerMessage::Block {
                file_id: i as u64,
                file_offset: 0,
                bytes: content.clone(),
            })
            .await
            .unwrap();
        }
        drop(tx);

        let outcome = run_assembler(dir.path().to_path_buf(), true, TEST_WRITE_TIMEOUT, CAP, rx, finalized_tx).await;
        assert!(outcome.failures.is_empty());

        let mut seen = HashMap::new();
        while let Some(finalized) = finalized_rx.recv().await {
            let written = std::fs::read(&finalized.part_path).unwrap();
            seen.insert(finalized.file_id, written);
        }
        assert_eq!(seen.len(), contents.len());
        for (i, content) in contents.iter().enumerate() {
            assert_eq!(&seen[&(i as u64)], content);
        }
    }
}
