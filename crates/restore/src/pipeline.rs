//! Top-level orchestration: wires the seven stages together with bounded
//! `mpsc` channels and folds every stage's partial outcome into one
//! [`RestoreSummary`]. This is the only place that knows the full shape of
//! the pipeline diagram; every other module only knows its immediate
//! neighbors' message types.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use backend::Backend;
use catalog::{Catalog, RestoreRequest};

use crate::assembler::run_assembler;
use crate::block_source::run_block_source;
use crate::config::RestoreConfig;
use crate::context::Context;
use crate::decompressor::run_decompressor;
use crate::decryptor::run_decryptor;
use crate::downloader::{run_downloader, DownloaderConfig};
use crate::manager::{run_manager, ManagerHandles};
use crate::messages::{AssemblerMessage, DecompressTask, DownloadRequest, DownloadedVolume, ManagerMessage};
use crate::types::RestoreSummary;
use crate::verifier::run_verifier;

/// Runs one restore end to end: plans files from the catalog, downloads,
/// decrypts and decompresses whatever volumes the plan touches, reassembles
/// and verifies file content, then applies metadata. Cancels (via
/// `ctx.cancel`) and unwinds cleanly if any globally-fatal error occurs, or
/// if `config.strict` is set and a per-file error is seen.
#[tracing::instrument(skip(ctx, catalog, backend, config))]
pub async fn run_restore(
    ctx: Context,
    catalog: Arc<dyn Catalog>,
    backend: Arc<dyn Backend>,
    request: RestoreRequest,
    output_root: PathBuf,
    overwrite: bool,
    config: RestoreConfig,
) -> RestoreSummary {
    let started = Instant::now();

    let (assembler_tx, assembler_rx) = tokio::sync::mpsc::channel::<AssemblerMessage>(256);
    let (manager_tx, manager_rx) = tokio::sync::mpsc::channel::<ManagerMessage>(256);
    let (download_tx, download_rx) = tokio::sync::mpsc::channel::<DownloadRequest>(64);
    let (decrypt_tx, decrypt_rx) = tokio::sync::mpsc::channel::<DownloadedVolume>(16);
    let (decompress_tx, decompress_rx) = tokio::sync::mpsc::channel::<DecompressTask>(256);
    let (finalized_tx, finalized_rx) = tokio::sync::mpsc::channel(64);

    let block_source_task = tokio::spawn(run_block_source(
        ctx.clone(),
        catalog.clone(),
        request,
        config.strict,
        output_root.clone(),
        overwrite,
        assembler_tx.clone(),
        manager_tx.clone(),
    ));

    let assembler_task = tokio::spawn(run_assembler(
        output_root,
        overwrite,
        config.write_timeout,
        config.max_concurrent_files,
        assembler_rx,
        finalized_tx,
    ));

    let verifier_task = tokio::spawn(run_verifier(ctx.clone(), finalized_rx));

    let manager_handles = ManagerHandles {
        rx: manager_rx,
        download_tx,
        decompress_tx,
        assembler_tx: assembler_tx.clone(),
    };
    let manager_task = tokio::spawn(run_manager(
        ctx.clone(),
        config.cache_capacity_entries,
        config.cache_capacity_bytes,
        manager_handles,
    ));

    let downloader_config = DownloaderConfig {
        retry_base: config.retry_base,
        retry_cap: config.retry_cap,
        retry_max_attempts: config.retry_max_attempts,
        download_timeout: config.download_timeout,
    };
    let downloader_task = tokio::spawn(run_downloader(
        ctx.clone(),
        catalog.clone(),
        backend,
        config.max_concurrent_downloads,
        downloader_config,
        download_rx,
        decrypt_tx,
        manager_tx.clone(),
    ));

    let decryptor_task = tokio::spawn(run_decryptor(
        ctx.clone(),
        config.max_concurrent_downloads,
        config.decrypt_timeout,
        config.expected_blocksize,
        decrypt_rx,
        manager_tx.clone(),
    ));

    let decompressor_task = tokio::spawn(run_decompressor(
        ctx.clone(),
        config.max_decompress_workers,
        config.decompress_timeout,
        decompress_rx,
        assembler_tx.clone(),
        manager_tx.clone(),
    ));

    // Drop our own handles to the fan-out senders; each stage above holds
    // the clone it needs. Once every producer of a channel finishes, its
    // receiver observes `None` and that stage winds down in turn.
    drop(assembler_tx);
    drop(manager_tx);

    let block_source_outcome = block_source_task.await.unwrap_or_default();
    let assembler_outcome = assembler_task.await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "assembler task panicked");
        crate::assembler::AssemblerOutcome { bytes_written: 0, files_skipped: 0, failures: Vec::new() }
    });
    let plan_stats = manager_task.await.unwrap_or_default();
    let volumes_downloaded = downloader_task.await.unwrap_or(0);
    decryptor_task.await.ok();
    decompressor_task.await.ok();
    let verifier_outcome = verifier_task.await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "verifier task panicked");
        crate::verifier::VerifierOutcome {
            files_restored: 0,
            hardlinks_created: 0,
            metadata_warnings: 0,
            failures: Vec::new(),
        }
    });

    info!(
        cache_hits = plan_stats.cache_hits,
        cache_misses = plan_stats.cache_misses,
        evictions = plan_stats.evictions,
        "restore plan stats"
    );

    let encryption_stats = ctx.codecs.encryption_stats().await;
    info!(
        encrypted_volumes = encryption_stats.encrypted_segments,
        unencrypted_volumes = encryption_stats.unencrypted_segments,
        encryption_ratio = encryption_stats.encryption_ratio(),
        "restore encryption stats"
    );

    let mut failures = block_source_outcome.failures;
    failures.extend(assembler_outcome.failures);
    failures.extend(verifier_outcome.failures);

    RestoreSummary {
        files_restored: verifier_outcome.files_restored,
        files_failed: failures.len() as u64,
        files_skipped: block_source_outcome.files_skipped + assembler_outcome.files_skipped,
        bytes_written: assembler_outcome.bytes_written,
        volumes_downloaded,
        hardlinks_created: verifier_outcome.hardlinks_created,
        metadata_warnings: verifier_outcome.metadata_warnings,
        duration: started.elapsed(),
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::memory::MemoryBackend;
    use catalog::MemCatalog;
    use common::*;
    use encryption::KeyManager;
    use volume::VolumeBuilder;

    fn test_ctx() -> Context {
        let codecs = crate::codec::CodecRegistry::new(KeyManager::new([7u8; 32]));
        Context::new("backup-pipeline-test", codecs).unwrap()
    }

    /// Builds a one-volume, one-file catalog + backend fixture and restores
    /// it end to end, exercising every stage at once.
    #[tokio::test]
    async fn test_end_to_end_single_file_restore() {
        let content = b"the quick brown fox jumps over the lazy dog";
        let mut builder = VolumeBuilder::new(4096);
        let block_hash = builder.add_block(content);
        let volume_tmp = tempfile::NamedTempFile::new().unwrap();
        builder.finish(volume_tmp.path()).unwrap();
        let volume_bytes = std::fs::read(volume_tmp.path()).unwrap();

        let volume_name = "bk-b-00000000-0000-0000-0000-000000000001-2026-01-01T00:00:00Z.none";
        let backend = MemoryBackend::new();
        backend.put(volume_name, volume_bytes.clone()).await.unwrap();
        let backend: Arc<dyn Backend> = Arc::new(backend);

        let volume = RemoteVolume {
            id: 1,
            name: volume_name.into(),
            size: volume_bytes.len() as u64,
            content_hash: ContentHash::of(&volume_bytes),
            kind: VolumeKind::Blocks,
            state: VolumeState::Verified,
            verification_count: 0,
        };
        let block = Block { id: 1, hash: block_hash, size: content.len() as u32, volume_id: 1 };
        let blockset = Blockset { id: 1, length: content.len() as u64, fullhash: ContentHash::of(content) };
        let entry = BlocksetEntry { blockset_id: 1, index: 0, block_id: 1 };
        let file = CatalogFile { id: 1, path: "greeting.txt".into(), blockset_id: 1, metadata_id: 1, hardlink_target_id: None };
        let fileset = Fileset { id: 1, timestamp: 1_700_000_000, volume_id: 1 };

        let catalog: Arc<dyn Catalog> = Arc::new(
            MemCatalog::builder()
                .add_volume(volume)
                .add_block(block)
                .add_blockset(blockset, vec![entry])
                .add_file_metadata(1, FileMetadata::default())
                .add_file(file)
                .add_fileset(fileset, vec![1])
                .build(),
        );

        let out_dir = tempfile::TempDir::new().unwrap();
        let summary = run_restore(
            test_ctx(),
            catalog,
            backend,
            RestoreRequest::default(),
            out_dir.path().to_path_buf(),
            false,
            RestoreConfig { max_decompress_workers: 2, ..Default::default() },
        )
        .await;

        assert_eq!(summary.files_restored, 1);
        assert_eq!(summary.files_failed, 0);
        assert_eq!(summary.exit_code(), 0);
        let written = std::fs::read(out_dir.path().join("greeting.txt")).unwrap();
        assert_eq!(written, content);
    }

    /// Spec §8: re-running restore after a clean completion, without
    /// `--overwrite`, must be a no-op — no downloads, no writes — and must
    /// still succeed (not report the skipped file as a failure).
    #[tokio::test]
    async fn test_rerun_after_clean_completion_is_a_successful_noop() {
        let content = b"idempotent restore contents";
        let mut builder = VolumeBuilder::new(4096);
        let block_hash = builder.add_block(content);
        let volume_tmp = tempfile::NamedTempFile::new().unwrap();
        builder.finish(volume_tmp.path()).unwrap();
        let volume_bytes = std::fs::read(volume_tmp.path()).unwrap();

        let volume_name = "bk-b-00000000-0000-0000-0000-000000000002-2026-01-01T00:00:00Z.none";
        let backend = MemoryBackend::new();
        backend.put(volume_name, volume_bytes.clone()).await.unwrap();
        let backend: Arc<dyn Backend> = Arc::new(backend);

        let volume = RemoteVolume {
            id: 1,
            name: volume_name.into(),
            size: volume_bytes.len() as u64,
            content_hash: ContentHash::of(&volume_bytes),
            kind: VolumeKind::Blocks,
            state: VolumeState::Verified,
            verification_count: 0,
        };
        let block = Block { id: 1, hash: block_hash, size: content.len() as u32, volume_id: 1 };
        let blockset = Blockset { id: 1, length: content.len() as u64, fullhash: ContentHash::of(content) };
        let entry = BlocksetEntry { blockset_id: 1, index: 0, block_id: 1 };
        let file = CatalogFile { id: 1, path: "idempotent.txt".into(), blockset_id: 1, metadata_id: 1, hardlink_target_id: None };
        let fileset = Fileset { id: 1, timestamp: 1_700_000_000, volume_id: 1 };

        let catalog: Arc<dyn Catalog> = Arc::new(
            MemCatalog::builder()
                .add_volume(volume)
                .add_block(block)
                .add_blockset(blockset, vec![entry])
                .add_file_metadata(1, FileMetadata::default())
                .add_file(file)
                .add_fileset(fileset, vec![1])
                .build(),
        );

        let out_dir = tempfile::TempDir::new().unwrap();

        let first = run_restore(
            test_ctx(),
            catalog.clone(),
            backend.clone(),
            RestoreRequest::default(),
            out_dir.path().to_path_buf(),
            false,
            RestoreConfig { max_decompress_workers: 2, ..Default::default() },
        )
        .await;
        assert_eq!(first.files_restored, 1);
        assert_eq!(first.volumes_downloaded, 1);
        assert_eq!(first.exit_code(), 0);

        let second = run_restore(
            test_ctx(),
            catalog,
            backend,
            RestoreRequest::default(),
            out_dir.path().to_path_buf(),
            false,
            RestoreConfig { max_decompress_workers: 2, ..Default::default() },
        )
        .await;

        assert_eq!(second.files_restored, 0);
        assert_eq!(second.files_failed, 0);
        assert_eq!(second.files_skipped, 1);
        assert_eq!(second.volumes_downloaded, 0);
        assert_eq!(second.exit_code(), 0);
    }
}
