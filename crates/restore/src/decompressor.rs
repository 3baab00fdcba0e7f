//! Block Decompressor: reads a block's stored bytes out of an open volume,
//! decompresses them, verifies the result against the block's content
//! hash, and hands the plaintext block to the File Assembler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use common::ContentHash;

use crate::codec::CodecRegistry;
use crate::context::Context;
use crate::messages::{AssemblerMessage, DecompressTask, ManagerMessage};

/// Spawns `worker_count` workers draining `rx` until it closes, or until
/// `ctx.cancel` fires. Each task that finishes the volume's last planned
/// request (`evict_hint`) notifies the Manager via `ManagerMessage::Evict`
/// once its `Arc<VolumeReader>` clone is dropped. `decompress_timeout`
/// bounds each block's decompress-and-verify work; a timeout is treated as
/// a block failure, same as a decompression or hash error.
#[tracing::instrument(skip(ctx, rx, assembler_tx, manager_tx))]
pub async fn run_decompressor(
    ctx: Context,
    worker_count: usize,
    decompress_timeout: Duration,
    rx: mpsc::Receiver<DecompressTask>,
    assembler_tx: mpsc::Sender<AssemblerMessage>,
    manager_tx: mpsc::Sender<ManagerMessage>,
) {
    let rx = Arc::new(Mutex::new(rx));
    let mut tasks = Vec::with_capacity(worker_count.max(1));

    for _ in 0..worker_count.max(1) {
        let ctx = ctx.clone();
        let codecs = ctx.codecs.clone();
        let rx = rx.clone();
        let assembler_tx = assembler_tx.clone();
        let manager_tx = manager_tx.clone();

        tasks.push(tokio::spawn(async move {
            loop {
                let task = {
                    let mut guard = rx.lock().await;
                    guard.recv().await
                };
                let Some(task) = task else { break };

                let volume_id = task.request.volume_id;
                let evict_hint = task.evict_hint;
                let file_id = task.request.file_id;
                let file_offset = task.request.file_offset;

                let result = tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => {
                        info!("decompressor worker stopping: restore cancelled");
                        break;
                    }
                    result = tokio::time::timeout(decompress_timeout, async { process(&codecs, &task) }) => result,
                };

                let msg = match result {
                    Ok(Ok(bytes)) => AssemblerMessage::Block { file_id, file_offset, bytes },
                    Ok(Err(reason)) => {
                        warn!(volume_id, file_id, reason = %reason, "block decompress/verify failed");
                        AssemblerMessage::BlockFailed { file_id, reason }
                    }
                    Err(_) => {
                        warn!(volume_id, file_id, "block decompress timed out");
                        AssemblerMessage::BlockFailed {
                            file_id,
                            reason: format!("decompress timed out after {decompress_timeout:?}"),
                        }
                    }
                };

                // Drop the reader clone before notifying eviction so the
                // Manager's refcount check sees this worker as done.
                drop(task.reader);

                if assembler_tx.send(msg).await.is_err() {
                    warn!("assembler channel closed, stopping decompressor worker");
                    break;
                }
                if evict_hint {
                    let _ = manager_tx.send(ManagerMessage::Evict(volume_id)).await;
                }
            }
        }));
    }

    for task in tasks {
        let _ = task.await;
    }
}

fn process(codecs: &CodecRegistry, task: &DecompressTask) -> Result<Vec<u8>, String> {
    let stored = task
        .reader
        .read_block(&task.request.block_hash)
        .map_err(|e| format!("block not found in volume: {e}"))?;

    let plaintext = codecs
        .decompress_block(&task.compression, &stored)
        .map_err(|e| format!("decompression failed: {e}"))?;

    let actual_hash = ContentHash::of(&plaintext);
    if actual_hash != task.request.block_hash {
        return Err(format!(
            "block integrity check failed: expected {}, got {}",
            task.request.block_hash, actual_hash
        ));
    }
    if plaintext.len() as u32 != task.request.block_size {
        debug!(
            expected = task.request.block_size,
            actual = plaintext.len(),
            "block size differs from catalog row"
        );
    }

    Ok(plaintext)
}
