//! Volume Decryptor: turns a downloaded (possibly encrypted) volume blob
//! into an open, random-access plaintext [`VolumeReader`] backed by a temp
//! file, and hands the result to the Volume Manager.

use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use volume::VolumeReader;

use crate::codec::{split_envelope, CodecRegistry};
use crate::context::Context;
use crate::messages::{DownloadedVolume, ManagerMessage, ReadyVolume, VolumeFailure};
use crate::types::VolumeBlob;

/// Spawns `worker_count` workers draining `rx` until it closes, or until
/// `ctx.cancel` fires. Each decrypted (or passthrough) volume is
/// materialized as a temp file, opened with [`VolumeReader`], and checked
/// against `expected_blocksize` before being reported ready.
/// `decrypt_timeout` bounds the whole decrypt-and-open sequence for one
/// volume; a timeout is reported as a volume failure.
#[tracing::instrument(skip(ctx, rx, manager_tx))]
pub async fn run_decryptor(
    ctx: Context,
    worker_count: usize,
    decrypt_timeout: Duration,
    expected_blocksize: u32,
    rx: mpsc::Receiver<DownloadedVolume>,
    manager_tx: mpsc::Sender<ManagerMessage>,
) {
    let rx = Arc::new(Mutex::new(rx));
    let mut tasks = Vec::with_capacity(worker_count.max(1));

    for _ in 0..worker_count.max(1) {
        let ctx = ctx.clone();
        let rx = rx.clone();
        let manager_tx = manager_tx.clone();

        tasks.push(tokio::spawn(async move {
            loop {
                let item = {
                    let mut guard = rx.lock().await;
                    guard.recv().await
                };
                let Some(downloaded) = item else { break };

                let volume_id = downloaded.volume_id;
                let outcome = tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => {
                        info!("decryptor worker stopping: restore cancelled");
                        break;
                    }
                    result = tokio::time::timeout(
                        decrypt_timeout,
                        decrypt_one(&ctx.codecs, ctx.temp_dir(), expected_blocksize, downloaded),
                    ) => match result {
                        Ok(inner) => inner,
                        Err(_) => Err(format!("decrypt/open timed out after {decrypt_timeout:?}")),
                    },
                };
                let msg = match outcome {
                    Ok(ready) => {
                        debug!(volume_id, "volume decrypted and opened");
                        ManagerMessage::Ready(Ok(ready))
                    }
                    Err(reason) => {
                        warn!(volume_id, reason = %reason, "volume decrypt/open failed");
                        ManagerMessage::Ready(Err(VolumeFailure { volume_id, reason }))
                    }
                };
                if manager_tx.send(msg).await.is_err() {
                    warn!("manager channel closed, stopping decryptor worker");
                    break;
                }
            }
        }));
    }

    for task in tasks {
        let _ = task.await;
    }
}

async fn decrypt_one(
    codecs: &CodecRegistry,
    temp_dir: &std::path::Path,
    expected_blocksize: u32,
    downloaded: DownloadedVolume,
) -> Result<ReadyVolume, String> {
    let plaintext = if downloaded.encryption.is_some() {
        let (metadata, ciphertext) = split_envelope(&downloaded.bytes)
            .ok_or_else(|| "filename carries an encryption suffix but no envelope was found".to_string())?;
        codecs
            .decrypt_volume(ciphertext, &metadata)
            .await
            .map_err(|e| e.to_string())?
    } else {
        codecs.record_unencrypted_volume().await;
        downloaded.bytes
    };

    let mut file = NamedTempFile::new_in(temp_dir).map_err(|e| format!("temp file create failed: {e}"))?;
    use std::io::Write;
    file.write_all(&plaintext).map_err(|e| format!("temp file write failed: {e}"))?;
    file.flush().map_err(|e| format!("temp file flush failed: {e}"))?;

    let reader = VolumeReader::open(file.path()).map_err(|e| format!("volume open failed: {e}"))?;

    if !reader.is_compatible(expected_blocksize) {
        return Err(format!(
            "volume manifest incompatible: expected blocksize {}, got {}",
            expected_blocksize,
            reader.manifest().blocksize
        ));
    }

    Ok(ReadyVolume {
        volume_id: downloaded.volume_id,
        blob: Arc::new(VolumeBlob::new(file)),
        reader: Arc::new(reader),
        compression: downloaded.compression,
    })
}
