//! Volume Downloader: a pool of workers fetching volume objects from the
//! backend, verifying their size and content hash, and retrying transient
//! backend errors with exponential backoff before giving up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use backend::Backend;
use catalog::Catalog;
use common::ContentHash;
use volume::VolumeFilename;

use crate::context::Context;
use crate::messages::{DownloadRequest, DownloadedVolume, ManagerMessage, VolumeFailure};

#[derive(Debug, Clone, Copy)]
pub struct DownloaderConfig {
    pub retry_base: Duration,
    pub retry_cap: Duration,
    pub retry_max_attempts: u32,
    pub download_timeout: Duration,
}

/// Spawns `worker_count` concurrent download workers sharing one request
/// queue (implemented as an `Arc<Mutex<Receiver>>>` since `mpsc::Receiver`
/// is single-consumer) and runs until the queue is drained and closed.
/// Returns the number of volumes successfully downloaded.
#[tracing::instrument(skip(ctx, catalog, backend, rx, decrypt_tx, manager_tx))]
pub async fn run_downloader(
    ctx: Context,
    catalog: Arc<dyn Catalog>,
    backend: Arc<dyn Backend>,
    worker_count: usize,
    config: DownloaderConfig,
    rx: mpsc::Receiver<DownloadRequest>,
    decrypt_tx: mpsc::Sender<DownloadedVolume>,
    manager_tx: mpsc::Sender<ManagerMessage>,
) -> u64 {
    let rx = Arc::new(Mutex::new(rx));
    let downloaded = Arc::new(AtomicU64::new(0));

    let mut tasks = Vec::with_capacity(worker_count.max(1));
    for worker_id in 0..worker_count.max(1) {
        let ctx = ctx.clone();
        let catalog = catalog.clone();
        let backend = backend.clone();
        let rx = rx.clone();
        let decrypt_tx = decrypt_tx.clone();
        let manager_tx = manager_tx.clone();
        let downloaded = downloaded.clone();

        tasks.push(tokio::spawn(async move {
            loop {
                if ctx.is_cancelled() {
                    break;
                }
                let request = {
                    let mut guard = rx.lock().await;
                    guard.recv().await
                };
                let Some(request) = request else {
                    break;
                };

                debug!(worker_id, volume_id = request.volume_id, "downloading volume");
                let outcome = tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => {
                        info!("downloader worker stopping: restore cancelled");
                        break;
                    }
                    result = fetch_with_retry(&ctx, &catalog, &backend, request.volume_id, &config) => result,
                };
                match outcome {
                    Ok(downloaded_volume) => {
                        downloaded.fetch_add(1, Ordering::Relaxed);
                        if decrypt_tx.send(downloaded_volume).await.is_err() {
                            warn!("decryptor channel closed, dropping downloaded volume");
                        }
                    }
                    Err(reason) => {
                        warn!(volume_id = request.volume_id, reason = %reason, "download failed permanently");
                        let _ = manager_tx
                            .send(ManagerMessage::Ready(Err(VolumeFailure {
                                volume_id: request.volume_id,
                                reason,
                            })))
                            .await;
                    }
                }
            }
        }));
    }

    for task in tasks {
        let _ = task.await;
    }

    info!(count = downloaded.load(Ordering::Relaxed), "downloader pool finished");
    downloaded.load(Ordering::Relaxed)
}

/// Fetches and verifies one volume, retrying transient backend errors with
/// exponential backoff (base/cap/max attempts from `config`). Integrity
/// failures (size or hash mismatch) and a malformed filename are not
/// retried — they indicate corrupt or misnamed data, not a flaky transfer.
async fn fetch_with_retry(
    ctx: &Context,
    catalog: &Arc<dyn Catalog>,
    backend: &Arc<dyn Backend>,
    volume_id: u64,
    config: &DownloaderConfig,
) -> Result<DownloadedVolume, String> {
    let volume = catalog
        .get_volume(volume_id)
        .await
        .map_err(|e| format!("catalog lookup failed: {e}"))?;

    let filename = VolumeFilename::parse(&volume.name)
        .map_err(|e| format!("malformed volume filename {:?}: {e}", volume.name))?;

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let fetch = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err("download cancelled".to_string()),
            result = tokio::time::timeout(config.download_timeout, backend.get(&volume.name)) => result,
        };

        let bytes = match fetch {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) if e.is_transient() && attempt < config.retry_max_attempts => {
                backoff_sleep(config, attempt).await;
                continue;
            }
            Ok(Err(e)) => return Err(format!("backend error: {e}")),
            Err(_) if attempt < config.retry_max_attempts => {
                backoff_sleep(config, attempt).await;
                continue;
            }
            Err(_) => return Err("download timed out".to_string()),
        };

        if bytes.len() as u64 != volume.size {
            return Err(format!(
                "size mismatch: expected {} bytes, got {}",
                volume.size,
                bytes.len()
            ));
        }
        let actual_hash = ContentHash::of(&bytes);
        if actual_hash != volume.content_hash {
            return Err(format!(
                "content hash mismatch: expected {}, got {}",
                volume.content_hash, actual_hash
            ));
        }

        return Ok(DownloadedVolume {
            volume_id,
            bytes,
            compression: filename.compression.clone(),
            encryption: filename.encryption.clone(),
        });
    }
}

async fn backoff_sleep(config: &DownloaderConfig, attempt: u32) {
    let exp = config.retry_base.saturating_mul(1u32 << attempt.min(20));
    let delay = exp.min(config.retry_cap);
    tokio::time::sleep(delay).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::memory::MemoryBackend;
    use catalog::MemCatalog;
    use common::{RemoteVolume, VolumeKind, VolumeState};
    use encryption::KeyManager;

    fn test_ctx() -> Context {
        let codecs = crate::codec::CodecRegistry::new(KeyManager::new([6u8; 32]));
        Context::new("downloader-test", codecs).unwrap()
    }

    fn default_config() -> DownloaderConfig {
        DownloaderConfig {
            retry_base: Duration::from_millis(1),
            retry_cap: Duration::from_millis(5),
            retry_max_attempts: 3,
            download_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_fetch_verifies_hash_and_size() {
        let bytes = b"a whole volume container".to_vec();
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        backend.put("vol-1.zstd", bytes.clone()).await.unwrap();

        let volume = RemoteVolume {
            id: 1,
            name: "vol-1.zstd".into(),
            size: bytes.len() as u64,
            content_hash: ContentHash::of(&bytes),
            kind: VolumeKind::Blocks,
            state: VolumeState::Verified,
            verification_count: 0,
        };
        let catalog: Arc<dyn Catalog> = Arc::new(MemCatalog::builder().add_volume(volume).build());

        let result = fetch_with_retry(&test_ctx(), &catalog, &backend, 1, &default_config()).await;
        let downloaded = result.unwrap();
        assert_eq!(downloaded.bytes, bytes);
        assert_eq!(downloaded.compression, "zstd");
    }

    #[tokio::test]
    async fn test_fetch_rejects_size_mismatch() {
        let bytes = b"real content".to_vec();
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        backend.put("vol-2.lz4", bytes.clone()).await.unwrap();

        let volume = RemoteVolume {
            id: 2,
            name: "vol-2.lz4".into(),
            size: bytes.len() as u64 + 1,
            content_hash: ContentHash::of(&bytes),
            kind: VolumeKind::Blocks,
            state: VolumeState::Verified,
            verification_count: 0,
        };
        let catalog: Arc<dyn Catalog> = Arc::new(MemCatalog::builder().add_volume(volume).build());

        let err = fetch_with_retry(&test_ctx(), &catalog, &backend, 2, &default_config())
            .await
            .unwrap_err();
        assert!(err.contains("size mismatch"));
    }

    #[tokio::test]
    async fn test_transient_error_is_retried_then_succeeds() {
        let bytes = b"retry me please".to_vec();
        let mem = MemoryBackend::new();
        mem.put("vol-3.zstd", bytes.clone()).await.unwrap();
        mem.fail_next_gets("vol-3.zstd", 2).await;
        let backend: Arc<dyn Backend> = Arc::new(mem);

        let volume = RemoteVolume {
            id: 3,
            name: "vol-3.zstd".into(),
            size: bytes.len() as u64,
            content_hash: ContentHash::of(&bytes),
            kind: VolumeKind::Blocks,
            state: VolumeState::Verified,
            verification_count: 0,
        };
        let catalog: Arc<dyn Catalog> = Arc::new(MemCatalog::builder().add_volume(volume).build());

        let result = fetch_with_retry(&test_ctx(), &catalog, &backend, 3, &default_config()).await;
        assert!(result.is_ok());
    }
}
