//! Volume Manager: the cache coordinator. Owns the volume cache and the
//! in-flight-download table; a single task recv-loop over `ManagerMessage`
//! confines all the mutable state so nothing here needs a lock, per §9's
//! "coalesce the two producers into a single typed enum channel"
//! resolution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::messages::{AssemblerMessage, DecompressTask, DownloadRequest, ManagerMessage};
use crate::types::{CacheEntry, InFlightEntry, RestorePlanStats};

pub struct ManagerHandles {
    pub rx: mpsc::Receiver<ManagerMessage>,
    pub download_tx: mpsc::Sender<DownloadRequest>,
    pub decompress_tx: mpsc::Sender<DecompressTask>,
    pub assembler_tx: mpsc::Sender<AssemblerMessage>,
}

#[tracing::instrument(skip(ctx, handles))]
pub async fn run_manager(
    ctx: Context,
    cache_capacity_entries: usize,
    cache_capacity_bytes: u64,
    mut handles: ManagerHandles,
) -> RestorePlanStats {
    let mut cache: HashMap<u64, CacheEntry> = HashMap::new();
    let mut in_flight: HashMap<u64, InFlightEntry> = HashMap::new();
    let mut stats = RestorePlanStats::default();

    loop {
        let msg = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                info!("manager stopping: restore cancelled");
                break;
            }
            received = handles.rx.recv() => match received {
                Some(msg) => msg,
                None => {
                    info!("manager channel closed, shutting down");
                    break;
                }
            },
        };

        match msg {
            ManagerMessage::Request(req) => {
                if let Some(entry) = cache.get_mut(&req.volume_id) {
                    stats.cache_hits += 1;
                    entry.last_use = Instant::now();
                    if req.evict_hint {
                        entry.pending_eviction = true;
                    }
                    let task = DecompressTask {
                        evict_hint: req.evict_hint,
                        compression: entry.compression.clone(),
                        reader: entry.reader.clone(),
                        request: req,
                    };
                    dispatch_decompress(&handles.decompress_tx, task).await;
                } else if let Some(entry) = in_flight.get_mut(&req.volume_id) {
                    entry.waiters.push(req);
                } else {
                    stats.cache_misses += 1;
                    let volume_id = req.volume_id;
                    in_flight.insert(volume_id, InFlightEntry { waiters: vec![req] });
                    if handles
                        .download_tx
                        .send(DownloadRequest { volume_id })
                        .await
                        .is_err()
                    {
                        warn!(volume_id, "downloader channel closed, dropping request");
                    }
                }
            }

            ManagerMessage::Ready(Ok(ready)) => {
                let Some(waiting) = in_flight.remove(&ready.volume_id) else {
                    debug!(volume_id = ready.volume_id, "volume ready with no waiters");
                    continue;
                };

                let size_bytes = std::fs::metadata(ready.blob.path())
                    .map(|m| m.len())
                    .unwrap_or(0);

                evict_to_fit(&mut cache, cache_capacity_entries, cache_capacity_bytes, size_bytes, &mut stats);

                cache.insert(
                    ready.volume_id,
                    CacheEntry {
                        blob: ready.blob,
                        reader: ready.reader.clone(),
                        compression: ready.compression.clone(),
                        size_bytes,
                        last_use: Instant::now(),
                        pending_eviction: false,
                    },
                );

                for req in waiting.waiters {
                    if req.evict_hint {
                        if let Some(entry) = cache.get_mut(&ready.volume_id) {
                            entry.pending_eviction = true;
                        }
                    }
                    let task = DecompressTask {
                        evict_hint: req.evict_hint,
                        compression: ready.compression.clone(),
                        reader: ready.reader.clone(),
                        request: req,
                    };
                    dispatch_decompress(&handles.decompress_tx, task).await;
                }
            }

            ManagerMessage::Ready(Err(failure)) => {
                let Some(waiting) = in_flight.remove(&failure.volume_id) else {
                    continue;
                };
                warn!(volume_id = failure.volume_id, reason = %failure.reason, "volume unavailable, failing waiters");
                for req in waiting.waiters {
                    let _ = handles
                        .assembler_tx
                        .send(AssemblerMessage::BlockFailed {
                            file_id: req.file_id,
                            reason: failure.reason.clone(),
                        })
                        .await;
                }
            }

            ManagerMessage::Evict(volume_id) => {
                try_evict_one(&mut cache, volume_id, &mut stats);
            }
        }
    }

    stats
}

async fn dispatch_decompress(tx: &mpsc::Sender<DecompressTask>, task: DecompressTask) {
    if tx.send(task).await.is_err() {
        warn!("decompressor channel closed, dropping task");
    }
}

fn try_evict_one(cache: &mut HashMap<u64, CacheEntry>, volume_id: u64, stats: &mut RestorePlanStats) {
    if let Some(entry) = cache.get(&volume_id) {
        if entry.pending_eviction && entry.refcount() == 0 {
            cache.remove(&volume_id);
            stats.evictions += 1;
            debug!(volume_id, "evicted volume from cache");
        }
    }
}

/// Evicts LRU-ordered, refcount-zero, non-pinned entries until `incoming`
/// bytes fit within the configured entry/byte caps. Entries still in use
/// (refcount > 0) are never evicted out from under a live reader.
fn evict_to_fit(
    cache: &mut HashMap<u64, CacheEntry>,
    capacity_entries: usize,
    capacity_bytes: u64,
    incoming: u64,
    stats: &mut RestorePlanStats,
) {
    let fits = |cache: &HashMap<u64, CacheEntry>| {
        let total_bytes: u64 = cache.values().map(|e| e.size_bytes).sum();
        cache.len() < capacity_entries && total_bytes + incoming <= capacity_bytes
    };

    while !fits(cache) {
        let victim = cache
            .iter()
            .filter(|(_, e)| e.refcount() == 0)
            .min_by_key(|(_, e)| e.last_use)
            .map(|(id, _)| *id);

        match victim {
            Some(id) => {
                cache.remove(&id);
                stats.evictions += 1;
                debug!(volume_id = id, "evicted volume to make room");
            }
            None => {
                warn!("cache over capacity but every entry is in use, deferring eviction");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::BlockRequest;
    use encryption::KeyManager;

    fn test_ctx() -> Context {
        let codecs = crate::codec::CodecRegistry::new(KeyManager::new([3u8; 32]));
        Context::new("manager-test", codecs).unwrap()
    }

    fn block_request(volume_id: u64, evict_hint: bool) -> BlockRequest {
        BlockRequest {
            volume_id,
            block_id: 1,
            block_hash: common::ContentHash::from_bytes([1u8; 32]),
            block_size: 10,
            file_id: 1,
            file_offset: 0,
            evict_hint,
        }
    }

    #[tokio::test]
    async fn test_at_most_one_download_per_volume() {
        let (mgr_tx, rx) = mpsc::channel(32);
        let (download_tx, mut download_rx) = mpsc::channel(32);
        let (decompress_tx, _decompress_rx) = mpsc::channel(32);
        let (assembler_tx, _assembler_rx) = mpsc::channel(32);

        let handles = ManagerHandles { rx, download_tx, decompress_tx, assembler_tx };
        let task = tokio::spawn(run_manager(test_ctx(), 4, 1024 * 1024, handles));

        for _ in 0..5 {
            mgr_tx
                .send(ManagerMessage::Request(block_request(7, false)))
                .await
                .unwrap();
        }
        drop(mgr_tx);
        let _ = task.await.unwrap();

        let mut requests = Vec::new();
        while let Ok(r) = download_rx.try_recv() {
            requests.push(r);
        }
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].volume_id, 7);
    }

    #[tokio::test]
    async fn test_volume_failure_fails_all_waiters() {
        let (mgr_tx, rx) = mpsc::channel(32);
        let (download_tx, _download_rx) = mpsc::channel(32);
        let (decompress_tx, _decompress_rx) = mpsc::channel(32);
        let (assembler_tx, mut assembler_rx) = mpsc::channel(32);

        let handles = ManagerHandles { rx, download_tx, decompress_tx, assembler_tx };
        let task = tokio::spawn(run_manager(test_ctx(), 4, 1024 * 1024, handles));

        mgr_tx.send(ManagerMessage::Request(block_request(9, false))).await.unwrap();
        mgr_tx.send(ManagerMessage::Request(block_request(9, false))).await.unwrap();
        mgr_tx
            .send(ManagerMessage::Ready(Err(crate::messages::VolumeFailure {
                volume_id: 9,
                reason: "timed out".into(),
            })))
            .await
            .unwrap();
        drop(mgr_tx);
        let _ = task.await.unwrap();

        let mut failed = 0;
        while let Ok(msg) = assembler_rx.try_recv() {
            if matches!(msg, AssemblerMessage::BlockFailed { .. }) {
                failed += 1;
            }
        }
        assert_eq!(failed, 2);
    }
}
