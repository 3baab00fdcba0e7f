//! Metadata/Verifier: the terminal stage. Renames a file's `.part` into
//! place (or resolves it into a hardlink when it shares a
//! `hardlink_target_id` with an already-finalized file), then applies
//! mtime/permissions/symlink-target. Metadata failures are warnings only
//! — by the time a file reaches here its content has already passed the
//! whole-file hash check, so it counts as restored regardless.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::messages::FinalizedFile;
use crate::types::FileFailure;

pub struct VerifierOutcome {
    pub files_restored: u64,
    pub hardlinks_created: u64,
    pub metadata_warnings: u64,
    pub failures: Vec<FileFailure>,
}

#[tracing::instrument(skip(ctx, rx))]
pub async fn run_verifier(ctx: Context, mut rx: mpsc::Receiver<FinalizedFile>) -> VerifierOutcome {
    let mut hardlink_roots: HashMap<u64, PathBuf> = HashMap::new();
    let mut files_restored = 0u64;
    let mut hardlinks_created = 0u64;
    let mut metadata_warnings = 0u64;
    let mut failures = Vec::new();

    loop {
        let finalized = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                info!("verifier stopping: restore cancelled");
                break;
            }
            received = rx.recv() => match received {
                Some(f) => f,
                None => {
                    info!("verifier channel closed, shutting down");
                    break;
                }
            },
        };

        match place_file(&finalized, &mut hardlink_roots) {
            Ok(created_hardlink) => {
                if created_hardlink {
                    hardlinks_created += 1;
                }
            }
            Err(e) => {
                warn!(file_id = finalized.file_id, error = %e, "failed to place finalized file");
                failures.push(FileFailure {
                    file_id: Some(finalized.file_id),
                    path: Some(finalized.target_path.display().to_string()),
                    reason: e,
                });
                continue;
            }
        }

        metadata_warnings += apply_metadata(&finalized);
        files_restored += 1;
        debug!(file_id = finalized.file_id, "file restored");
    }

    VerifierOutcome {
        files_restored,
        hardlinks_created,
        metadata_warnings,
        failures,
    }
}

/// Renames `.part` into place, or — if this file shares a
/// `hardlink_target_id` with a file already placed — drops its own
/// (redundantly written) content and hardlinks to that file instead.
/// Returns whether a hardlink was created.
fn place_file(finalized: &FinalizedFile, roots: &mut HashMap<u64, PathBuf>) -> Result<bool, String> {
    if let Some(target_id) = finalized.hardlink_target_id {
        if let Some(existing) = roots.get(&target_id) {
            std::fs::remove_file(&finalized.part_path)
                .map_err(|e| format!("could not discard redundant part file: {e}"))?;
            std::fs::hard_link(existing, &finalized.target_path)
                .map_err(|e| format!("hard_link failed: {e}"))?;
            return Ok(true);
        }
        std::fs::rename(&finalized.part_path, &finalized.target_path)
            .map_err(|e| format!("rename failed: {e}"))?;
        roots.insert(target_id, finalized.target_path.clone());
        return Ok(false);
    }

    std::fs::rename(&finalized.part_path, &finalized.target_path)
        .map_err(|e| format!("rename failed: {e}"))?;
    Ok(false)
}

/// Applies mtime/permissions/symlink-target, returning the number of
/// warnings raised (never a hard failure per §7's taxonomy).
fn apply_metadata(finalized: &FinalizedFile) -> u64 {
    let mut warnings = 0u64;

    if let Some(target) = &finalized.metadata.symlink_target {
        if let Err(e) = replace_with_symlink(&finalized.target_path, target) {
            warn!(file_id = finalized.file_id, error = %e, "could not create symlink");
            warnings += 1;
        }
    }

    if let Some(mtime) = finalized.metadata.mtime_unix_secs {
        if let Err(e) = set_mtime(&finalized.target_path, mtime) {
            warn!(file_id = finalized.file_id, error = %e, "could not set mtime");
            warnings += 1;
        }
    }

    #[cfg(unix)]
    if let Some(mode) = finalized.metadata.unix_mode {
        if let Err(e) = set_unix_mode(&finalized.target_path, mode) {
            warn!(file_id = finalized.file_id, error = %e, "could not set permissions");
            warnings += 1;
        }
    }

    if !finalized.metadata.xattrs.is_empty() {
        debug!(
            file_id = finalized.file_id,
            count = finalized.metadata.xattrs.len(),
            "xattrs present but not applied on this platform"
        );
        warnings += 1;
    }

    warnings
}

fn set_mtime(path: &std::path::Path, unix_secs: i64) -> std::io::Result<()> {
    let time = if unix_secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(unix_secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs((-unix_secs) as u64)
    };
    let system_time: SystemTime = time;
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_modified(system_time)
}

#[cfg(unix)]
fn set_unix_mode(path: &std::path::Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(mode);
    std::fs::set_permissions(path, perms)
}

fn replace_with_symlink(path: &std::path::Path, target: &str) -> std::io::Result<()> {
    std::fs::remove_file(path)?;
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, path)
    }
    #[cfg(not(unix))]
    {
        let _ = target;
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "symlinks not supported on this platform",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::FileMetadata;
    use encryption::KeyManager;
    use tempfile::TempDir;

    fn test_ctx() -> Context {
        let codecs = crate::codec::CodecRegistry::new(KeyManager::new([5u8; 32]));
        Context::new("verifier-test", codecs).unwrap()
    }

    fn finalized(dir: &TempDir, file_id: u64, name: &str, hardlink_target_id: Option<u64>) -> FinalizedFile {
        let part_path = dir.path().join(format!("{name}.part"));
        std::fs::write(&part_path, b"content").unwrap();
        FinalizedFile {
            file_id,
            part_path,
            target_path: dir.path().join(name),
            metadata: FileMetadata::default(),
            hardlink_target_id,
        }
    }

    #[tokio::test]
    async fn test_simple_rename() {
        let dir = TempDir::new().unwrap();
        let (tx, rx) = mpsc::channel(4);
        tx.send(finalized(&dir, 1, "a.txt", None)).await.unwrap();
        drop(tx);

        let outcome = run_verifier(test_ctx(), rx).await;
        assert_eq!(outcome.files_restored, 1);
        assert_eq!(outcome.hardlinks_created, 0);
        assert!(dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_hardlink_coalescing() {
        let dir = TempDir::new().unwrap();
        let (tx, rx) = mpsc::channel(4);
        tx.send(finalized(&dir, 1, "first.txt", Some(42))).await.unwrap();
        tx.send(finalized(&dir, 2, "second.txt", Some(42))).await.unwrap();
        drop(tx);

        let outcome = run_verifier(test_ctx(), rx).await;
        assert_eq!(outcome.files_restored, 2);
        assert_eq!(outcome.hardlinks_created, 1);

        let meta_a = std::fs::metadata(dir.path().join("first.txt")).unwrap();
        let meta_b = std::fs::metadata(dir.path().join("second.txt")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            assert_eq!(meta_a.ino(), meta_b.ino());
        }
        let _ = (meta_a, meta_b);
    }

    #[tokio::test]
    async fn test_mtime_applied() {
        let dir = TempDir::new().unwrap();
        let (tx, rx) = mpsc::channel(4);
        let mut f = finalized(&dir, 1, "dated.txt", None);
        f.metadata.mtime_unix_secs = Some(1_700_000_000);
        tx.send(f).await.unwrap();
        drop(tx);

        let outcome = run_verifier(test_ctx(), rx).await;
        assert_eq!(outcome.files_restored, 1);
        assert_eq!(outcome.metadata_warnings, 0);

        let meta = std::fs::metadata(dir.path().join("dated.txt")).unwrap();
        let mtime = meta.modified().unwrap();
        assert_eq!(
            mtime.duration_since(UNIX_EPOCH).unwrap().as_secs(),
            1_700_000_000
        );
    }
}
