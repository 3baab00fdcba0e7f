//! Block Source: streams the catalog's restore plan and fans it out as
//! `FilePlan`/`BlockRequest` messages to the Assembler and Volume Manager.

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use catalog::{Catalog, CatalogError, RestoreRequest};
use common::RestoreError;

use crate::context::Context;
use crate::messages::{AssemblerMessage, ManagerMessage};
use crate::types::FileFailure;

/// Outcome of draining one restore plan stream.
#[derive(Default)]
pub struct BlockSourceOutcome {
    pub failures: Vec<FileFailure>,
    /// Files that already existed at the target path and were never
    /// planned downstream — no `Plan`/block requests were issued for them,
    /// so a clean re-run triggers no downloads or writes (spec §8).
    pub files_skipped: u64,
}

/// Drains `catalog.files_for_restore(request)`, forwarding each file's plan
/// to the Assembler and its block requests to the Manager — unless the
/// target path already exists and `overwrite` is false, in which case the
/// file is skipped before any volume work is scheduled. Returns the
/// per-file failures and skip count it observed; the caller (pipeline
/// orchestration) folds these into the final `RestoreSummary`.
#[tracing::instrument(skip(ctx, catalog, assembler_tx, manager_tx))]
pub async fn run_block_source(
    ctx: Context,
    catalog: Arc<dyn Catalog>,
    request: RestoreRequest,
    strict: bool,
    output_root: PathBuf,
    overwrite: bool,
    assembler_tx: mpsc::Sender<AssemblerMessage>,
    manager_tx: mpsc::Sender<ManagerMessage>,
) -> BlockSourceOutcome {
    let mut outcome = BlockSourceOutcome::default();

    let mut stream = match catalog.files_for_restore(&request).await {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "failed to open restore plan stream");
            ctx.cancel.cancel();
            outcome.failures.push(FileFailure {
                file_id: None,
                path: None,
                reason: format!("could not resolve restore plan: {e}"),
            });
            return outcome;
        }
    };

    loop {
        if ctx.is_cancelled() {
            info!("block source stopping: restore cancelled");
            break;
        }

        let item = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            item = stream.next() => item,
        };

        let Some(item) = item else {
            break;
        };

        match item {
            Ok((plan, requests)) => {
                let target_path = output_root.join(&plan.target_path);
                if !overwrite && target_path.exists() {
                    debug!(file_id = plan.file_id, path = %plan.target_path, "skipping existing file, issuing no downloads");
                    outcome.files_skipped += 1;
                    continue;
                }

                debug!(file_id = plan.file_id, blocks = requests.len(), "planned file");
                if assembler_tx.send(AssemblerMessage::Plan(plan)).await.is_err() {
                    warn!("assembler channel closed, stopping block source");
                    break;
                }
                for req in requests {
                    if manager_tx.send(ManagerMessage::Request(req)).await.is_err() {
                        warn!("manager channel closed, stopping block source");
                        return outcome;
                    }
                }
            }
            Err(catalog_err) => {
                let restore_err = classify(catalog_err);
                if restore_err.is_globally_fatal() {
                    error!(error = %restore_err, "catalog corrupt, aborting restore");
                    ctx.cancel.cancel();
                    outcome.failures.push(FileFailure {
                        file_id: None,
                        path: None,
                        reason: restore_err.to_string(),
                    });
                    break;
                }
                warn!(error = %restore_err, "per-file catalog error");
                outcome.failures.push(FileFailure {
                    file_id: None,
                    path: None,
                    reason: restore_err.to_string(),
                });
                if strict {
                    ctx.cancel.cancel();
                    break;
                }
            }
        }
    }

    outcome
}

fn classify(err: CatalogError) -> RestoreError {
    match err {
        CatalogError::Corrupt(msg) => RestoreError::CatalogCorrupt(msg),
        CatalogError::MissingBlock(hash) => RestoreError::MissingBlock(hash),
        CatalogError::NoSuchFileset => RestoreError::CatalogCorrupt("no such fileset".into()),
        CatalogError::InvalidGlob { pattern, reason } => {
            RestoreError::CatalogCorrupt(format!("invalid glob {pattern:?}: {reason}"))
        }
    }
}
