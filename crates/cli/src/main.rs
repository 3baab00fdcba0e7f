//! `coldvault` — the restore data plane's command-line surface. Thin
//! wrapper over `restore::run_restore`: parses flags, builds the catalog
//! and backend collaborators named in spec.md §6, and maps the resulting
//! `RestoreSummary` to the process exit code §6 specifies.
//!
//! Mirrors this pack's usual CLI binary shape (`init_tracing`,
//! `clap::Parser` derive) rather than inventing a new CLI idiom;
//! returns a `std::process::ExitCode` instead of calling `process::exit`
//! directly so destructors still run on the way out.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::Once;

use anyhow::{bail, Context as _, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use backend::fs::FilesystemBackend;
use backend::Backend;
use catalog::{Catalog, CatalogSnapshot, RestoreRequest};
use encryption::KeyManager;
use restore::{CodecRegistry, Context, RestoreConfig};

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let format = std::env::var("COLDVAULT_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

        if format.eq_ignore_ascii_case("json") {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .json()
                .flatten_event(true)
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .compact()
                .init();
        }
    });
}

#[derive(Parser)]
#[command(name = "coldvault")]
#[command(about = "Encrypted, content-addressed backup restore tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rehydrate a subset of files from a backup into a local directory.
    Restore(RestoreArgs),
}

#[derive(Args)]
struct RestoreArgs {
    /// Identifier of the backup to restore from. Opaque to the catalog;
    /// carried through into tracing spans and the `Context`.
    backup_id: String,

    /// Glob pattern selecting which files to restore; may be repeated.
    /// Restores every file in the fileset when omitted.
    #[arg(long = "path", value_name = "GLOB")]
    path: Vec<String>,

    /// Restore the Nth most recent fileset (0 = latest). Mutually
    /// exclusive with `--time`.
    #[arg(long)]
    version: Option<u32>,

    /// Restore the fileset whose timestamp is the latest one at or before
    /// this Unix timestamp (seconds). Takes precedence over `--version`.
    #[arg(long)]
    time: Option<i64>,

    /// Directory to restore into.
    #[arg(long, value_name = "DIR")]
    to: PathBuf,

    /// Overwrite files already present at the destination.
    #[arg(long)]
    overwrite: bool,

    /// Abort the whole restore on the first per-file-fatal error instead
    /// of skipping that file and continuing.
    #[arg(long)]
    strict: bool,

    /// Path to the catalog snapshot JSON file (the restore catalog's
    /// on-disk stand-in; see `catalog::snapshot`).
    #[arg(long, value_name = "FILE")]
    catalog: PathBuf,

    /// Root directory of the `file://`-scheme backend holding volume
    /// blobs.
    #[arg(long, value_name = "DIR")]
    backend: PathBuf,

    /// Hex-encoded 256-bit master key for decrypting encrypted volumes.
    /// Falls back to `COLDVAULT_MASTER_KEY`, then to a freshly generated
    /// (restore-only-useful-for-unencrypted-volumes) key if neither is
    /// set.
    #[arg(long, value_name = "HEX")]
    key_hex: Option<String>,

    /// Override the temp directory volumes are staged in.
    #[arg(long, value_name = "DIR")]
    temp_dir: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {e}");
            return ExitCode::from(3);
        }
    };

    let code = match cli.command {
        Commands::Restore(args) => runtime.block_on(run(args)),
    };
    ExitCode::from(code)
}

/// Runs the `restore` subcommand and returns the process exit code
/// (0/2/3/4/5 per spec.md §6). Returns a plain `u8` rather than
/// `ExitCode` so tests can assert on the value directly.
async fn run(args: RestoreArgs) -> u8 {
    if args.version.is_some() && args.time.is_some() {
        eprintln!("error: --version and --time are mutually exclusive");
        return 4;
    }

    let catalog: Arc<dyn Catalog> = match CatalogSnapshot::load(&args.catalog) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("error: could not load catalog snapshot: {e}");
            return 5;
        }
    };

    let backend: Arc<dyn Backend> = Arc::new(FilesystemBackend::new(args.backend.clone()));

    let key_manager = match resolve_key_manager(args.key_hex.as_deref()) {
        Ok(km) => km,
        Err(e) => {
            eprintln!("error: {e}");
            return 4;
        }
    };

    let codecs = CodecRegistry::new(key_manager);
    let ctx = match build_context(&args, codecs) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("error: {e}");
            return 4;
        }
    };

    let config = RestoreConfig {
        strict: args.strict,
        ..RestoreConfig::from_env()
    };

    let request = RestoreRequest {
        backup_id: args.backup_id.clone(),
        path_globs: args.path.clone(),
        version: args.version,
        at_time: args.time,
    };

    info!(backup_id = %args.backup_id, to = %args.to.display(), "starting restore");

    let summary = restore::run_restore(ctx, catalog, backend, request, args.to, args.overwrite, config).await;

    print_summary(&summary);
    summary.exit_code() as u8
}

fn resolve_key_manager(key_hex: Option<&str>) -> Result<KeyManager> {
    if let Some(hex_key) = key_hex {
        let bytes = hex::decode(hex_key).context("--key-hex is not valid hex")?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("--key-hex must decode to 32 bytes"))?;
        return Ok(KeyManager::new(key));
    }
    match KeyManager::from_env() {
        Ok(km) => Ok(km),
        Err(_) => {
            tracing::warn!(
                "no COLDVAULT_MASTER_KEY or --key-hex provided; generated an ephemeral key \
                 that can only restore unencrypted volumes"
            );
            KeyManager::generate().context("generating ephemeral key manager")
        }
    }
}

fn build_context(args: &RestoreArgs, codecs: CodecRegistry) -> Result<Context> {
    match &args.temp_dir {
        Some(dir) => {
            if !dir.is_dir() {
                bail!("--temp-dir {} does not exist", dir.display());
            }
            let tempdir = tempfile::TempDir::new_in(dir)
                .with_context(|| format!("creating temp dir under {}", dir.display()))?;
            Ok(Context::with_temp_dir(args.backup_id.clone(), codecs, tempdir))
        }
        None => Context::new(args.backup_id.clone(), codecs).context("creating restore context"),
    }
}

fn print_summary(summary: &restore::RestoreSummary) {
    println!(
        "restored {} file(s), {} failed, {} skipped ({} bytes, {} volume(s) downloaded, {:.2}s)",
        summary.files_restored,
        summary.files_failed,
        summary.files_skipped,
        summary.bytes_written,
        summary.volumes_downloaded,
        summary.duration.as_secs_f64(),
    );
    if summary.hardlinks_created > 0 {
        println!("created {} hardlink(s)", summary.hardlinks_created);
    }
    if summary.metadata_warnings > 0 {
        println!("{} metadata warning(s) (mtime/permissions/xattrs)", summary.metadata_warnings);
    }
    for failure in &summary.failures {
        let path = failure.path.as_deref().unwrap_or("<unknown>");
        println!("  FAILED {path}: {}", failure.reason);
    }
}
