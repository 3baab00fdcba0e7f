//! Catalog DB external interface: the relational store cataloging files,
//! metadata, blocksets, blocks and remote volumes. Only the surface the
//! restore data plane needs is modeled here — schema migrations and the
//! write-path tables it doesn't read are out of scope.

pub mod error;
pub mod memory;
pub mod snapshot;

pub use error::CatalogError;
pub use memory::MemCatalog;
pub use snapshot::CatalogSnapshot;

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use common::{Block, BlockRequest, FilePlan, RemoteVolume};

/// Selects which point-in-time fileset to restore from, plus an optional
/// path filter. Mirrors the `restore` CLI surface's selector flags.
#[derive(Debug, Clone, Default)]
pub struct RestoreRequest {
    /// Backup (repository) identifier; opaque to the catalog trait itself.
    pub backup_id: String,
    /// Glob patterns (ORed together); empty means "every file".
    pub path_globs: Vec<String>,
    /// Restore from the Nth most recent fileset (0 = latest). Mutually
    /// exclusive with `at_time` in practice; `at_time` wins if both are set.
    pub version: Option<u32>,
    /// Restore the fileset whose timestamp is the latest one `<= at_time`.
    pub at_time: Option<i64>,
}

/// One item of the streaming restore plan: a file's plan plus its ordered
/// block requests. An `Err` means the catalog could not resolve that one
/// file (e.g. a missing block row) — the caller treats it as per-file
/// fatal and keeps draining the stream.
pub type FilePlanItem = Result<(FilePlan, Vec<BlockRequest>), CatalogError>;

/// External interface to the catalog database. Implementations must
/// stream results ordered by `file_id` then `block_index`, matching the
/// `File ⋈ Blockset ⋈ BlocksetEntry ⋈ Block ⋈ RemoteVolume` join the
/// distilled spec describes, without materializing the whole plan in
/// memory (the in-memory reference implementation is a deliberate,
/// documented exception — see its own doc comment).
pub trait Catalog: Send + Sync {
    /// Stream `(FilePlan, block requests)` for every file matching
    /// `request`, ordered by `file_id`.
    fn files_for_restore<'a>(
        &'a self,
        request: &'a RestoreRequest,
    ) -> BoxFuture<'a, Result<BoxStream<'a, FilePlanItem>, CatalogError>>;

    /// Resolve a block hash to every `(volume, block)` row that can supply
    /// it. The caller applies the duplicate-block tie-break; this method
    /// just reports the candidates present in the catalog for that hash.
    fn resolve_block<'a>(
        &'a self,
        hash: &'a common::ContentHash,
    ) -> BoxFuture<'a, Result<Vec<(RemoteVolume, Block)>, CatalogError>>;

    /// Look up a `RemoteVolume` row by id, for the Volume Downloader to
    /// resolve a `volume_id` into the object name/hash it fetches from the
    /// backend.
    fn get_volume<'a>(&'a self, volume_id: u64) -> BoxFuture<'a, Result<RemoteVolume, CatalogError>>;
}
