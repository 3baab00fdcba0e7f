use thiserror::Error;

use common::ContentHash;

/// Errors surfaced by a [`crate::Catalog`] implementation. `Corrupt` is the
/// one variant the restore pipeline treats as globally fatal; the rest are
/// scoped to the single file/fileset they describe.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog corrupt: {0}")]
    Corrupt(String),

    #[error("no row for block hash {0}")]
    MissingBlock(ContentHash),

    #[error("no fileset matches the requested backup selector")]
    NoSuchFileset,

    #[error("invalid path filter {pattern:?}: {reason}")]
    InvalidGlob { pattern: String, reason: String },
}
