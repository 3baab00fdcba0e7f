//! Abstract remote object store used by the restore data plane's Volume
//! Downloader: `list/get/put/delete/rename`, pluggable by URL scheme. Only
//! the restore-relevant surface is implemented here — the write path's
//! multipart-upload and versioning concerns are out of scope.

pub mod error;
pub mod fs;
pub mod memory;

pub use error::BackendError;

use futures::future::BoxFuture;

/// One object's name and size, as returned by [`Backend::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub name: String,
    pub size: u64,
}

/// Object store abstraction. Implementations are selected at startup by
/// URL scheme (`file://`, `s3://`, ...); this spec implements the local
/// filesystem scheme for real and an in-memory scheme as a test double.
/// Additional schemes plug in here without the restore pipeline above it
/// changing at all.
pub trait Backend: Send + Sync {
    fn list(&self) -> BoxFuture<'_, Result<Vec<ObjectInfo>, BackendError>>;

    fn get<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Vec<u8>, BackendError>>;

    fn put<'a>(&'a self, name: &'a str, data: Vec<u8>) -> BoxFuture<'a, Result<u64, BackendError>>;

    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), BackendError>>;

    fn rename<'a>(
        &'a self,
        old_name: &'a str,
        new_name: &'a str,
    ) -> BoxFuture<'a, Result<(), BackendError>>;
}
