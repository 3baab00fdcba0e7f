use thiserror::Error;

/// Errors produced by a [`crate::Backend`] implementation.
///
/// `is_transient` decides whether the Volume Downloader's retry loop
/// should back off and retry or surface the failure immediately.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transient backend error: {0}")]
    Transient(String),

    #[error("backend rejected the request: {0}")]
    Rejected(String),
}

impl BackendError {
    pub fn transient(reason: impl Into<String>) -> Self {
        BackendError::Transient(reason.into())
    }

    /// Whether the Downloader's retry-with-backoff loop applies to this
    /// error. I/O errors are treated as transient too (disk-backed test
    /// double and real filesystem backend both surface them that way);
    /// `NotFound`/`Rejected` are not retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_) | BackendError::Io(_))
    }
}
