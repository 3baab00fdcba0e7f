use thiserror::Error;

/// Errors produced by decompression routines.
#[derive(Debug, Error)]
pub enum CompressionError {
    /// The algorithm name recorded in the volume manifest is not one this
    /// build knows how to decode.
    #[error("Invalid compression policy: {reason}")]
    InvalidPolicy { reason: String },

    /// Compression backend produced an IO error.
    #[error("IO error while using {algorithm}: {source}")]
    Io {
        algorithm: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Codec-specific failure without an underlying IO error.
    #[error("Codec error in {algorithm}: {message}")]
    Codec {
        algorithm: &'static str,
        message: String,
    },
}

impl CompressionError {
    pub fn invalid_policy(reason: impl Into<String>) -> Self {
        CompressionError::InvalidPolicy {
            reason: reason.into(),
        }
    }

    pub fn codec(algorithm: &'static str, message: impl Into<String>) -> Self {
        CompressionError::Codec {
            algorithm,
            message: message.into(),
        }
    }

    pub fn io(algorithm: &'static str, source: std::io::Error) -> Self {
        CompressionError::Io { algorithm, source }
    }
}
