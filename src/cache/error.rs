use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the caching engine itself.
///
/// Origin failures never appear here; they travel through the caller's own
/// error type, which must implement `From<CacheError>`.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CacheError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
